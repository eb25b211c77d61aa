//! Response cache middleware.
//!
//! Serves `GET`/`HEAD` requests from the store when a live entry exists;
//! otherwise runs the rest of the stack and stores the response when its
//! `Cache-Control` header allows. Concurrent misses for one key each reach
//! upstream and each write; the last write wins.

use axum::{
    body::Body,
    extract::State,
    http::{Method, Request},
    middleware::Next,
    response::Response,
};
use metrics::counter;
use tracing::{debug, instrument};

use super::{
    keys::key_for_request,
    policy::compute_ttl,
    state::{CacheStatus, ResponseCache},
};

/// Middleware for response caching.
///
/// Install with `axum::middleware::from_fn_with_state(cache, response_cache_layer)`.
#[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
pub async fn response_cache_layer(
    State(cache): State<ResponseCache>,
    request: Request<Body>,
    next: Next,
) -> Response {
    // Only GET and HEAD take part in caching
    if !is_cacheable_method(request.method()) {
        return bypass(&cache, request, next, "method not cacheable").await;
    }

    let Some(key) = key_for_request(&request, cache.config().consider_url_query) else {
        return bypass(&cache, request, next, "host header is not a valid authority").await;
    };

    if let Some(cached) = cache.lookup(&key).await {
        counter!("simplecache_hit_total").increment(1);
        debug!(outcome = "hit", key = %key, "serving cached response");
        let mut response = cached.into_response();
        cache.annotate(&mut response, CacheStatus::Hit);
        return response;
    }

    counter!("simplecache_miss_total").increment(1);
    debug!(outcome = "miss", key = %key, "cache miss, executing handler");

    let response = next.run(request).await;

    let mut response = match compute_ttl(response.headers(), cache.config().max_expiry_duration()) {
        Some(ttl) => cache.store_response(&key, response, ttl).await,
        None => {
            debug!(key = %key, status = response.status().as_u16(), "response not cacheable");
            response
        }
    };

    cache.annotate(&mut response, CacheStatus::Miss);
    response
}

async fn bypass(
    cache: &ResponseCache,
    request: Request<Body>,
    next: Next,
    reason: &'static str,
) -> Response {
    counter!("simplecache_bypass_total").increment(1);
    debug!(outcome = "bypass", reason, "passing request through");
    let mut response = next.run(request).await;
    cache.annotate(&mut response, CacheStatus::Miss);
    response
}

fn is_cacheable_method(method: &Method) -> bool {
    method == Method::GET || method == Method::HEAD
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_safe_reads_are_cacheable() {
        assert!(is_cacheable_method(&Method::GET));
        assert!(is_cacheable_method(&Method::HEAD));
        assert!(!is_cacheable_method(&Method::POST));
        assert!(!is_cacheable_method(&Method::PUT));
        assert!(!is_cacheable_method(&Method::DELETE));
        assert!(!is_cacheable_method(&Method::OPTIONS));
    }
}
