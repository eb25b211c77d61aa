//! HTTP surface of the caching proxy.

use axum::{
    Router,
    middleware::{from_fn, from_fn_with_state},
};

use crate::cache::{ResponseCache, response_cache_layer};

use super::upstream::{self, Upstream};

pub mod middleware;

/// Every request falls through to the upstream, wrapped by the response cache
/// and an outer access log.
pub fn build_router(cache: ResponseCache, upstream: Upstream) -> Router {
    Router::new()
        .fallback(upstream::forward)
        .with_state(upstream)
        .layer(from_fn_with_state(cache, response_cache_layer))
        .layer(from_fn(middleware::log_responses))
}
