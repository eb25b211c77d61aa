//! Cache key derivation.
//!
//! A key is the request method, host and path, optionally followed by the raw
//! query string. Nothing is normalized: case, trailing slashes, percent
//! encoding and query parameter order all distinguish keys.

use std::fmt;

use axum::http::{Method, Request, header, uri::Authority};

/// Fingerprint identifying a cacheable request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Build a cache key from request components.
///
/// With `consider_query` unset the query never reaches the key, so `/p` and
/// `/p?x=1` collapse to one entry. With it set the query is appended
/// verbatim; an empty query is treated the same as no query.
pub fn build_key(
    method: &Method,
    host: &str,
    path: &str,
    raw_query: Option<&str>,
    consider_query: bool,
) -> CacheKey {
    let query = raw_query
        .filter(|query| consider_query && !query.is_empty())
        .unwrap_or("");

    let mut key =
        String::with_capacity(method.as_str().len() + host.len() + path.len() + query.len() + 2);
    key.push_str(method.as_str());
    key.push(' ');
    key.push_str(host);
    key.push_str(path);
    if !query.is_empty() {
        key.push('?');
        key.push_str(query);
    }

    CacheKey(key)
}

/// Build the cache key for an inbound request.
///
/// The host comes from the `Host` header when present and falls back to the
/// URI authority (absolute-form requests and HTTP/2). Returns `None` when the
/// `Host` header is not a plain authority: a value such as
/// `example.com/admin` would otherwise spell the key of a different path.
pub fn key_for_request<B>(request: &Request<B>, consider_query: bool) -> Option<CacheKey> {
    let uri = request.uri();
    let host = match request.headers().get(header::HOST) {
        Some(value) => {
            let host = value.to_str().ok()?;
            Authority::try_from(host).ok()?;
            host
        }
        None => uri.authority().map_or("", Authority::as_str),
    };

    Some(build_key(
        request.method(),
        host,
        uri.path(),
        uri.query(),
        consider_query,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn query_is_ignored_when_disabled() {
        let plain = build_key(&Method::GET, "localhost", "/p", None, false);
        let with_query = build_key(&Method::GET, "localhost", "/p", Some("x=1"), false);
        assert_eq!(plain, with_query);
        assert_eq!(plain.as_str(), "GET localhost/p");
    }

    #[test]
    fn query_distinguishes_keys_when_enabled() {
        let plain = build_key(&Method::GET, "localhost", "/p", None, true);
        let first = build_key(&Method::GET, "localhost", "/p", Some("x=1"), true);
        let second = build_key(&Method::GET, "localhost", "/p", Some("x=2"), true);
        assert_ne!(plain, first);
        assert_ne!(first, second);
        assert_eq!(first.as_str(), "GET localhost/p?x=1");
    }

    #[test]
    fn empty_query_matches_missing_query() {
        let plain = build_key(&Method::GET, "localhost", "/p", None, true);
        let empty = build_key(&Method::GET, "localhost", "/p", Some(""), true);
        assert_eq!(plain, empty);
    }

    #[test]
    fn reordered_query_is_a_different_key() {
        let ab = build_key(&Method::GET, "h", "/p", Some("a=1&b=2"), true);
        let ba = build_key(&Method::GET, "h", "/p", Some("b=2&a=1"), true);
        assert_ne!(ab, ba);
    }

    #[test]
    fn method_host_and_path_are_taken_verbatim() {
        let base = build_key(&Method::GET, "example.com", "/Path", None, false);
        assert_ne!(base, build_key(&Method::HEAD, "example.com", "/Path", None, false));
        assert_ne!(base, build_key(&Method::GET, "Example.com", "/Path", None, false));
        assert_ne!(base, build_key(&Method::GET, "example.com", "/path", None, false));
        assert_ne!(base, build_key(&Method::GET, "example.com", "/Path/", None, false));
    }

    #[test]
    fn request_host_header_wins_over_authority() {
        let req = Request::builder()
            .uri("http://origin.internal/some/path?q=1")
            .header(header::HOST, "public.example")
            .body(Body::empty())
            .unwrap();
        assert_eq!(
            key_for_request(&req, true).unwrap().as_str(),
            "GET public.example/some/path?q=1"
        );
    }

    #[test]
    fn request_falls_back_to_uri_authority() {
        let req = Request::builder()
            .uri("http://localhost/some/path")
            .body(Body::empty())
            .unwrap();
        assert_eq!(
            key_for_request(&req, false).unwrap().as_str(),
            "GET localhost/some/path"
        );
    }

    #[test]
    fn host_carrying_a_path_yields_no_key() {
        let spoofed = Request::builder()
            .uri("/x")
            .header(header::HOST, "victim.example/admin")
            .body(Body::empty())
            .unwrap();
        assert_eq!(key_for_request(&spoofed, false), None);

        let spaced = Request::builder()
            .uri("/x")
            .header(header::HOST, "victim.example admin")
            .body(Body::empty())
            .unwrap();
        assert_eq!(key_for_request(&spaced, false), None);

        let legit = Request::builder()
            .uri("/admin/x")
            .header(header::HOST, "victim.example:8080")
            .body(Body::empty())
            .unwrap();
        assert_eq!(
            key_for_request(&legit, false).unwrap().as_str(),
            "GET victim.example:8080/admin/x"
        );
    }
}
