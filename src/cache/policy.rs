//! Freshness policy.
//!
//! Turns the upstream response's `Cache-Control` header into a TTL decision.
//! This is the only place a TTL is chosen; stores expire whatever they are
//! given.

use std::time::Duration;

use axum::http::{HeaderMap, header};

/// The `Cache-Control` directives the cache acts on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControl {
    pub max_age: Option<i64>,
    pub s_maxage: Option<i64>,
    pub no_store: bool,
    pub no_cache: bool,
    pub private: bool,
}

impl CacheControl {
    /// Whether any directive forbids storing the response in a shared cache.
    pub fn forbids_storage(&self) -> bool {
        self.no_store || self.no_cache || self.private
    }

    /// Freshness lifetime in seconds; `s-maxage` wins over `max-age`.
    pub fn lifetime_seconds(&self) -> Option<i64> {
        self.s_maxage.or(self.max_age)
    }
}

/// Parse every `Cache-Control` header on a response.
///
/// Directive names are case-insensitive. Values that do not parse as an
/// integer are ignored, as if the directive were absent. When a lifetime
/// directive repeats, the first usable occurrence wins.
pub fn parse_cache_control(headers: &HeaderMap) -> CacheControl {
    let mut cc = CacheControl::default();

    for value in headers.get_all(header::CACHE_CONTROL) {
        let Ok(value) = value.to_str() else {
            continue;
        };

        for directive in value.split(',') {
            let (name, argument) = match directive.split_once('=') {
                Some((name, argument)) => (name.trim(), Some(argument.trim().trim_matches('"'))),
                None => (directive.trim(), None),
            };

            if name.eq_ignore_ascii_case("no-store") {
                cc.no_store = true;
            } else if name.eq_ignore_ascii_case("no-cache") {
                cc.no_cache = true;
            } else if name.eq_ignore_ascii_case("private") {
                cc.private = true;
            } else if name.eq_ignore_ascii_case("max-age") && cc.max_age.is_none() {
                cc.max_age = argument.and_then(|arg| arg.parse().ok());
            } else if name.eq_ignore_ascii_case("s-maxage") && cc.s_maxage.is_none() {
                cc.s_maxage = argument.and_then(|arg| arg.parse().ok());
            }
        }
    }

    cc
}

/// Compute how long a response may be cached.
///
/// Returns `None` when the response must not be stored: no usable lifetime,
/// a zero or negative lifetime, or a directive forbidding storage. Otherwise
/// the lifetime is clamped to `ceiling`.
pub fn compute_ttl(headers: &HeaderMap, ceiling: Duration) -> Option<Duration> {
    let cc = parse_cache_control(headers);
    if cc.forbids_storage() {
        return None;
    }

    let seconds = u64::try_from(cc.lifetime_seconds()?).ok()?;
    if seconds == 0 || ceiling.is_zero() {
        return None;
    }

    Some(Duration::from_secs(seconds).min(ceiling))
}
