//! Shared state behind the response-cache middleware.

use std::{sync::Arc, time::Duration};

use axum::{
    http::{HeaderName, HeaderValue},
    response::Response,
};
use bytes::Bytes;
use metrics::counter;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{
    config::CacheConfig,
    envelope::{CachedResponse, buffer_response},
    error::CacheError,
    keys::CacheKey,
    reclaim::Reclaimer,
    store::{FileStore, KeyedStore},
};

/// Response header carrying the cache outcome.
pub const CACHE_STATUS_HEADER: HeaderName = HeaderName::from_static("cache-status");

/// Outcome reported through [`CACHE_STATUS_HEADER`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
        }
    }
}

/// A configured cache instance: store, settings and reclamation loop.
///
/// Cheap to clone; clones share one store and one reclamation loop. The loop
/// stops when `shutdown` fires, when [`ResponseCache::shutdown`] is called, or
/// when the last clone is dropped.
#[derive(Clone)]
pub struct ResponseCache {
    inner: Arc<Inner>,
}

struct Inner {
    name: Arc<str>,
    config: CacheConfig,
    store: Arc<dyn KeyedStore>,
    reclaimer: Reclaimer,
}

impl ResponseCache {
    /// Validate `config`, open the on-disk store at `config.path` and start
    /// reclamation.
    ///
    /// Must be called from within a tokio runtime. Nothing is started when an
    /// error is returned.
    pub fn new(
        config: CacheConfig,
        name: impl Into<String>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self, CacheError> {
        config.validate()?;
        let store =
            FileStore::open(&config.path).map_err(|err| CacheError::store_open(&config.path, err))?;
        Ok(Self::start(config, name.into(), Arc::new(store), shutdown))
    }

    /// Like [`ResponseCache::new`] but over a caller-supplied store;
    /// `config.path` is not touched.
    pub fn with_store(
        config: CacheConfig,
        name: impl Into<String>,
        store: Arc<dyn KeyedStore>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self, CacheError> {
        config.validate()?;
        Ok(Self::start(config, name.into(), store, shutdown))
    }

    fn start(
        config: CacheConfig,
        name: String,
        store: Arc<dyn KeyedStore>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let name: Arc<str> = Arc::from(name);
        let reclaimer = Reclaimer::spawn(
            name.clone(),
            store.clone(),
            config.cleanup_interval(),
            shutdown,
        );

        info!(
            cache = %name,
            path = %config.path.display(),
            max_expiry_secs = config.max_expiry,
            cleanup_secs = config.cleanup,
            consider_url_query = config.consider_url_query,
            "response cache ready"
        );

        Self {
            inner: Arc::new(Inner {
                name,
                config,
                store,
                reclaimer,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<dyn KeyedStore> {
        &self.inner.store
    }

    /// Whether the reclamation loop is still running.
    pub fn is_reclaiming(&self) -> bool {
        self.inner.reclaimer.is_running()
    }

    /// Stop reclamation and wait until the loop has exited.
    pub async fn shutdown(&self) {
        self.inner.reclaimer.shutdown().await;
    }

    /// Look up a cached response. Store and decode failures read as a miss.
    pub async fn lookup(&self, key: &CacheKey) -> Option<CachedResponse> {
        let bytes = match self.inner.store.get(key.as_str()).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(err) => {
                counter!("simplecache_store_error_total", "op" => "get").increment(1);
                warn!(
                    cache = self.name(),
                    op = "lookup",
                    key = %key,
                    error = %err,
                    "cache lookup failed; treating as miss"
                );
                return None;
            }
        };

        match CachedResponse::decode(&bytes) {
            Ok(cached) => Some(cached),
            Err(err) => {
                counter!("simplecache_decode_error_total").increment(1);
                warn!(
                    cache = self.name(),
                    op = "decode",
                    key = %key,
                    error = %err,
                    "discarding undecodable cache entry; treating as miss"
                );
                None
            }
        }
    }

    /// Buffer `response`, persist it under `key` for `ttl`, and hand back a
    /// response carrying the same status, headers and body.
    ///
    /// Failing to persist never changes what the client receives.
    pub async fn store_response(&self, key: &CacheKey, response: Response, ttl: Duration) -> Response {
        let (response, cached) = match buffer_response(response).await {
            Ok(buffered) => buffered,
            Err((response, err)) => {
                warn!(
                    cache = self.name(),
                    op = "buffer",
                    key = %key,
                    error = %err,
                    "failed to buffer upstream response; not caching"
                );
                return response;
            }
        };

        let encoded = match cached.encode() {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(
                    cache = self.name(),
                    op = "encode",
                    key = %key,
                    error = %err,
                    "failed to encode response; not caching"
                );
                return response;
            }
        };

        match self
            .inner
            .store
            .set(key.as_str(), Bytes::from(encoded), ttl)
            .await
        {
            Ok(()) => debug!(
                cache = self.name(),
                key = %key,
                ttl_secs = ttl.as_secs(),
                body_bytes = cached.body.len(),
                "stored response"
            ),
            Err(err) => {
                counter!("simplecache_store_error_total", "op" => "set").increment(1);
                warn!(
                    cache = self.name(),
                    op = "store",
                    key = %key,
                    error = %err,
                    "failed to store response; serving uncached"
                );
            }
        }

        response
    }

    /// Set the cache-status header when the instance is configured to.
    pub fn annotate(&self, response: &mut Response, status: CacheStatus) {
        if self.inner.config.add_status_header {
            response.headers_mut().insert(
                CACHE_STATUS_HEADER,
                HeaderValue::from_static(status.as_str()),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::StatusCode};
    use http_body_util::BodyExt;
    use tempfile::TempDir;

    use super::*;
    use crate::cache::keys::build_key;
    use axum::http::Method;

    fn config(dir: &TempDir) -> CacheConfig {
        CacheConfig {
            path: dir.path().join("store"),
            max_expiry: 10,
            cleanup: 20,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn new_creates_missing_store_directory() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let (_tx, rx) = watch::channel(false);

        let cache = ResponseCache::new(config.clone(), "simplecache", rx).expect("valid cache");
        assert!(config.path.is_dir());
        assert!(cache.is_reclaiming());
        assert_eq!(cache.name(), "simplecache");

        cache.shutdown().await;
        assert!(!cache.is_reclaiming());
    }

    #[tokio::test]
    async fn new_fails_when_path_is_a_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("occupied");
        std::fs::write(&file, b"x").unwrap();
        let (_tx, rx) = watch::channel(false);

        let result = ResponseCache::new(
            CacheConfig {
                path: file,
                ..config(&dir)
            },
            "simplecache",
            rx,
        );
        assert!(matches!(result, Err(CacheError::StoreOpen { .. })));
    }

    #[tokio::test]
    async fn store_then_lookup_round_trips() {
        let dir = TempDir::new().unwrap();
        let (_tx, rx) = watch::channel(false);
        let cache = ResponseCache::new(config(&dir), "simplecache", rx).unwrap();
        let key = build_key(&Method::GET, "localhost", "/a", None, false);

        assert!(cache.lookup(&key).await.is_none());

        let response = Response::builder()
            .status(StatusCode::CREATED)
            .header("x-origin", "yes")
            .body(Body::from("payload"))
            .unwrap();
        let returned = cache
            .store_response(&key, response, Duration::from_secs(5))
            .await;
        assert_eq!(returned.status(), StatusCode::CREATED);
        let body = returned.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, Bytes::from("payload"));

        let cached = cache.lookup(&key).await.expect("entry should be stored");
        assert_eq!(cached.status, StatusCode::CREATED);
        assert_eq!(cached.headers["x-origin"], "yes");
        assert_eq!(cached.body, Bytes::from("payload"));
    }

    #[tokio::test]
    async fn undecodable_entry_reads_as_miss() {
        let dir = TempDir::new().unwrap();
        let (_tx, rx) = watch::channel(false);
        let cache = ResponseCache::new(config(&dir), "simplecache", rx).unwrap();
        let key = build_key(&Method::GET, "localhost", "/corrupt", None, false);

        cache
            .store()
            .set(key.as_str(), Bytes::from_static(b"{not an envelope"), Duration::from_secs(5))
            .await
            .unwrap();

        assert!(cache.lookup(&key).await.is_none());
    }

    #[tokio::test]
    async fn annotate_respects_configuration() {
        let dir = TempDir::new().unwrap();
        let (_tx, rx) = watch::channel(false);
        let quiet = ResponseCache::new(
            CacheConfig {
                add_status_header: false,
                ..config(&dir)
            },
            "quiet",
            rx.clone(),
        )
        .unwrap();
        let loud = ResponseCache::new(config(&dir), "loud", rx).unwrap();

        let mut response = Response::new(Body::empty());
        quiet.annotate(&mut response, CacheStatus::Hit);
        assert!(response.headers().get(CACHE_STATUS_HEADER).is_none());

        loud.annotate(&mut response, CacheStatus::Hit);
        loud.annotate(&mut response, CacheStatus::Miss);
        assert_eq!(response.headers()[CACHE_STATUS_HEADER], "miss");
    }
}
