//! Disk-backed HTTP response cache.
//!
//! - **Keys** ([`build_key`]): method, host, path and optionally the raw query
//! - **Freshness** ([`compute_ttl`]): `Cache-Control` lifetime clamped to `max_expiry`
//! - **Envelope** ([`CachedResponse`]): status, headers and body as stored bytes
//! - **Store** ([`KeyedStore`], [`FileStore`]): durable map with per-key TTL
//! - **Middleware** ([`response_cache_layer`]): the per-request hit/miss flow
//! - **Reclamation** ([`Reclaimer`]): periodic sweep of expired entries
//!
//! ## Usage
//!
//! ```ignore
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let cache = ResponseCache::new(CacheConfig::default(), "simplecache", shutdown_rx)?;
//! let app = Router::new()
//!     .fallback(upstream)
//!     .layer(axum::middleware::from_fn_with_state(cache, response_cache_layer));
//! ```

mod config;
pub mod envelope;
mod error;
mod keys;
mod middleware;
mod policy;
mod reclaim;
mod state;
mod store;

pub use config::CacheConfig;
pub use envelope::CachedResponse;
pub use error::{CacheError, DecodeError, EncodeError, StoreError};
pub use keys::{CacheKey, build_key, key_for_request};
pub use middleware::response_cache_layer;
pub use policy::{CacheControl, compute_ttl, parse_cache_control};
pub use reclaim::{Reclaimer, sweep_once};
pub use state::{CACHE_STATUS_HEADER, CacheStatus, ResponseCache};
pub use store::{FileStore, KeyedStore, SweepStats};
