//! Cache configuration.
//!
//! Immutable once a [`ResponseCache`](super::ResponseCache) has been built;
//! all durations are whole seconds.

use std::{path::PathBuf, time::Duration};

use serde::Deserialize;

use super::error::CacheError;

// Default values for cache configuration
const DEFAULT_PATH: &str = "/tmp/simplecache";
const DEFAULT_MAX_EXPIRY_SECS: u64 = 300;
const DEFAULT_CLEANUP_SECS: u64 = 600;

/// Construction parameters for the response cache.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory holding the on-disk store. Created when missing.
    pub path: PathBuf,
    /// Upper bound on any entry's time-to-live, in seconds.
    pub max_expiry: u64,
    /// Interval between reclamation sweeps, in seconds.
    pub cleanup: u64,
    /// Annotate responses with `Cache-Status: hit|miss`.
    pub add_status_header: bool,
    /// Include the raw URL query string in the cache key.
    pub consider_url_query: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_PATH),
            max_expiry: DEFAULT_MAX_EXPIRY_SECS,
            cleanup: DEFAULT_CLEANUP_SECS,
            add_status_header: true,
            consider_url_query: false,
        }
    }
}

impl CacheConfig {
    /// Check the bounds that must hold before a cache may be constructed.
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.max_expiry <= 1 {
            return Err(CacheError::configuration(
                "max_expiry",
                format!("must be greater than 1 second, got {}", self.max_expiry),
            ));
        }

        if self.cleanup <= 1 {
            return Err(CacheError::configuration(
                "cleanup",
                format!("must be greater than 1 second, got {}", self.cleanup),
            ));
        }

        if self.path.as_os_str().is_empty() {
            return Err(CacheError::configuration("path", "path must not be empty"));
        }

        Ok(())
    }

    /// The TTL ceiling as a [`Duration`].
    pub fn max_expiry_duration(&self) -> Duration {
        Duration::from_secs(self.max_expiry)
    }

    /// The reclamation interval as a [`Duration`].
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert_eq!(config.path, PathBuf::from("/tmp/simplecache"));
        assert_eq!(config.max_expiry, 300);
        assert_eq!(config.cleanup, 600);
        assert!(config.add_status_header);
        assert!(!config.consider_url_query);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_max_expiry_of_one() {
        let config = CacheConfig {
            max_expiry: 1,
            ..Default::default()
        };
        let err = config.validate().expect_err("max_expiry=1 must be rejected");
        assert!(matches!(
            err,
            CacheError::Configuration {
                key: "max_expiry",
                ..
            }
        ));
    }

    #[test]
    fn rejects_zero_cleanup() {
        let config = CacheConfig {
            cleanup: 0,
            ..Default::default()
        };
        let err = config.validate().expect_err("cleanup=0 must be rejected");
        assert!(matches!(err, CacheError::Configuration { key: "cleanup", .. }));
    }

    #[test]
    fn smallest_valid_bounds_are_accepted() {
        let config = CacheConfig {
            max_expiry: 2,
            cleanup: 2,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.max_expiry_duration(), Duration::from_secs(2));
        assert_eq!(config.cleanup_interval(), Duration::from_secs(2));
    }

    #[test]
    fn deserializes_partial_table_with_defaults() {
        let config: CacheConfig = serde_json::from_str(
            r#"{ "path": "/var/cache/app", "max_expiry": 60, "consider_url_query": true }"#,
        )
        .expect("valid config");
        assert_eq!(config.path, PathBuf::from("/var/cache/app"));
        assert_eq!(config.max_expiry, 60);
        assert_eq!(config.cleanup, 600);
        assert!(config.consider_url_query);
    }
}
