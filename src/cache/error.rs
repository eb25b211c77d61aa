//! Error types for the response cache.
//!
//! Only [`CacheError`] ever leaves the crate through a fallible API; the
//! per-request errors are absorbed by the middleware and surface as a miss or
//! a skipped write.

use std::{io, path::PathBuf};

use thiserror::Error;

/// Construction-time failure of a [`ResponseCache`](super::ResponseCache).
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("invalid cache configuration for `{key}`: {reason}")]
    Configuration { key: &'static str, reason: String },
    #[error("failed to open cache store at {}: {source}", .path.display())]
    StoreOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl CacheError {
    pub fn configuration(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Configuration {
            key,
            reason: reason.into(),
        }
    }

    pub fn store_open(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::StoreOpen {
            path: path.into(),
            source,
        }
    }
}

/// Failure reported by a [`KeyedStore`](super::KeyedStore) operation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io error: {0}")]
    Io(#[from] io::Error),
    #[error("corrupt store entry: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt(message.into())
    }
}

/// A stored envelope could not be turned back into a response.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unsupported envelope version {0}")]
    Version(u32),
    #[error("invalid status code {0}")]
    Status(u16),
    #[error("invalid header `{name}`: {reason}")]
    Header { name: String, reason: String },
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// A response could not be serialized into an envelope.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("failed to serialize envelope: {0}")]
    Serialize(#[from] serde_json::Error),
}
