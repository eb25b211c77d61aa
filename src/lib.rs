//! Disk-backed HTTP response caching for axum services.
//!
//! [`cache`] holds the middleware and its on-disk store; [`infra`] wires it in
//! front of an upstream origin for the `simplecache` binary.

pub mod cache;
pub mod config;
pub mod infra;
