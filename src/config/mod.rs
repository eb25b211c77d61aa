//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, num::NonZeroU64, path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::cache::{CacheConfig, CacheError};

mod cli;

pub use cli::{CacheOverrides, CliArgs, Command, ServeArgs, ServeOverrides, SweepArgs};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "simplecache";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;
const DEFAULT_UPSTREAM_MAX_BODY_BYTES: u64 = 10 * 1024 * 1024;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub upstream: UpstreamSettings,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    /// Origin every request is forwarded to. Required by `serve` only.
    pub base_url: Option<Url>,
    pub timeout: Duration,
    pub max_body_bytes: NonZeroU64,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("SIMPLECACHE").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Sweep(args)) => raw.apply_cache_overrides(&args.cache),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    upstream: RawUpstreamSettings,
    cache: RawCacheSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.upstream_url.as_ref() {
            self.upstream.url = Some(url.clone());
        }
        if let Some(seconds) = overrides.upstream_timeout_seconds {
            self.upstream.timeout_seconds = Some(seconds);
        }
        if let Some(limit) = overrides.upstream_max_body_bytes {
            self.upstream.max_body_bytes = Some(limit);
        }

        self.apply_cache_overrides(&overrides.cache);
    }

    fn apply_cache_overrides(&mut self, overrides: &CacheOverrides) {
        if let Some(path) = overrides.path.as_ref() {
            self.cache.path = Some(path.clone());
        }
        if let Some(seconds) = overrides.max_expiry {
            self.cache.max_expiry = Some(seconds);
        }
        if let Some(seconds) = overrides.cleanup {
            self.cache.cleanup = Some(seconds);
        }
        if let Some(enabled) = overrides.add_status_header {
            self.cache.add_status_header = Some(enabled);
        }
        if let Some(enabled) = overrides.consider_url_query {
            self.cache.consider_url_query = Some(enabled);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            upstream,
            cache,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            upstream: build_upstream_settings(upstream)?,
            cache: build_cache_config(cache)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_upstream_settings(upstream: RawUpstreamSettings) -> Result<UpstreamSettings, LoadError> {
    let base_url = match upstream.url.as_deref().map(str::trim) {
        Some(value) if !value.is_empty() => {
            let url = Url::parse(value)
                .map_err(|err| LoadError::invalid("upstream.url", format!("failed to parse: {err}")))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(LoadError::invalid(
                    "upstream.url",
                    format!("unsupported scheme `{}`", url.scheme()),
                ));
            }
            Some(url)
        }
        _ => None,
    };

    let timeout_secs = upstream
        .timeout_seconds
        .unwrap_or(DEFAULT_UPSTREAM_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "upstream.timeout_seconds",
            "must be greater than zero",
        ));
    }

    let max_body_value = upstream
        .max_body_bytes
        .unwrap_or(DEFAULT_UPSTREAM_MAX_BODY_BYTES);
    let max_body_bytes = NonZeroU64::new(max_body_value).ok_or_else(|| {
        LoadError::invalid("upstream.max_body_bytes", "must be greater than zero")
    })?;
    usize::try_from(max_body_value).map_err(|_| {
        LoadError::invalid(
            "upstream.max_body_bytes",
            "value exceeds supported range for usize",
        )
    })?;

    Ok(UpstreamSettings {
        base_url,
        timeout: Duration::from_secs(timeout_secs),
        max_body_bytes,
    })
}

fn build_cache_config(cache: RawCacheSettings) -> Result<CacheConfig, LoadError> {
    let defaults = CacheConfig::default();
    let config = CacheConfig {
        path: cache.path.unwrap_or(defaults.path),
        max_expiry: cache.max_expiry.unwrap_or(defaults.max_expiry),
        cleanup: cache.cleanup.unwrap_or(defaults.cleanup),
        add_status_header: cache
            .add_status_header
            .unwrap_or(defaults.add_status_header),
        consider_url_query: cache
            .consider_url_query
            .unwrap_or(defaults.consider_url_query),
    };
    config.validate()?;
    Ok(config)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawUpstreamSettings {
    url: Option<String>,
    timeout_seconds: Option<u64>,
    max_body_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    path: Option<PathBuf>,
    max_expiry: Option<u64>,
    cleanup: Option<u64>,
    add_status_header: Option<bool>,
    consider_url_query: Option<bool>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}
