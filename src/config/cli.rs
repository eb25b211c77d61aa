use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the simplecache binary.
#[derive(Debug, Parser)]
#[command(name = "simplecache", version, about = "Disk-backed caching reverse proxy")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "SIMPLECACHE_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the caching proxy in front of the configured upstream.
    Serve(Box<ServeArgs>),
    /// Remove expired entries from the cache directory once and exit.
    Sweep(SweepArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct SweepArgs {
    #[command(flatten)]
    pub cache: CacheOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CacheOverrides {
    /// Override the cache storage directory.
    #[arg(long = "cache-path", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub path: Option<PathBuf>,

    /// Override the maximum entry lifetime in seconds (must exceed 1).
    #[arg(long = "cache-max-expiry", value_name = "SECONDS")]
    pub max_expiry: Option<u64>,

    /// Override the reclamation interval in seconds (must exceed 1).
    #[arg(long = "cache-cleanup", value_name = "SECONDS")]
    pub cleanup: Option<u64>,

    /// Toggle the `Cache-Status` response header.
    #[arg(
        long = "cache-status-header",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub add_status_header: Option<bool>,

    /// Toggle inclusion of the URL query string in cache keys.
    #[arg(
        long = "cache-consider-url-query",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub consider_url_query: Option<bool>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub cache: CacheOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the upstream origin URL.
    #[arg(long = "upstream-url", value_name = "URL", value_hint = ValueHint::Url)]
    pub upstream_url: Option<String>,

    /// Override the upstream request timeout.
    #[arg(long = "upstream-timeout-seconds", value_name = "SECONDS")]
    pub upstream_timeout_seconds: Option<u64>,

    /// Override the maximum request body forwarded upstream, in bytes.
    #[arg(long = "upstream-max-body-bytes", value_name = "BYTES")]
    pub upstream_max_body_bytes: Option<u64>,
}
