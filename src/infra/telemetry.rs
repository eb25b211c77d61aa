use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Register descriptions for every metric the cache emits. Idempotent.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "simplecache_hit_total",
            Unit::Count,
            "Requests answered from the response cache."
        );
        describe_counter!(
            "simplecache_miss_total",
            Unit::Count,
            "Cacheable requests forwarded to the next handler."
        );
        describe_counter!(
            "simplecache_bypass_total",
            Unit::Count,
            "Requests whose method never takes part in caching."
        );
        describe_counter!(
            "simplecache_store_error_total",
            Unit::Count,
            "Store reads or writes that failed, labelled by op."
        );
        describe_counter!(
            "simplecache_decode_error_total",
            Unit::Count,
            "Stored entries that could not be decoded."
        );
        describe_counter!(
            "simplecache_sweep_removed_total",
            Unit::Count,
            "Expired entries removed by reclamation."
        );
        describe_histogram!(
            "simplecache_sweep_ms",
            Unit::Milliseconds,
            "Duration of one reclamation pass in milliseconds."
        );
        describe_counter!(
            "simplecache_upstream_error_total",
            Unit::Count,
            "Requests the proxy could not complete against the upstream."
        );
    });
}
