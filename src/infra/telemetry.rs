use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::application::mutation::{METRIC_MUTATION_COMMITTED, METRIC_MUTATION_ROLLED_BACK};
use crate::cache::{
    METRIC_CACHE_COALESCED, METRIC_CACHE_DISCARDED, METRIC_CACHE_FETCH, METRIC_CACHE_FETCH_SECONDS,
    METRIC_CACHE_HIT, METRIC_CACHE_INVALIDATED, METRIC_CACHE_MISS,
};
use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
///
/// Logs go to stderr so command output on stdout stays clean.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
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

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_CACHE_HIT,
            Unit::Count,
            "Reads answered from a fresh cache entry."
        );
        describe_counter!(
            METRIC_CACHE_MISS,
            Unit::Count,
            "Reads that found no entry or a stale one."
        );
        describe_counter!(
            METRIC_CACHE_COALESCED,
            Unit::Count,
            "Reads that joined a fetch already in flight."
        );
        describe_counter!(
            METRIC_CACHE_FETCH,
            Unit::Count,
            "Remote fetches issued by the query cache, by result."
        );
        describe_histogram!(
            METRIC_CACHE_FETCH_SECONDS,
            Unit::Seconds,
            "Remote fetch latency in seconds."
        );
        describe_counter!(
            METRIC_CACHE_DISCARDED,
            Unit::Count,
            "Fetch results dropped because the entry changed meanwhile."
        );
        describe_counter!(
            METRIC_CACHE_INVALIDATED,
            Unit::Count,
            "Cache entries marked stale by invalidation."
        );
        describe_counter!(
            METRIC_MUTATION_COMMITTED,
            Unit::Count,
            "Optimistic mutations confirmed by the server."
        );
        describe_counter!(
            METRIC_MUTATION_ROLLED_BACK,
            Unit::Count,
            "Optimistic mutations reverted after a server failure."
        );
    });
}
