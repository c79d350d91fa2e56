//! Prometheus Metrics
//!
//! Installs the Prometheus recorder and describes every metric the tagging
//! services emit. The counters themselves are recorded where the work
//! happens, in `tagging-core` and the HTTP handlers.
//!
//! Metrics tracked:
//! - `tagging_registry_calls_total` - registry calls by operation and outcome
//! - `tagging_members_committed_total` - members committed locally by operation
//! - `tagging_inconsistent_writes_total` - store failures after registry success
//! - `tagging_bucket_read_errors_total` - bucket scans skipped during reads
//! - `tagging_sync_duration_seconds` - duration of add/remove calls
//! - `tagging_migration_tags_total` - migrated tags by outcome
//! - `tagging_http_requests_total` - API requests by route and status

use metrics::{counter, describe_counter, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// State containing the Prometheus handle for metrics export
#[derive(Clone)]
pub struct MetricsState {
    pub prometheus_handle: PrometheusHandle,
}

/// Install the Prometheus recorder and register metric descriptions.
pub fn init_metrics() -> Result<MetricsState, Box<dyn std::error::Error + Send + Sync>> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    register_metric_descriptions();

    Ok(MetricsState {
        prometheus_handle: handle,
    })
}

fn register_metric_descriptions() {
    // Registry synchronisation
    describe_counter!(
        "tagging_registry_calls_total",
        "Registry calls by operation and outcome"
    );
    describe_counter!(
        "tagging_members_committed_total",
        "Members committed to the bucketed store after registry confirmation"
    );
    describe_counter!(
        "tagging_inconsistent_writes_total",
        "Store writes that failed after the registry confirmed the members"
    );
    describe_histogram!(
        "tagging_sync_duration_seconds",
        "Duration of add and remove calls in seconds"
    );

    // Reads
    describe_counter!(
        "tagging_bucket_read_errors_total",
        "Bucket scans that failed and were skipped during a read"
    );

    // Migration
    describe_counter!(
        "tagging_migration_tags_total",
        "Legacy tags processed by migration, by outcome"
    );

    // API
    describe_counter!(
        "tagging_http_requests_total",
        "API requests by route and response status"
    );
}

/// Record one API request
pub fn record_request(route: &'static str, status: u16) {
    counter!(
        "tagging_http_requests_total",
        "route" => route,
        "status" => status.to_string()
    )
    .increment(1);
}
