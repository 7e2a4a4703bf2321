//! Prometheus metrics exposition
//!
//! The pool crate emits these through the `metrics` facade:
//!
//! - `relay_pool_acquire_total` (counter)
//! - `relay_pool_acquire_wait_seconds` (histogram)
//! - `relay_pool_node_disabled_total` (counter)
//! - `relay_pool_node_start_failures_total` (counter)
//! - `relay_pool_available_nodes` (gauge)

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

const ACQUIRE_WAIT_BUCKETS: &[f64] = &[0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0];

fn builder() -> PrometheusBuilder {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("relay_pool_acquire_wait_seconds".to_string()),
            ACQUIRE_WAIT_BUCKETS,
        )
        .expect("failed to set histogram buckets")
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// Acquire wait renders as a histogram; the top bucket covers several default
/// disable windows.
pub fn install_recorder() -> PrometheusHandle {
    builder()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Attach help text to the pool's metrics.
pub fn describe() {
    metrics::describe_counter!("relay_pool_acquire_total", "Nodes handed out by acquire");
    metrics::describe_histogram!(
        "relay_pool_acquire_wait_seconds",
        metrics::Unit::Seconds,
        "Time from acquire call to lease, including gate and disable waits"
    );
    metrics::describe_counter!(
        "relay_pool_node_disabled_total",
        "Times a node was disabled by a caller"
    );
    metrics::describe_counter!(
        "relay_pool_node_start_failures_total",
        "Relay processes that failed to start"
    );
    metrics::describe_gauge!(
        "relay_pool_available_nodes",
        "Nodes queued in the active and standby tiers"
    );
}
