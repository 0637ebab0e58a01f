//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Swap creation and status transitions
//! - Failed state-machine steps
//! - Step latency
//! - Swaps still in flight

use crate::swap::SwapStatus;

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, TextEncoder,
};
use tracing::warn;

lazy_static! {
    pub static ref SWAPS_CREATED: CounterVec = register_counter_vec!(
        "htlc_swaps_created_total",
        "Total swaps initiated",
        &["network", "from", "to"]
    ).unwrap();

    pub static ref SWAP_TRANSITIONS: CounterVec = register_counter_vec!(
        "htlc_swap_transitions_total",
        "Total swap status transitions",
        &["from", "to"]
    ).unwrap();

    pub static ref SWAP_ACTION_ERRORS: CounterVec = register_counter_vec!(
        "htlc_swap_action_errors_total",
        "Total failed swap steps by status",
        &["status", "retryable"]
    ).unwrap();

    pub static ref SWAP_ACTION_LATENCY: HistogramVec = register_histogram_vec!(
        "htlc_swap_action_latency_seconds",
        "Latency of one swap step by status",
        &["status"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    ).unwrap();

    pub static ref ACTIVE_SWAPS: Gauge = register_gauge!(
        "htlc_active_swaps",
        "Swaps not yet in a terminal status"
    ).unwrap();
}

/// Prometheus text exposition of every registered metric
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

// Helper functions to record metrics

pub fn record_swap_created(network: &str, from: &str, to: &str) {
    SWAPS_CREATED.with_label_values(&[network, from, to]).inc();
}

pub fn record_transition(from: SwapStatus, to: SwapStatus) {
    SWAP_TRANSITIONS
        .with_label_values(&[from.as_str(), to.as_str()])
        .inc();
}

pub fn record_action_error(status: SwapStatus, retryable: bool) {
    SWAP_ACTION_ERRORS
        .with_label_values(&[status.as_str(), if retryable { "true" } else { "false" }])
        .inc();
}

pub fn record_action_latency(status: SwapStatus, latency_secs: f64) {
    SWAP_ACTION_LATENCY
        .with_label_values(&[status.as_str()])
        .observe(latency_secs);
}

pub fn record_active_swaps(count: usize) {
    ACTIVE_SWAPS.set(count as f64);
}
