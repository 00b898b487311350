//! Prometheus metrics for the tradepipe pipeline.
//!
//! Covers:
//! - Emulation state and state transitions
//! - Per-adapter message throughput and errors
//! - Order registration / cancellation latency
//! - Channel queue depth and rejected sends
//! - Accumulated commission
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. A registration failure
//! (e.g. duplicate metric names) is a fatal configuration error and only
//! happens during static initialization, never at runtime.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec,
    register_int_gauge, CounterVec, Gauge, GaugeVec, HistogramVec, IntGauge,
};

/// Current emulation state code (0=stopped .. 5=stopping).
pub static EMULATION_STATE: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "tradepipe_emulation_state",
        "Current emulation state (0=stopped,1=starting,2=started,3=suspending,4=suspended,5=stopping)"
    )
    .unwrap()
});

/// Emulation state transitions.
pub static STATE_TRANSITIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tradepipe_state_transitions_total",
        "Total emulation state transitions",
        &["from", "to"]
    )
    .unwrap()
});

/// Messages processed by an adapter.
pub static MESSAGES_PROCESSED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tradepipe_messages_processed_total",
        "Total messages processed per adapter and message kind",
        &["adapter", "kind"]
    )
    .unwrap()
});

/// Historical messages loaded by the replay driver.
pub static MESSAGES_LOADED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tradepipe_messages_loaded_total",
        "Total historical messages loaded",
        &["source"]
    )
    .unwrap()
});

/// Adapter faults and rejected messages.
pub static ADAPTER_ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tradepipe_adapter_errors_total",
        "Total adapter errors",
        &["adapter", "kind"]
    )
    .unwrap()
});

/// Order round-trip latency in milliseconds.
pub static ORDER_LATENCY_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "tradepipe_order_latency_ms",
        "Order request to confirmation latency in milliseconds",
        &["operation"],
        vec![0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 200.0, 500.0, 1000.0]
    )
    .unwrap()
});

/// Messages waiting in a channel.
pub static CHANNEL_QUEUE_DEPTH: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "tradepipe_channel_queue_depth",
        "Messages queued in a channel",
        &["channel"]
    )
    .unwrap()
});

/// Sends rejected by a full channel.
pub static CHANNEL_REJECTED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tradepipe_channel_rejected_total",
        "Total sends rejected because the channel was full or closed",
        &["channel", "reason"]
    )
    .unwrap()
});

/// Accumulated commission.
pub static COMMISSION_TOTAL: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "tradepipe_commission_total",
        "Commission accumulated by the commission manager"
    )
    .unwrap()
});

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    /// Set the current emulation state.
    pub fn emulation_state(code: i64) {
        EMULATION_STATE.set(code);
    }

    /// Record an emulation state transition.
    pub fn state_transition(from: &str, to: &str) {
        STATE_TRANSITIONS_TOTAL.with_label_values(&[from, to]).inc();
    }

    /// Record a message processed by an adapter.
    pub fn message_processed(adapter: &str, kind: &str) {
        MESSAGES_PROCESSED_TOTAL
            .with_label_values(&[adapter, kind])
            .inc();
    }

    /// Record a historical message loaded.
    pub fn message_loaded(source: &str) {
        MESSAGES_LOADED_TOTAL.with_label_values(&[source]).inc();
    }

    /// Record an adapter error.
    pub fn adapter_error(adapter: &str, kind: &str) {
        ADAPTER_ERRORS_TOTAL.with_label_values(&[adapter, kind]).inc();
    }

    /// Record order latency (`operation` is "register" or "cancel").
    pub fn order_latency(operation: &str, latency_ms: f64) {
        ORDER_LATENCY_MS
            .with_label_values(&[operation])
            .observe(latency_ms);
    }

    /// Set channel queue depth.
    pub fn channel_depth(channel: &str, depth: usize) {
        CHANNEL_QUEUE_DEPTH
            .with_label_values(&[channel])
            .set(depth as f64);
    }

    /// Record a rejected channel send.
    pub fn channel_rejected(channel: &str, reason: &str) {
        CHANNEL_REJECTED_TOTAL
            .with_label_values(&[channel, reason])
            .inc();
    }

    /// Set accumulated commission.
    pub fn commission_total(value: f64) {
        COMMISSION_TOTAL.set(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_counter_increments() {
        let before = MESSAGES_PROCESSED_TOTAL
            .with_label_values(&["test-adapter", "execution"])
            .get();
        Metrics::message_processed("test-adapter", "execution");
        let after = MESSAGES_PROCESSED_TOTAL
            .with_label_values(&["test-adapter", "execution"])
            .get();
        assert_eq!(after - before, 1.0);
    }

    #[test]
    fn test_channel_depth_gauge() {
        Metrics::channel_depth("test-channel", 7);
        assert_eq!(
            CHANNEL_QUEUE_DEPTH
                .with_label_values(&["test-channel"])
                .get(),
            7.0
        );
    }
}
