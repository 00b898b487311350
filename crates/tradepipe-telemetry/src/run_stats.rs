//! Back-test run statistics.
//!
//! Summarises what the metrics registry recorded during a run:
//! - messages processed and errors per adapter
//! - order latency distribution (P50/P95/P99) for register and cancel

use crate::metrics::{ADAPTER_ERRORS_TOTAL, MESSAGES_PROCESSED_TOTAL, ORDER_LATENCY_MS};
use chrono::{DateTime, Utc};
use prometheus::core::Collector;
use serde::Serialize;
use tracing::info;

/// Per-adapter counters.
#[derive(Debug, Clone, Serialize)]
pub struct AdapterRunStats {
    pub adapter: String,
    pub messages_processed: u64,
    pub errors: u64,
}

/// Whole-run statistics.
#[derive(Debug, Clone, Serialize)]
pub struct RunStats {
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: i64,
    pub adapters: Vec<AdapterRunStats>,
    pub register_latency_ms: (f64, f64, f64),
    pub cancel_latency_ms: (f64, f64, f64),
}

/// Collects run statistics for a fixed set of adapters.
pub struct RunStatsReporter {
    adapters: Vec<String>,
    start_time: DateTime<Utc>,
}

impl RunStatsReporter {
    pub fn new(adapters: Vec<String>) -> Self {
        Self {
            adapters,
            start_time: Utc::now(),
        }
    }

    pub fn get_stats(&self) -> RunStats {
        let adapters = self
            .adapters
            .iter()
            .map(|name| AdapterRunStats {
                adapter: name.clone(),
                messages_processed: sum_counter(&MESSAGES_PROCESSED_TOTAL, name),
                errors: sum_counter(&ADAPTER_ERRORS_TOTAL, name),
            })
            .collect();

        RunStats {
            started_at: self.start_time,
            elapsed_ms: (Utc::now() - self.start_time).num_milliseconds(),
            adapters,
            register_latency_ms: histogram_percentiles(&ORDER_LATENCY_MS, "register"),
            cancel_latency_ms: histogram_percentiles(&ORDER_LATENCY_MS, "cancel"),
        }
    }

    /// Log the run summary.
    pub fn output_summary(&self) {
        let stats = self.get_stats();

        info!("========== Back-test Run Summary ==========");
        info!(
            "Started: {} (elapsed {} ms)",
            stats.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
            stats.elapsed_ms
        );
        for a in &stats.adapters {
            info!(
                "  {}: processed={} errors={}",
                a.adapter, a.messages_processed, a.errors
            );
        }
        let (r50, r95, r99) = stats.register_latency_ms;
        info!("  Register latency (ms): P50={r50:.1}, P95={r95:.1}, P99={r99:.1}");
        let (c50, c95, c99) = stats.cancel_latency_ms;
        info!("  Cancel latency (ms): P50={c50:.1}, P95={c95:.1}, P99={c99:.1}");
        info!("===========================================");
    }

    pub fn to_json(&self) -> crate::TelemetryResult<String> {
        Ok(serde_json::to_string_pretty(&self.get_stats())?)
    }
}

/// Sum a counter over every label set whose first label is `first`.
fn sum_counter(counter: &prometheus::CounterVec, first: &str) -> u64 {
    let mut total = 0.0;
    for mf in counter.collect() {
        for m in mf.get_metric() {
            let labels = m.get_label();
            if labels.first().map(|l| l.get_value()) == Some(first) {
                total += m.get_counter().get_value();
            }
        }
    }
    total as u64
}

/// (p50, p95, p99) for the single-label histogram series `label`.
fn histogram_percentiles(histogram: &prometheus::HistogramVec, label: &str) -> (f64, f64, f64) {
    for mf in histogram.collect() {
        for m in mf.get_metric() {
            let labels = m.get_label();
            if labels.len() != 1 || labels[0].get_value() != label {
                continue;
            }

            let h = m.get_histogram();
            let count = h.get_sample_count();
            if count == 0 {
                return (0.0, 0.0, 0.0);
            }
            let buckets = h.get_bucket();
            return (
                percentile_from_buckets(buckets, count, 0.50),
                percentile_from_buckets(buckets, count, 0.95),
                percentile_from_buckets(buckets, count, 0.99),
            );
        }
    }
    (0.0, 0.0, 0.0)
}

/// Linear interpolation within the bucket holding the target rank.
fn percentile_from_buckets(
    buckets: &[prometheus::proto::Bucket],
    total_count: u64,
    percentile: f64,
) -> f64 {
    let target = (total_count as f64 * percentile) as u64;
    let mut prev_bound = 0.0;
    let mut prev_count = 0u64;

    for bucket in buckets {
        let upper_bound = bucket.get_upper_bound();
        let cumulative_count = bucket.get_cumulative_count();

        if cumulative_count >= target {
            let bucket_count = cumulative_count - prev_count;
            if bucket_count == 0 {
                return upper_bound;
            }
            let position = (target - prev_count) as f64 / bucket_count as f64;
            return prev_bound + position * (upper_bound - prev_bound);
        }

        prev_bound = upper_bound;
        prev_count = cumulative_count;
    }

    buckets.last().map(|b| b.get_upper_bound()).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Metrics;

    #[test]
    fn test_adapter_counts_are_summed_across_kinds() {
        Metrics::message_processed("stats-test", "execution");
        Metrics::message_processed("stats-test", "candle");
        Metrics::adapter_error("stats-test", "fault");

        let reporter = RunStatsReporter::new(vec!["stats-test".to_string()]);
        let stats = reporter.get_stats();
        assert!(stats.adapters[0].messages_processed >= 2);
        assert!(stats.adapters[0].errors >= 1);
    }

    #[test]
    fn test_unknown_adapter_reports_zero() {
        let reporter = RunStatsReporter::new(vec!["never-used".to_string()]);
        let stats = reporter.get_stats();
        assert_eq!(stats.adapters[0].messages_processed, 0);
        assert!(reporter.to_json().is_ok());
    }
}
