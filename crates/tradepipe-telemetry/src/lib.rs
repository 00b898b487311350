//! Prometheus metrics and structured logging for tradepipe.
//!
//! - Prometheus metrics for adapter throughput, errors, order latency and
//!   channel depth
//! - Structured logging with tracing (JSON in production)
//! - Run statistics summary for back-test reports

pub mod error;
pub mod logging;
pub mod metrics;
pub mod run_stats;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
pub use run_stats::{AdapterRunStats, RunStats, RunStatsReporter};
