//! Emulation configuration.

use crate::error::{EmulationError, EmulationResult};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tradepipe_adapter::AdapterChainBuilder;

/// Back-test run settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmulationConfig {
    /// Capacity of the "History Out" channel. Bounds how far history is read
    /// ahead of consumption. Default: 1000.
    #[serde(default = "default_max_message_count")]
    pub max_message_count: usize,
    /// Hand candles of tracked series straight to external candle
    /// subscribers instead of the regular message stream.
    #[serde(default)]
    pub use_external_candle_source: bool,
    /// First replayed timestamp (inclusive).
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    /// Last replayed timestamp (inclusive).
    #[serde(default)]
    pub stop_time: Option<DateTime<Utc>>,
    /// Replay clock tick interval (ms). Default: 10.
    #[serde(default = "default_market_time_interval_ms")]
    pub market_time_interval_ms: u64,
    /// Decorators wrapped around the market emulator, innermost first.
    #[serde(default)]
    pub transaction_chain: AdapterChainBuilder,
}

fn default_max_message_count() -> usize {
    1000
}

fn default_market_time_interval_ms() -> u64 {
    10
}

impl Default for EmulationConfig {
    fn default() -> Self {
        Self {
            max_message_count: default_max_message_count(),
            use_external_candle_source: false,
            start_time: None,
            stop_time: None,
            market_time_interval_ms: default_market_time_interval_ms(),
            transaction_chain: AdapterChainBuilder::default(),
        }
    }
}

impl EmulationConfig {
    pub fn market_time_interval(&self) -> TimeDelta {
        TimeDelta::milliseconds(self.market_time_interval_ms as i64)
    }

    pub fn validate(&self) -> EmulationResult<()> {
        if self.max_message_count == 0 {
            return Err(EmulationError::Config(
                "max_message_count must be positive".to_string(),
            ));
        }
        if self.market_time_interval_ms == 0 {
            return Err(EmulationError::Config(
                "market_time_interval_ms must be positive".to_string(),
            ));
        }
        if let (Some(start), Some(stop)) = (self.start_time, self.stop_time) {
            if start > stop {
                return Err(EmulationError::Config(format!(
                    "start_time {start} is after stop_time {stop}"
                )));
            }
        }
        Ok(())
    }
}
