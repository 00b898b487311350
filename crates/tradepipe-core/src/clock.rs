//! Clock abstraction.
//!
//! Live adapters read wall-clock time, emulation adapters read the replay
//! clock advanced by the history driver.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

/// Time source.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Replay clock. Only moves forward.
#[derive(Debug)]
pub struct EmulationClock {
    micros: AtomicI64,
}

impl EmulationClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            micros: AtomicI64::new(start.timestamp_micros()),
        }
    }

    /// Advance to `time` unless the clock is already past it.
    pub fn advance_to(&self, time: DateTime<Utc>) {
        self.micros
            .fetch_max(time.timestamp_micros(), Ordering::AcqRel);
    }

    /// Rewind for a fresh run.
    pub fn reset(&self, time: DateTime<Utc>) {
        self.micros.store(time.timestamp_micros(), Ordering::Release);
    }
}

impl Default for EmulationClock {
    fn default() -> Self {
        Self::new(DateTime::<Utc>::default())
    }
}

impl Clock for EmulationClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_micros(self.micros.load(Ordering::Acquire)).unwrap_or_default()
    }
}
