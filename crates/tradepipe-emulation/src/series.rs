//! Candle series descriptors for the external candle source.

use crate::error::EmulationResult;
use chrono::{DateTime, Utc};
use std::fmt;
use std::ops::Range;
use tradepipe_core::{
    CandleKind, CandleMessage, DataArg, DataType, Handler, SecurityId, SubscriptionId,
    SubscriptionKey,
};

/// A candle series requested by a candle consumer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CandleSeries {
    pub security_id: SecurityId,
    pub kind: CandleKind,
    pub arg: DataArg,
}

impl CandleSeries {
    pub fn new(security_id: SecurityId, kind: CandleKind, arg: DataArg) -> Self {
        Self {
            security_id,
            kind,
            arg,
        }
    }

    pub fn time_frame(security_id: SecurityId, secs: u64) -> Self {
        Self::new(security_id, CandleKind::TimeFrame, DataArg::TimeFrame(secs))
    }

    /// (security, data type, arg) key shared with history sources.
    pub fn key(&self) -> SubscriptionKey {
        SubscriptionKey::new(
            self.security_id.clone(),
            DataType::Candles(self.kind),
            self.arg.clone(),
        )
    }

    #[must_use]
    pub fn matches(&self, candle: &CandleMessage) -> bool {
        candle.security_id == self.security_id && candle.kind == self.kind && candle.arg == self.arg
    }
}

impl fmt::Display for CandleSeries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// Time span with data available for a series.
pub type TimeRange = Range<DateTime<Utc>>;

/// Unrestricted range reported for series backed by a history source.
pub fn unbounded_range() -> TimeRange {
    DateTime::<Utc>::MIN_UTC..DateTime::<Utc>::MAX_UTC
}

/// Candles delivered for one series.
pub type CandleBatch = (CandleSeries, Vec<CandleMessage>);

/// Source that hands candles straight to a candle consumer.
pub trait ExternalCandleSource {
    /// Ranges with data for `series`; empty when nothing is available.
    fn supported_ranges(&self, series: &CandleSeries) -> Vec<TimeRange>;

    fn subscribe_candles(
        &self,
        series: &CandleSeries,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> EmulationResult<()>;

    fn unsubscribe_candles(&self, series: &CandleSeries) -> EmulationResult<()>;

    fn on_new_candles(&self, handler: Handler<CandleBatch>) -> SubscriptionId;

    /// Called with a series once its final candle was delivered.
    fn on_series_stopped(&self, handler: Handler<CandleSeries>) -> SubscriptionId;

    fn remove_new_candles_handler(&self, id: SubscriptionId) -> bool;

    fn remove_series_stopped_handler(&self, id: SubscriptionId) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tradepipe_core::{Price, Volume};

    #[test]
    fn test_key_and_match() {
        let sec = SecurityId::new("ES", "CME");
        let series = CandleSeries::time_frame(sec.clone(), 60);
        assert_eq!(series.key(), SubscriptionKey::time_frame(sec.clone(), 60));

        let mut candle = CandleMessage {
            security_id: sec,
            kind: CandleKind::TimeFrame,
            arg: DataArg::TimeFrame(60),
            open_time: DateTime::<Utc>::default(),
            close_time: DateTime::<Utc>::default(),
            open: Price::ZERO,
            high: Price::ZERO,
            low: Price::ZERO,
            close: Price::ZERO,
            total_volume: Volume::default(),
            is_finished: false,
        };
        assert!(series.matches(&candle));
        candle.arg = DataArg::TimeFrame(300);
        assert!(!series.matches(&candle));
    }
}
