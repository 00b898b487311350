//! Market data vocabulary: data types, subscription arguments and the
//! composite subscription key.

use crate::decimal::{Price, Volume};
use crate::ids::SecurityId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Candle construction rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandleKind {
    TimeFrame,
    Tick,
    Volume,
    Range,
    PnF,
    Renko,
}

/// Kind of market data a subscription asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Level1,
    MarketDepth,
    Trades,
    OrderLog,
    Candles(CandleKind),
}

impl DataType {
    #[must_use]
    pub fn is_candles(&self) -> bool {
        matches!(self, DataType::Candles(_))
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Level1 => write!(f, "level1"),
            DataType::MarketDepth => write!(f, "market_depth"),
            DataType::Trades => write!(f, "trades"),
            DataType::OrderLog => write!(f, "order_log"),
            DataType::Candles(kind) => write!(f, "candles:{kind:?}"),
        }
    }
}

/// Data-type specific argument (time frame, box size, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataArg {
    #[default]
    None,
    /// Time frame in seconds.
    TimeFrame(u64),
    Ticks(u64),
    Volume(Decimal),
    Range(Decimal),
    PnF {
        box_size: Decimal,
        reversal: u32,
    },
    Renko(Decimal),
}

impl fmt::Display for DataArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataArg::None => write!(f, "-"),
            DataArg::TimeFrame(secs) => write!(f, "{secs}s"),
            DataArg::Ticks(n) => write!(f, "{n}t"),
            DataArg::Volume(v) => write!(f, "v{v}"),
            DataArg::Range(r) => write!(f, "r{r}"),
            DataArg::PnF { box_size, reversal } => write!(f, "pnf{box_size}x{reversal}"),
            DataArg::Renko(b) => write!(f, "renko{b}"),
        }
    }
}

/// Composite key (security, data type, arg) used for history-source routing
/// and reference-counted upstream subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionKey {
    pub security_id: SecurityId,
    pub data_type: DataType,
    #[serde(default)]
    pub arg: DataArg,
}

impl SubscriptionKey {
    pub fn new(security_id: SecurityId, data_type: DataType, arg: DataArg) -> Self {
        Self {
            security_id,
            data_type,
            arg,
        }
    }

    /// Time-frame candles key.
    pub fn time_frame(security_id: SecurityId, secs: u64) -> Self {
        Self::new(
            security_id,
            DataType::Candles(CandleKind::TimeFrame),
            DataArg::TimeFrame(secs),
        )
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.security_id, self.data_type, self.arg)
    }
}

/// Level1 field identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level1Field {
    LastTradePrice,
    LastTradeVolume,
    BestBidPrice,
    BestAskPrice,
    ClosePrice,
}

impl Level1Field {
    #[must_use]
    pub fn is_price(&self) -> bool {
        !matches!(self, Level1Field::LastTradeVolume)
    }
}

/// Single order book level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub price: Price,
    pub volume: Volume,
}

impl Quote {
    pub fn new(price: Price, volume: Volume) -> Self {
        Self { price, volume }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_subscription_key_structural_equality() {
        let sec = SecurityId::new("AAPL", "NASDAQ");
        let a = SubscriptionKey::time_frame(sec.clone(), 60);
        let b = SubscriptionKey::time_frame(sec.clone(), 60);
        let c = SubscriptionKey::time_frame(sec, 300);

        let mut set = HashSet::new();
        set.insert(a.clone());
        assert!(set.contains(&b));
        assert!(!set.contains(&c));
        assert_eq!(a, b);
    }

    #[test]
    fn test_subscription_key_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            key: SubscriptionKey,
        }

        let toml_str = r#"
            [key]
            security_id = { code = "AAPL", board = "NASDAQ" }
            data_type = { candles = "time_frame" }
            arg = { time_frame = 60 }
        "#;
        let parsed: Wrapper = toml::from_str(toml_str).unwrap();
        assert_eq!(
            parsed.key,
            SubscriptionKey::time_frame(SecurityId::new("AAPL", "NASDAQ"), 60)
        );
    }
}
