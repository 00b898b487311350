//! Mutable trading entities tracked by a connector.
//!
//! Entities are created lazily on first reference and live as long as the
//! connector that owns them.

use crate::decimal::{Price, Volume};
use crate::ids::{SecurityId, TransactionId};
use crate::order::{OrderState, OrderType, Side};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Tradable instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Security {
    pub id: SecurityId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_step")]
    pub price_step: Price,
    #[serde(default = "default_volume_step")]
    pub volume_step: Volume,
}

fn default_step() -> Price {
    Price::new(Decimal::new(1, 2))
}

fn default_volume_step() -> Volume {
    Volume::new(Decimal::ONE)
}

impl Security {
    pub fn new(id: SecurityId) -> Self {
        Self {
            id,
            name: None,
            price_step: default_step(),
            volume_step: default_volume_step(),
        }
    }
}

/// Trading account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    pub name: String,
    #[serde(default)]
    pub board: Option<String>,
    /// Opening balance.
    #[serde(default)]
    pub begin_value: Decimal,
    #[serde(default)]
    pub current_value: Decimal,
}

impl Portfolio {
    pub fn new(name: impl Into<String>, begin_value: Decimal) -> Self {
        Self {
            name: name.into(),
            board: None,
            begin_value,
            current_value: begin_value,
        }
    }
}

/// Identity of a position: (security, portfolio).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PositionKey {
    pub security_id: SecurityId,
    pub portfolio_name: String,
}

impl PositionKey {
    pub fn new(security_id: SecurityId, portfolio_name: impl Into<String>) -> Self {
        Self {
            security_id,
            portfolio_name: portfolio_name.into(),
        }
    }
}

/// Holding of one security in one portfolio.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub key: PositionKey,
    pub begin_value: Decimal,
    pub current_value: Decimal,
    pub blocked_value: Decimal,
    pub average_price: Option<Price>,
    pub realized_pnl: Decimal,
    pub commission: Decimal,
    pub last_change_time: Option<DateTime<Utc>>,
}

impl Position {
    pub fn new(key: PositionKey) -> Self {
        Self {
            key,
            begin_value: Decimal::ZERO,
            current_value: Decimal::ZERO,
            blocked_value: Decimal::ZERO,
            average_price: None,
            realized_pnl: Decimal::ZERO,
            commission: Decimal::ZERO,
            last_change_time: None,
        }
    }

    #[must_use]
    pub fn is_flat(&self) -> bool {
        self.current_value.is_zero()
    }
}

/// Order snapshot maintained from commands and execution reports.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub transaction_id: TransactionId,
    pub security_id: SecurityId,
    pub portfolio_name: String,
    pub side: Side,
    pub order_type: OrderType,
    pub price: Price,
    pub volume: Volume,
    pub balance: Volume,
    pub state: OrderState,
    pub order_id: Option<u64>,
    pub commission: Decimal,
    pub latency_registration: Option<chrono::TimeDelta>,
    pub latency_cancellation: Option<chrono::TimeDelta>,
    pub last_change_time: Option<DateTime<Utc>>,
}

impl Order {
    #[must_use]
    pub fn filled_volume(&self) -> Volume {
        self.volume - self.balance
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self.state, OrderState::Pending | OrderState::Active)
    }
}
