//! Application configuration.

use crate::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tradepipe_core::{OrderType, Portfolio, Security, SecurityId, Side};
use tradepipe_emulation::EmulationConfig;

/// History input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// JSON-lines history file, one record per line.
    pub path: String,
}

/// Account the back-test trades on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioConfig {
    pub name: String,
    #[serde(default)]
    pub board: Option<String>,
    /// Opening money balance.
    pub begin_value: Decimal,
}

impl PortfolioConfig {
    pub fn to_portfolio(&self) -> Portfolio {
        Portfolio {
            board: self.board.clone(),
            ..Portfolio::new(self.name.clone(), self.begin_value)
        }
    }
}

/// Time-frame candle series delivered through the external candle source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandleConfig {
    pub security: SecurityId,
    /// Time frame in seconds.
    pub time_frame_secs: u64,
}

/// Order submitted once the replay clock reaches `at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptedOrder {
    /// Submit time; orders without one are placed before the replay starts.
    #[serde(default)]
    pub at: Option<DateTime<Utc>>,
    pub security: SecurityId,
    pub portfolio: String,
    pub side: Side,
    #[serde(default)]
    pub order_type: OrderType,
    /// Limit price; ignored for market orders.
    #[serde(default)]
    pub price: Option<Decimal>,
    pub volume: Decimal,
}

/// Reporting settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Write the run statistics as JSON to this path.
    #[serde(default)]
    pub stats_path: Option<String>,
}

/// Back-test run description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub emulation: EmulationConfig,
    pub data: DataConfig,
    #[serde(default)]
    pub securities: Vec<Security>,
    #[serde(default)]
    pub portfolios: Vec<PortfolioConfig>,
    #[serde(default)]
    pub candles: Vec<CandleConfig>,
    #[serde(default)]
    pub orders: Vec<ScriptedOrder>,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    /// Wall-clock limit for the whole run (seconds). Default: 300.
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
}

fn default_run_timeout_secs() -> u64 {
    300
}

impl AppConfig {
    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        self.emulation.validate()?;
        // Requests are timestamped with the replay clock, which is unset
        // until a start time is known.
        if self.emulation.start_time.is_none() && self.orders.iter().any(|o| o.at.is_none()) {
            return Err(AppError::Config(
                "orders without `at` need emulation.start_time".to_string(),
            ));
        }
        for order in &self.orders {
            if order.volume <= Decimal::ZERO {
                return Err(AppError::Config(format!(
                    "order on {} has non-positive volume {}",
                    order.security, order.volume
                )));
            }
            if order.order_type == OrderType::Limit && order.price.is_none() {
                return Err(AppError::Config(format!(
                    "limit order on {} has no price",
                    order.security
                )));
            }
            if !self
                .portfolios
                .iter()
                .any(|p| p.name.eq_ignore_ascii_case(&order.portfolio))
            {
                return Err(AppError::Config(format!(
                    "order references unknown portfolio {}",
                    order.portfolio
                )));
            }
        }
        Ok(())
    }
}
