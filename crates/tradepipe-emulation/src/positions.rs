//! Position and portfolio caches fed by position change messages.
//!
//! Entries are created lazily on first reference through `DashMap::entry`,
//! so concurrent get-or-insert for one key yields a single entry. Entries
//! live until `clear`.

use crate::providers::EntityFactory;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::trace;
use tradepipe_core::{
    Portfolio, Position, PositionChangeKind, PositionChangeMessage, PositionKey, Price,
};

/// Position lookup capability.
pub trait PositionProvider {
    fn position(&self, key: &PositionKey) -> Option<Position>;

    fn positions(&self) -> Vec<Position>;
}

/// Portfolio lookup capability.
pub trait PortfolioProvider {
    fn portfolio(&self, name: &str) -> Option<Portfolio>;

    fn portfolios(&self) -> Vec<Portfolio>;
}

#[derive(Debug, Default)]
pub struct PositionStore {
    positions: DashMap<PositionKey, Position>,
    portfolios: DashMap<String, Portfolio>,
}

impl PositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the portfolio entry for `name`.
    pub fn ensure_portfolio(&self, name: &str, factory: &EntityFactory) -> Portfolio {
        self.portfolios
            .entry(name.to_string())
            .or_insert_with(|| factory.create_portfolio(name))
            .clone()
    }

    /// Apply a position change. Money positions update the portfolio,
    /// everything else the (security, portfolio) position.
    pub fn apply(
        &self,
        change: &PositionChangeMessage,
        local_time: DateTime<Utc>,
        factory: &EntityFactory,
    ) {
        if change.security_id.is_money() {
            let mut portfolio = self
                .portfolios
                .entry(change.portfolio_name.clone())
                .or_insert_with(|| factory.create_portfolio(&change.portfolio_name));
            if let Some(begin) = change.get(PositionChangeKind::BeginValue) {
                portfolio.begin_value = begin;
            }
            if let Some(current) = change.get(PositionChangeKind::CurrentValue) {
                portfolio.current_value = current;
            }
            trace!(portfolio = %change.portfolio_name, current = %portfolio.current_value, "Portfolio updated");
            return;
        }

        let key = PositionKey::new(change.security_id.clone(), change.portfolio_name.clone());
        let mut position = self
            .positions
            .entry(key.clone())
            .or_insert_with(|| Position::new(key));

        for (kind, value) in &change.changes {
            match kind {
                PositionChangeKind::BeginValue => position.begin_value = *value,
                PositionChangeKind::CurrentValue => position.current_value = *value,
                PositionChangeKind::BlockedValue => position.blocked_value = *value,
                PositionChangeKind::AveragePrice => position.average_price = Some(Price::new(*value)),
                PositionChangeKind::RealizedPnL => position.realized_pnl = *value,
                PositionChangeKind::Commission => position.commission = *value,
            }
        }
        position.last_change_time = Some(local_time);
        trace!(
            security = %change.security_id,
            portfolio = %change.portfolio_name,
            current = %position.current_value,
            "Position updated"
        );
    }

    pub fn clear(&self) {
        self.positions.clear();
        self.portfolios.clear();
    }
}

impl PositionProvider for PositionStore {
    fn position(&self, key: &PositionKey) -> Option<Position> {
        self.positions.get(key).map(|p| p.clone())
    }

    fn positions(&self) -> Vec<Position> {
        let mut all: Vec<Position> = self.positions.iter().map(|p| p.clone()).collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        all
    }
}

impl PortfolioProvider for PositionStore {
    fn portfolio(&self, name: &str) -> Option<Portfolio> {
        self.portfolios.get(name).map(|p| p.clone())
    }

    fn portfolios(&self) -> Vec<Portfolio> {
        let mut all: Vec<Portfolio> = self.portfolios.iter().map(|p| p.clone()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }
}
