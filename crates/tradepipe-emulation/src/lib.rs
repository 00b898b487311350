//! History emulation for tradepipe back-tests.
//!
//! `HistoryEmulationConnector` replays stored or user supplied market data
//! through a matching emulator and exposes the outcome as orders, positions
//! and portfolios:
//! - `HistoryMessageAdapter`: merges history streams in time order on a
//!   loader thread and drives the replay clock
//! - `EmulationMessageAdapter`: fills orders against replayed prices
//! - `StateMachine`: Stopped -> Starting -> Started -> ... -> Stopped

pub mod config;
pub mod connector;
pub mod emulation_adapter;
pub mod error;
pub mod history_adapter;
pub mod positions;
pub mod providers;
pub mod series;
pub mod state;
pub mod storage;
pub mod subscriptions;
pub mod transactions;

pub use config::EmulationConfig;
pub use connector::HistoryEmulationConnector;
pub use emulation_adapter::EmulationMessageAdapter;
pub use error::{EmulationError, EmulationResult};
pub use history_adapter::{HistoryMessageAdapter, ReplaySettings};
pub use positions::{PortfolioProvider, PositionProvider, PositionStore};
pub use providers::{CollectionSecurityProvider, EntityFactory, SecurityProvider};
pub use series::{
    unbounded_range, CandleBatch, CandleSeries, ExternalCandleSource, TimeRange,
};
pub use state::{StateChange, StateMachine, StateTransition};
pub use storage::{InMemoryStorage, MarketDataStorage, StorageCursor};
pub use subscriptions::{SubscriberChange, SubscriptionCounter};
pub use transactions::{OrderRequest, OrderTracker, TransactionProvider};
