//! Core domain types for the tradepipe message pipeline.
//!
//! This crate provides the vocabulary shared by every pipeline stage:
//! - `Message`: tagged union of commands, executions, market data and control messages
//! - `Price`, `Volume`: precision-safe numeric types
//! - `SecurityId`, `AdapterId`, `SubscriptionKey`: identifiers and composite keys
//! - `EmulationState`: back-test state enumeration with its legal transition table
//! - `Observers`: explicit observer list used in place of multicast events

pub mod clock;
pub mod decimal;
pub mod entities;
pub mod error;
pub mod ids;
pub mod market_data;
pub mod message;
pub mod observer;
pub mod order;
pub mod state;

pub use clock::{Clock, EmulationClock, SystemClock};
pub use decimal::{Price, Volume};
pub use entities::{Order, Portfolio, Position, PositionKey, Security};
pub use error::{CoreError, Result};
pub use ids::{AdapterId, IncrementalIdGenerator, SecurityId, SubscriptionId, TransactionId};
pub use market_data::{CandleKind, DataArg, DataType, Level1Field, Quote, SubscriptionKey};
pub use observer::{panic_message, Handler, Observers};
pub use order::{ExecutionType, OrderState, OrderType, Side};
pub use state::EmulationState;

// Message types
pub use message::{
    BoardMessage, CandleMessage, ConnectMessage, DisconnectMessage, ErrorMessage,
    ExecutionMessage, HistorySource, HistorySourceMessage, LastMessage, Level1ChangeMessage,
    MarketDataMessage, Message, MessageBody, MessageIter, MessageType, OrderCancelMessage,
    OrderPairReplaceMessage, OrderRegisterMessage, OrderReplaceMessage, PortfolioMessage,
    PositionChangeKind, PositionChangeMessage, QuoteChangeMessage, SecurityMessage,
};
