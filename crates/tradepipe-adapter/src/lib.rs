//! Message adapter pipeline for tradepipe.
//!
//! An adapter consumes inbound commands through `send_in_message` and
//! publishes outbound messages to subscribed handlers. Wrappers decorate an
//! inner adapter and see both directions:
//! - `CommissionMessageAdapter`: attaches a computed fee to executions once
//! - `LatencyMessageAdapter`: measures request to confirmation delay
//! - `ChannelMessageAdapter`: decouples both directions through channels
//! - `BasketMessageAdapter`: routes between several child adapters
//! - `AdapterChainBuilder`: re-instantiates a chain from recorded steps

pub mod adapter;
pub mod basket;
pub mod chain;
pub mod channel_adapter;
pub mod commission;
pub mod error;
pub mod latency;
pub mod testing;
pub mod wrapper;

pub use adapter::{AdapterRoles, MessageAdapter, OutHandler, SharedAdapter};
pub use basket::BasketMessageAdapter;
pub use chain::{AdapterChainBuilder, ChainStep};
pub use channel_adapter::ChannelMessageAdapter;
pub use commission::{
    CommissionCalculator, CommissionManager, CommissionMessageAdapter, CommissionRule,
};
pub use error::{AdapterError, AdapterResult, PendingOperation};
pub use latency::{LatencyManager, LatencyMessageAdapter};
pub use testing::{CountingCommissionCalculator, MockAdapter};
pub use wrapper::{InnerOutput, WrapperCore};
