//! Message adapter contract.

use crate::error::AdapterResult;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tradepipe_core::{AdapterId, Message, SubscriptionId};

/// Receives outbound messages.
pub type OutHandler = Arc<dyn Fn(Message) + Send + Sync>;

/// Shared adapter handle.
pub type SharedAdapter = Arc<dyn MessageAdapter>;

/// What kinds of traffic an adapter serves. A basket routes by role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AdapterRoles {
    pub transactions: bool,
    pub market_data: bool,
}

impl AdapterRoles {
    pub const TRANSACTIONS: Self = Self {
        transactions: true,
        market_data: false,
    };
    pub const MARKET_DATA: Self = Self {
        transactions: false,
        market_data: true,
    };
    pub const ALL: Self = Self {
        transactions: true,
        market_data: true,
    };

    #[must_use]
    pub fn union(self, other: Self) -> Self {
        Self {
            transactions: self.transactions || other.transactions,
            market_data: self.market_data || other.market_data,
        }
    }
}

/// Pipeline stage.
///
/// Outbound messages may be published from any thread; handlers must not
/// assume thread affinity.
pub trait MessageAdapter: Send + Sync {
    fn id(&self) -> AdapterId;

    fn name(&self) -> &str;

    fn roles(&self) -> AdapterRoles;

    /// Accept a command or control message.
    fn send_in_message(&self, message: Message) -> AdapterResult<()>;

    fn subscribe(&self, handler: OutHandler) -> SubscriptionId;

    fn unsubscribe(&self, id: SubscriptionId) -> bool;

    /// Adapter clock (wall clock live, replay clock in emulation).
    fn current_time(&self) -> DateTime<Utc>;

    /// Behaviourally independent copy sharing no mutable state.
    fn fork(&self) -> AdapterResult<SharedAdapter>;

    /// Release owned resources. Idempotent.
    fn dispose(&self);
}
