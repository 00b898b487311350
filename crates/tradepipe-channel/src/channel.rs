//! Message channel contract.

use crate::error::{ChannelError, ChannelResult};
use std::sync::Arc;
use tradepipe_core::{Message, SubscriptionId};

/// Consumer-side callback receiving delivered messages.
pub type MessageHandler = Arc<dyn Fn(Message) + Send + Sync>;

/// Callback receiving consumer failures (handler panics).
pub type ErrorHandler = Arc<dyn Fn(Arc<ChannelError>) + Send + Sync>;

/// Shared channel handle.
pub type SharedChannel = Arc<dyn MessageChannel>;

/// Ordered message queue with an open/close lifecycle.
///
/// Messages sent into one channel reach its handlers in FIFO order. Handlers
/// may run on a thread other than the sender's.
pub trait MessageChannel: Send + Sync {
    fn name(&self) -> &str;

    fn is_opened(&self) -> bool;

    /// Start delivering. Opening an opened channel is a no-op.
    fn open(&self) -> ChannelResult<()>;

    /// Stop accepting messages. Already queued messages are still delivered.
    fn close(&self);

    /// Enqueue a message.
    ///
    /// Fails with `ChannelError::Closed` when the channel is not open, and
    /// with `ChannelError::Full` when a bounded channel rejects under
    /// backpressure.
    fn send_in_message(&self, message: Message) -> ChannelResult<()>;

    fn subscribe(&self, handler: MessageHandler) -> SubscriptionId;

    fn unsubscribe(&self, id: SubscriptionId) -> bool;

    fn subscribe_errors(&self, handler: ErrorHandler) -> SubscriptionId;

    /// Messages currently waiting for delivery.
    fn queue_len(&self) -> usize;

    /// Fresh, closed channel with the same configuration and no handlers.
    fn fork(&self) -> SharedChannel;

    /// Release resources. Closes the channel and drops its handlers.
    fn dispose(&self);
}
