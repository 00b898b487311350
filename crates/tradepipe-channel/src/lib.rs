//! Message channels for the tradepipe adapter pipeline.
//!
//! A channel is an ordered queue with an open/close lifecycle and a consumer
//! that delivers queued messages to subscribed handlers:
//! - `InMemoryMessageChannel`: bounded or unbounded queue drained by a
//!   dedicated thread, with blocking or rejecting backpressure
//! - `PassThroughMessageChannel`: synchronous delivery on the sender's thread

pub mod channel;
pub mod config;
pub mod error;
pub mod in_memory;
pub mod pass_through;

pub use channel::{ErrorHandler, MessageChannel, MessageHandler, SharedChannel};
pub use config::{BackpressurePolicy, ChannelConfig, ChannelKind};
pub use error::{ChannelError, ChannelResult};
pub use in_memory::InMemoryMessageChannel;
pub use pass_through::PassThroughMessageChannel;
