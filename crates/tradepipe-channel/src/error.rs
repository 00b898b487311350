//! Channel error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Channel {name} is closed")]
    Closed { name: String },

    #[error("Channel {name} is full (capacity {capacity})")]
    Full { name: String, capacity: usize },

    #[error("Failed to spawn consumer for channel {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Handler panicked in channel {name}: {message}")]
    HandlerPanic { name: String, message: String },
}

pub type ChannelResult<T> = Result<T, ChannelError>;
