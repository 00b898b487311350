//! Emulation error types.

use thiserror::Error;
use tradepipe_adapter::AdapterError;
use tradepipe_core::{EmulationState, SubscriptionKey};

#[derive(Debug, Error)]
pub enum EmulationError {
    #[error("Illegal emulation state change {from} -> {to}")]
    InvalidStateTransition {
        from: EmulationState,
        to: EmulationState,
    },

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error("Storage error for {key}: {message}")]
    Storage {
        key: SubscriptionKey,
        message: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type EmulationResult<T> = Result<T, EmulationError>;
