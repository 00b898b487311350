//! Adapter error types.

use std::fmt;
use thiserror::Error;
use tradepipe_channel::ChannelError;
use tradepipe_core::{MessageType, TransactionId};

/// Which pending-request table a transaction id was recorded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PendingOperation {
    Register,
    Cancel,
}

impl PendingOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::Cancel => "cancel",
        }
    }
}

impl fmt::Display for PendingOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Transaction {transaction_id} already has a pending {operation} entry")]
    DuplicateTransaction {
        transaction_id: TransactionId,
        operation: PendingOperation,
    },

    #[error("Adapter {adapter} failed: {message}")]
    Fault { adapter: String, message: String },

    #[error("No child adapter accepts {kind} messages")]
    NoRoute { kind: MessageType },

    #[error("Adapter {0} is disposed")]
    Disposed(String),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
}

pub type AdapterResult<T> = Result<T, AdapterError>;
