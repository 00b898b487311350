//! Identifiers used across the pipeline.
//!
//! `SecurityId` is the composite `code@board` key, `AdapterId` is the
//! non-owning back-reference a basket stamps on routed messages.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Caller-assigned identifier correlating a command with its confirmation.
///
/// Zero means "not assigned".
pub type TransactionId = u64;

/// Board code used for money (portfolio currency) positions.
pub const MONEY_BOARD: &str = "MONEY";

/// Security identifier: instrument code plus trading board.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SecurityId {
    pub code: String,
    pub board: String,
}

impl SecurityId {
    pub fn new(code: impl Into<String>, board: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            board: board.into(),
        }
    }

    /// Pseudo-security tracking a portfolio's cash balance.
    pub fn money() -> Self {
        Self::new("MONEY", MONEY_BOARD)
    }

    #[must_use]
    pub fn is_money(&self) -> bool {
        self.board == MONEY_BOARD
    }
}

impl fmt::Display for SecurityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.code, self.board)
    }
}

impl FromStr for SecurityId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once('@') {
            Some((code, board)) if !code.is_empty() && !board.is_empty() => {
                Ok(Self::new(code, board))
            }
            _ => Err(CoreError::InvalidSecurityId(s.to_string())),
        }
    }
}

static NEXT_ADAPTER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique adapter identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AdapterId(u64);

impl AdapterId {
    /// Allocate a fresh id.
    pub fn next() -> Self {
        Self(NEXT_ADAPTER_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for AdapterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "adapter#{}", self.0)
    }
}

/// Handle returned when registering an observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

/// Monotonic id source starting at 1.
///
/// Each emulation run owns its own generator so repeated runs produce
/// identical transaction ids.
#[derive(Debug)]
pub struct IncrementalIdGenerator {
    next: AtomicU64,
}

impl IncrementalIdGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Restart numbering from 1.
    pub fn reset(&self) {
        self.next.store(1, Ordering::Relaxed);
    }
}

impl Default for IncrementalIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
