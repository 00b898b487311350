//! Channel configuration.

use crate::channel::SharedChannel;
use crate::in_memory::InMemoryMessageChannel;
use crate::pass_through::PassThroughMessageChannel;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// What a bounded channel does when it is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackpressurePolicy {
    /// Sender waits for space.
    #[default]
    Block,
    /// Sender gets `ChannelError::Full`.
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    #[default]
    InMemory,
    PassThrough,
}

/// Channel settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub kind: ChannelKind,
    /// `None` means unbounded.
    #[serde(default)]
    pub max_message_count: Option<usize>,
    #[serde(default)]
    pub backpressure: BackpressurePolicy,
}

fn default_name() -> String {
    "channel".to_string()
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            kind: ChannelKind::default(),
            max_message_count: None,
            backpressure: BackpressurePolicy::default(),
        }
    }
}

impl ChannelConfig {
    /// Unbounded in-memory channel.
    pub fn unbounded(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Bounded in-memory channel that blocks senders when full.
    pub fn bounded(name: impl Into<String>, max_message_count: usize) -> Self {
        Self {
            name: name.into(),
            max_message_count: Some(max_message_count),
            ..Self::default()
        }
    }

    /// Instantiate a new closed channel.
    pub fn build(&self) -> SharedChannel {
        match self.kind {
            ChannelKind::InMemory => Arc::new(InMemoryMessageChannel::new(
                self.name.clone(),
                self.max_message_count,
                self.backpressure,
            )),
            ChannelKind::PassThrough => Arc::new(PassThroughMessageChannel::new(self.name.clone())),
        }
    }
}
