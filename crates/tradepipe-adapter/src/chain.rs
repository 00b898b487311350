//! Adapter chain builder.
//!
//! Records the decorator steps of a chain so an equivalent fresh chain can be
//! instantiated around any inner adapter, instead of deep-cloning a live
//! chain and its owned channels. The first step wraps the inner adapter
//! directly; the last step is outermost.

use crate::adapter::{MessageAdapter, SharedAdapter};
use crate::channel_adapter::ChannelMessageAdapter;
use crate::commission::{CommissionManager, CommissionMessageAdapter, CommissionRule};
use crate::error::AdapterResult;
use crate::latency::{LatencyManager, LatencyMessageAdapter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use tradepipe_channel::ChannelConfig;

/// One decorator in a chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChainStep {
    Commission {
        #[serde(default)]
        rules: Vec<CommissionRule>,
    },
    Latency,
    Channel {
        #[serde(default = "default_input")]
        input: ChannelConfig,
        #[serde(default = "default_output")]
        output: ChannelConfig,
    },
}

fn default_input() -> ChannelConfig {
    ChannelConfig::unbounded("In")
}

fn default_output() -> ChannelConfig {
    ChannelConfig::unbounded("Out")
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AdapterChainBuilder {
    steps: Vec<ChainStep>,
}

impl AdapterChainBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_steps(steps: Vec<ChainStep>) -> Self {
        Self { steps }
    }

    #[must_use]
    pub fn with(mut self, step: ChainStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn steps(&self) -> &[ChainStep] {
        &self.steps
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Wrap `inner` in a fresh instance of every recorded step.
    pub fn build(&self, inner: SharedAdapter) -> AdapterResult<SharedAdapter> {
        let mut adapter = inner;
        for step in &self.steps {
            let wrapped: SharedAdapter = match step {
                ChainStep::Commission { rules } => CommissionMessageAdapter::new(
                    adapter,
                    Arc::new(CommissionManager::new(rules.clone())),
                ),
                ChainStep::Latency => {
                    LatencyMessageAdapter::new(adapter, Arc::new(LatencyManager::new()))
                }
                ChainStep::Channel { input, output } => {
                    ChannelMessageAdapter::new(adapter, input.build(), output.build())
                }
            };
            adapter = wrapped;
        }
        debug!(adapter = %adapter.name(), steps = self.steps.len(), "Adapter chain built");
        Ok(adapter)
    }
}
