//! Validated emulation state holder.
//!
//! The current state only changes through `transition`, which checks the
//! request against `EmulationState::can_transition_to` under a single lock.
//! Every committed change is appended to a history log, published on a
//! `tokio::sync::watch` channel and reported to observers. A panicking
//! observer does not undo the change; its failure is returned to the caller.

use crate::error::{EmulationError, EmulationResult};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::info;
use tradepipe_core::{EmulationState, Observers, SubscriptionId};
use tradepipe_telemetry::Metrics;

/// One committed state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub from: EmulationState,
    pub to: EmulationState,
}

/// Result of a committed change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub transition: StateTransition,
    /// Panic messages of observers that failed while being notified.
    pub observer_failures: Vec<String>,
}

pub struct StateMachine {
    state: Mutex<EmulationState>,
    history: Mutex<Vec<StateTransition>>,
    observers: Observers<StateTransition>,
    tx: watch::Sender<EmulationState>,
}

impl StateMachine {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(EmulationState::Stopped);
        Self {
            state: Mutex::new(EmulationState::Stopped),
            history: Mutex::new(Vec::new()),
            observers: Observers::new(),
            tx,
        }
    }

    #[must_use]
    pub fn state(&self) -> EmulationState {
        *self.state.lock()
    }

    /// Check a request without committing it.
    pub fn check(&self, to: EmulationState) -> EmulationResult<()> {
        let from = self.state();
        if from.can_transition_to(to) {
            Ok(())
        } else {
            Err(EmulationError::InvalidStateTransition { from, to })
        }
    }

    /// Move to `to`.
    ///
    /// Any request outside the transition table, re-entering the current
    /// state included, fails with `InvalidStateTransition` and leaves the
    /// state unchanged.
    pub fn transition(&self, to: EmulationState) -> EmulationResult<StateChange> {
        let transition = {
            let mut state = self.state.lock();
            let from = *state;
            if !from.can_transition_to(to) {
                return Err(EmulationError::InvalidStateTransition { from, to });
            }
            *state = to;
            let transition = StateTransition { from, to };
            self.history.lock().push(transition);
            self.tx.send_replace(to);
            transition
        };

        info!(from = %transition.from, to = %transition.to, "Emulation state changed");
        Metrics::state_transition(&transition.from.to_string(), &transition.to.to_string());
        Metrics::emulation_state(to.as_i64());

        let observer_failures = self.observers.try_notify(transition);
        Ok(StateChange {
            transition,
            observer_failures,
        })
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(StateTransition) + Send + Sync + 'static,
    {
        self.observers.subscribe(handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    /// Receiver for async callers awaiting a state.
    #[must_use]
    pub fn receiver(&self) -> watch::Receiver<EmulationState> {
        self.tx.subscribe()
    }

    /// All committed changes, oldest first.
    pub fn history(&self) -> Vec<StateTransition> {
        self.history.lock().clone()
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachine")
            .field("state", &self.state())
            .field("observers", &self.observers.len())
            .finish()
    }
}
