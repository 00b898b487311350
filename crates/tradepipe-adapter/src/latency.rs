//! Order latency measurement.
//!
//! `LatencyManager` records when a register or cancel request left and
//! measures the delay until its confirmation. Both pending tables live under
//! one mutex so a register/cancel/lookup/remove for an id is atomic.
//!
//! # Semantics
//!
//! - `OrderRegister` inserts into the register table
//! - `OrderReplace` inserts its transaction id into both tables
//! - `OrderPairReplace` applies replace to each leg, all-or-nothing
//! - `OrderCancel` inserts into the cancel table
//! - An order execution (not `Pending`) consumes the register entry first,
//!   then the cancel entry; `Failed` consumes without measuring
//! - An unmatched confirmation yields nothing

use crate::adapter::{AdapterRoles, MessageAdapter, OutHandler, SharedAdapter};
use crate::error::{AdapterError, AdapterResult, PendingOperation};
use crate::wrapper::{InnerOutput, WrapperCore};
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{trace, warn};
use tradepipe_core::{
    AdapterId, ExecutionType, Message, MessageBody, OrderReplaceMessage, OrderState,
    SubscriptionId, TransactionId,
};
use tradepipe_telemetry::Metrics;

#[derive(Debug, Default)]
struct LatencyState {
    register: HashMap<TransactionId, DateTime<Utc>>,
    cancel: HashMap<TransactionId, DateTime<Utc>>,
    latency_registration: TimeDelta,
    latency_cancellation: TimeDelta,
}

impl LatencyState {
    fn table(&self, operation: PendingOperation) -> &HashMap<TransactionId, DateTime<Utc>> {
        match operation {
            PendingOperation::Register => &self.register,
            PendingOperation::Cancel => &self.cancel,
        }
    }

    fn table_mut(
        &mut self,
        operation: PendingOperation,
    ) -> &mut HashMap<TransactionId, DateTime<Utc>> {
        match operation {
            PendingOperation::Register => &mut self.register,
            PendingOperation::Cancel => &mut self.cancel,
        }
    }
}

/// Per-transaction latency tracker.
#[derive(Debug, Default)]
pub struct LatencyManager {
    state: Mutex<LatencyState>,
}

impl LatencyManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request or measure a confirmation.
    ///
    /// Returns the measured latency for a matched, non-failed order
    /// execution. Fails with `InvalidArgument` for a zero transaction id or
    /// an unset local time, and with `DuplicateTransaction` if the id already
    /// has a pending entry; in both cases nothing is recorded.
    pub fn process_message(&self, message: &Message) -> AdapterResult<Option<TimeDelta>> {
        let local_time = message.local_time;
        match &message.body {
            MessageBody::Reset => {
                self.reset();
                Ok(None)
            }
            MessageBody::OrderRegister(m) => {
                self.insert(&[(PendingOperation::Register, m.transaction_id)], local_time)?;
                Ok(None)
            }
            MessageBody::OrderReplace(m) => {
                self.insert(&replace_plan(m), local_time)?;
                Ok(None)
            }
            MessageBody::OrderPairReplace(m) => {
                let mut plan = replace_plan(&m.message1).to_vec();
                plan.extend_from_slice(&replace_plan(&m.message2));
                self.insert(&plan, local_time)?;
                Ok(None)
            }
            MessageBody::OrderCancel(m) => {
                self.insert(&[(PendingOperation::Cancel, m.transaction_id)], local_time)?;
                Ok(None)
            }
            MessageBody::Execution(m) if m.execution_type == ExecutionType::Order => {
                if m.order_state == Some(OrderState::Pending) {
                    return Ok(None);
                }
                Ok(self.confirm(
                    m.original_transaction_id,
                    local_time,
                    m.order_state == Some(OrderState::Failed),
                ))
            }
            _ => Ok(None),
        }
    }

    /// Validate every planned entry, then insert all of them.
    fn insert(
        &self,
        plan: &[(PendingOperation, TransactionId)],
        local_time: DateTime<Utc>,
    ) -> AdapterResult<()> {
        if local_time == DateTime::<Utc>::default() {
            return Err(AdapterError::InvalidArgument(
                "local time is not set".to_string(),
            ));
        }

        let mut state = self.state.lock();
        for (i, &(operation, transaction_id)) in plan.iter().enumerate() {
            if transaction_id == 0 {
                return Err(AdapterError::InvalidArgument(
                    "transaction id must be non-zero".to_string(),
                ));
            }
            let repeated_in_plan = plan[..i].contains(&(operation, transaction_id));
            if repeated_in_plan || state.table(operation).contains_key(&transaction_id) {
                return Err(AdapterError::DuplicateTransaction {
                    transaction_id,
                    operation,
                });
            }
        }

        for &(operation, transaction_id) in plan {
            state.table_mut(operation).insert(transaction_id, local_time);
            trace!(transaction_id, %operation, "Pending request recorded");
        }
        Ok(())
    }

    fn confirm(
        &self,
        transaction_id: TransactionId,
        local_time: DateTime<Utc>,
        failed: bool,
    ) -> Option<TimeDelta> {
        let mut state = self.state.lock();

        let (operation, sent_at) = if let Some(t) = state.register.remove(&transaction_id) {
            (PendingOperation::Register, t)
        } else if let Some(t) = state.cancel.remove(&transaction_id) {
            (PendingOperation::Cancel, t)
        } else {
            trace!(transaction_id, "Unmatched confirmation ignored");
            return None;
        };

        if failed {
            return None;
        }

        let latency = local_time - sent_at;
        match operation {
            PendingOperation::Register => state.latency_registration += latency,
            PendingOperation::Cancel => state.latency_cancellation += latency,
        }
        drop(state);

        let ms = latency.num_microseconds().unwrap_or(i64::MAX) as f64 / 1000.0;
        Metrics::order_latency(operation.as_str(), ms);
        Some(latency)
    }

    /// Clear both tables and the aggregates.
    pub fn reset(&self) {
        *self.state.lock() = LatencyState::default();
    }

    /// Sum of measured registration latencies.
    #[must_use]
    pub fn latency_registration(&self) -> TimeDelta {
        self.state.lock().latency_registration
    }

    /// Sum of measured cancellation latencies.
    #[must_use]
    pub fn latency_cancellation(&self) -> TimeDelta {
        self.state.lock().latency_cancellation
    }

    /// Number of pending (register, cancel) entries.
    #[must_use]
    pub fn pending_counts(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.register.len(), state.cancel.len())
    }
}

fn replace_plan(m: &OrderReplaceMessage) -> [(PendingOperation, TransactionId); 2] {
    [
        (PendingOperation::Cancel, m.transaction_id),
        (PendingOperation::Register, m.transaction_id),
    ]
}

// ============================================================================
// Adapter
// ============================================================================

/// Wrapper stamping inbound times and attaching measured latency to order
/// executions.
pub struct LatencyMessageAdapter {
    core: WrapperCore,
    manager: Arc<LatencyManager>,
}

impl LatencyMessageAdapter {
    pub fn new(inner: SharedAdapter, manager: Arc<LatencyManager>) -> Arc<Self> {
        let name = format!("latency({})", inner.name());
        let adapter = Arc::new(Self {
            core: WrapperCore::new(name, inner),
            manager,
        });
        adapter.core.attach(&adapter);
        adapter
    }

    pub fn latency_manager(&self) -> &Arc<LatencyManager> {
        &self.manager
    }
}

impl InnerOutput for LatencyMessageAdapter {
    fn on_inner_message(&self, mut message: Message) {
        let is_order_report = message
            .as_execution()
            .is_some_and(|e| e.execution_type == ExecutionType::Order);

        if is_order_report {
            if !message.has_local_time() {
                message.local_time = self.core.inner().current_time();
            }
            match self.manager.process_message(&message) {
                Ok(Some(latency)) => {
                    if let Some(execution) = message.as_execution_mut() {
                        if execution.latency.is_none() {
                            execution.latency = Some(latency);
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(adapter = %self.core.name(), error = %e, "Latency measurement failed");
                }
            }
        }
        self.core.emit(message);
    }
}

impl MessageAdapter for LatencyMessageAdapter {
    fn id(&self) -> AdapterId {
        self.core.id()
    }

    fn name(&self) -> &str {
        self.core.name()
    }

    fn roles(&self) -> AdapterRoles {
        self.core.inner().roles()
    }

    fn send_in_message(&self, mut message: Message) -> AdapterResult<()> {
        if self.core.is_disposed() {
            return Err(AdapterError::Disposed(self.core.name().to_string()));
        }
        if !message.has_local_time() {
            message.local_time = self.core.inner().current_time();
        }
        self.manager.process_message(&message)?;
        self.core.inner().send_in_message(message)
    }

    fn subscribe(&self, handler: OutHandler) -> SubscriptionId {
        self.core.subscribe(handler)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.core.unsubscribe(id)
    }

    fn current_time(&self) -> DateTime<Utc> {
        self.core.inner().current_time()
    }

    fn fork(&self) -> AdapterResult<SharedAdapter> {
        let inner = self.core.inner().fork()?;
        Ok(Self::new(inner, Arc::new(LatencyManager::new())))
    }

    fn dispose(&self) {
        self.core.dispose();
    }
}
