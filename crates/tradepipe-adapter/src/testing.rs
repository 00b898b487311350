//! Mock collaborators for adapter tests.
//!
//! `MockAdapter` records every inbound message and can answer through a
//! responder, either immediately or deferred until `flush()`.

use crate::adapter::{AdapterRoles, MessageAdapter, OutHandler, SharedAdapter};
use crate::commission::CommissionCalculator;
use crate::error::{AdapterError, AdapterResult};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tradepipe_core::{
    AdapterId, ExecutionMessage, Message, MessageType, Observers, SubscriptionId,
};

/// Produces replies for an inbound message.
pub type Responder = Arc<dyn Fn(&Message) -> Vec<Message> + Send + Sync>;

/// Recording adapter.
pub struct MockAdapter {
    id: AdapterId,
    name: String,
    roles: AdapterRoles,
    responder: Option<Responder>,
    received: Mutex<Vec<Message>>,
    out: Observers<Message>,
    deferred: AtomicBool,
    pending: Mutex<VecDeque<Message>>,
    failure: Mutex<Option<String>>,
    time: Mutex<DateTime<Utc>>,
    disposed: AtomicBool,
}

impl MockAdapter {
    pub fn new(name: impl Into<String>, roles: AdapterRoles) -> Arc<Self> {
        Arc::new(Self::build(name.into(), roles, None))
    }

    pub fn with_responder(
        name: impl Into<String>,
        roles: AdapterRoles,
        responder: impl Fn(&Message) -> Vec<Message> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self::build(name.into(), roles, Some(Arc::new(responder))))
    }

    fn build(name: String, roles: AdapterRoles, responder: Option<Responder>) -> Self {
        Self {
            id: AdapterId::next(),
            name,
            roles,
            responder,
            received: Mutex::new(Vec::new()),
            out: Observers::new(),
            deferred: AtomicBool::new(false),
            pending: Mutex::new(VecDeque::new()),
            failure: Mutex::new(None),
            time: Mutex::new(DateTime::<Utc>::default()),
            disposed: AtomicBool::new(false),
        }
    }

    /// Publish an outbound message.
    pub fn emit(&self, message: Message) {
        self.out.notify(message);
    }

    /// Hold responder replies until `flush()`.
    pub fn set_deferred(&self, deferred: bool) {
        self.deferred.store(deferred, Ordering::Release);
    }

    /// Publish held replies. Returns how many were published.
    pub fn flush(&self) -> usize {
        let mut count = 0;
        loop {
            let next = self.pending.lock().pop_front();
            match next {
                Some(message) => {
                    self.emit(message);
                    count += 1;
                }
                None => return count,
            }
        }
    }

    /// Make subsequent `send_in_message` calls fail.
    pub fn set_failure(&self, failure: Option<String>) {
        *self.failure.lock() = failure;
    }

    pub fn set_current_time(&self, time: DateTime<Utc>) {
        *self.time.lock() = time;
    }

    pub fn received(&self) -> Vec<Message> {
        self.received.lock().clone()
    }

    pub fn received_types(&self) -> Vec<MessageType> {
        self.received.lock().iter().map(Message::message_type).collect()
    }

    pub fn clear_received(&self) {
        self.received.lock().clear();
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.out.len()
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl MessageAdapter for MockAdapter {
    fn id(&self) -> AdapterId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn roles(&self) -> AdapterRoles {
        self.roles
    }

    fn send_in_message(&self, message: Message) -> AdapterResult<()> {
        if let Some(message) = self.failure.lock().clone() {
            return Err(AdapterError::Fault {
                adapter: self.name.clone(),
                message,
            });
        }

        let replies = self
            .responder
            .as_ref()
            .map(|respond| respond(&message))
            .unwrap_or_default();
        self.received.lock().push(message);

        if self.deferred.load(Ordering::Acquire) {
            self.pending.lock().extend(replies);
        } else {
            for reply in replies {
                self.emit(reply);
            }
        }
        Ok(())
    }

    fn subscribe(&self, handler: OutHandler) -> SubscriptionId {
        self.out.subscribe_handler(handler)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.out.unsubscribe(id)
    }

    fn current_time(&self) -> DateTime<Utc> {
        *self.time.lock()
    }

    fn fork(&self) -> AdapterResult<SharedAdapter> {
        Ok(Arc::new(Self::build(
            self.name.clone(),
            self.roles,
            self.responder.clone(),
        )))
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }
}

/// Calculator returning a fixed fee and counting calls.
#[derive(Debug)]
pub struct CountingCommissionCalculator {
    fee: Decimal,
    processed: AtomicUsize,
    computed: AtomicUsize,
    total: Mutex<Decimal>,
}

impl CountingCommissionCalculator {
    pub fn new(fee: Decimal) -> Self {
        Self {
            fee,
            processed: AtomicUsize::new(0),
            computed: AtomicUsize::new(0),
            total: Mutex::new(Decimal::ZERO),
        }
    }

    #[must_use]
    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn computed(&self) -> usize {
        self.computed.load(Ordering::Acquire)
    }
}

impl CommissionCalculator for CountingCommissionCalculator {
    fn process(&self, _message: &Message) {
        self.processed.fetch_add(1, Ordering::AcqRel);
    }

    fn commission(&self, _execution: &ExecutionMessage) -> Option<Decimal> {
        self.computed.fetch_add(1, Ordering::AcqRel);
        *self.total.lock() += self.fee;
        Some(self.fee)
    }

    fn reset(&self) {
        *self.total.lock() = Decimal::ZERO;
    }

    fn total(&self) -> Decimal {
        *self.total.lock()
    }

    fn fork(&self) -> Arc<dyn CommissionCalculator> {
        Arc::new(Self::new(self.fee))
    }
}
