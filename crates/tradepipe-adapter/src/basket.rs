//! Composite adapter routing to and from several child adapters.
//!
//! Inbound routing:
//! - a message targeted at a child (`Message::adapter`) goes only to it
//! - connection and clock control (`Connect`, `Disconnect`, `Reset`, `Time`,
//!   `Clearing`, `Last`) go to every child
//! - order commands, portfolio, position and market data payloads go to
//!   transaction children
//! - subscription and replay control (`MarketData`, `HistorySource`,
//!   `EmulationState`) go to market data children
//!
//! Outbound messages are stamped with the producing child's id.

use crate::adapter::{AdapterRoles, MessageAdapter, OutHandler, SharedAdapter};
use crate::error::{AdapterError, AdapterResult};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};
use tradepipe_core::{AdapterId, Clock, Message, MessageBody, Observers, SubscriptionId};

struct Child {
    adapter: SharedAdapter,
    subscription: SubscriptionId,
}

pub struct BasketMessageAdapter {
    id: AdapterId,
    name: String,
    clock: Arc<dyn Clock>,
    children: RwLock<Vec<Child>>,
    out: Observers<Message>,
    disposed: AtomicBool,
}

/// Which children an untargeted message goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    All,
    Transactions,
    MarketData,
}

fn route_of(message: &Message) -> Route {
    match &message.body {
        MessageBody::Connect(_)
        | MessageBody::Disconnect(_)
        | MessageBody::Reset
        | MessageBody::Time
        | MessageBody::Clearing
        | MessageBody::Last(_)
        | MessageBody::Error(_) => Route::All,
        MessageBody::MarketData(_)
        | MessageBody::HistorySource(_)
        | MessageBody::EmulationState(_) => Route::MarketData,
        MessageBody::OrderRegister(_)
        | MessageBody::OrderReplace(_)
        | MessageBody::OrderPairReplace(_)
        | MessageBody::OrderCancel(_)
        | MessageBody::Execution(_)
        | MessageBody::Portfolio(_)
        | MessageBody::PositionChange(_)
        | MessageBody::Security(_)
        | MessageBody::Board(_)
        | MessageBody::Level1Change(_)
        | MessageBody::QuoteChange(_)
        | MessageBody::Candle(_) => Route::Transactions,
    }
}

impl BasketMessageAdapter {
    pub fn new(name: impl Into<String>, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            id: AdapterId::next(),
            name: name.into(),
            clock,
            children: RwLock::new(Vec::new()),
            out: Observers::new(),
            disposed: AtomicBool::new(false),
        })
    }

    /// Add a child and start relaying its output.
    pub fn add_child(self: &Arc<Self>, adapter: SharedAdapter) {
        let weak = Arc::downgrade(self);
        let child_id = adapter.id();
        let subscription = adapter.subscribe(Arc::new(move |mut message: Message| {
            if let Some(basket) = weak.upgrade() {
                message.adapter = Some(child_id);
                basket.out.notify(message);
            }
        }));
        debug!(basket = %self.name, child = %adapter.name(), "Child adapter added");
        self.children.write().push(Child {
            adapter,
            subscription,
        });
    }

    /// Detach a child without disposing it.
    pub fn remove_child(&self, id: AdapterId) -> Option<SharedAdapter> {
        let mut children = self.children.write();
        let index = children.iter().position(|c| c.adapter.id() == id)?;
        let child = children.remove(index);
        child.adapter.unsubscribe(child.subscription);
        Some(child.adapter)
    }

    pub fn children(&self) -> Vec<SharedAdapter> {
        self.children
            .read()
            .iter()
            .map(|c| c.adapter.clone())
            .collect()
    }

    pub fn child(&self, id: AdapterId) -> Option<SharedAdapter> {
        self.children
            .read()
            .iter()
            .find(|c| c.adapter.id() == id)
            .map(|c| c.adapter.clone())
    }

    fn targets(&self, message: &Message) -> AdapterResult<Vec<SharedAdapter>> {
        let children = self.children.read();

        let targets: Vec<SharedAdapter> = match message.adapter {
            Some(id) => children
                .iter()
                .filter(|c| c.adapter.id() == id)
                .map(|c| c.adapter.clone())
                .collect(),
            None => {
                let route = route_of(message);
                children
                    .iter()
                    .filter(|c| {
                        let roles = c.adapter.roles();
                        match route {
                            Route::All => true,
                            Route::Transactions => roles.transactions,
                            Route::MarketData => roles.market_data,
                        }
                    })
                    .map(|c| c.adapter.clone())
                    .collect()
            }
        };

        if targets.is_empty() {
            return Err(AdapterError::NoRoute {
                kind: message.message_type(),
            });
        }
        Ok(targets)
    }
}

impl MessageAdapter for BasketMessageAdapter {
    fn id(&self) -> AdapterId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn roles(&self) -> AdapterRoles {
        self.children
            .read()
            .iter()
            .fold(AdapterRoles::default(), |acc, c| acc.union(c.adapter.roles()))
    }

    /// Deliver to every target; the first failure is returned after all
    /// targets were tried.
    fn send_in_message(&self, message: Message) -> AdapterResult<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(AdapterError::Disposed(self.name.clone()));
        }

        let targets = self.targets(&message)?;
        trace!(
            basket = %self.name,
            kind = %message.message_type(),
            targets = targets.len(),
            "Routing inbound message"
        );

        let mut first_error = None;
        if let Some((last, rest)) = targets.split_last() {
            for child in rest {
                if let Err(e) = child.send_in_message(message.clone()) {
                    first_error.get_or_insert(e);
                }
            }
            if let Err(e) = last.send_in_message(message) {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn subscribe(&self, handler: OutHandler) -> SubscriptionId {
        self.out.subscribe_handler(handler)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.out.unsubscribe(id)
    }

    fn current_time(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn fork(&self) -> AdapterResult<SharedAdapter> {
        let basket = Self::new(self.name.clone(), self.clock.clone());
        for child in self.children() {
            basket.add_child(child.fork()?);
        }
        Ok(basket)
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let children: Vec<Child> = self.children.write().drain(..).collect();
        for child in children {
            child.adapter.unsubscribe(child.subscription);
            child.adapter.dispose();
        }
        self.out.clear();
        debug!(basket = %self.name, "Basket disposed");
    }
}
