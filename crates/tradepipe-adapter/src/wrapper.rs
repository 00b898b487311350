//! Shared plumbing for adapters that decorate one inner adapter.

use crate::adapter::{MessageAdapter, OutHandler, SharedAdapter};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;
use tradepipe_core::{AdapterId, Message, Observers, SubscriptionId};

/// Post-processing hook for messages published by the inner adapter.
pub trait InnerOutput: Send + Sync {
    fn on_inner_message(&self, message: Message);
}

/// Inner adapter, outbound observers and the inner subscription.
pub struct WrapperCore {
    id: AdapterId,
    name: String,
    inner: SharedAdapter,
    out: Observers<Message>,
    inner_subscription: Mutex<Option<SubscriptionId>>,
    disposed: AtomicBool,
}

impl WrapperCore {
    pub fn new(name: impl Into<String>, inner: SharedAdapter) -> Self {
        Self {
            id: AdapterId::next(),
            name: name.into(),
            inner,
            out: Observers::new(),
            inner_subscription: Mutex::new(None),
            disposed: AtomicBool::new(false),
        }
    }

    /// Route the inner adapter's output into `owner`.
    ///
    /// Holds only a weak reference so the inner adapter does not keep the
    /// wrapper alive.
    pub fn attach<W: InnerOutput + 'static>(&self, owner: &Arc<W>) {
        let weak = Arc::downgrade(owner);
        let id = self.inner.subscribe(Arc::new(move |message| {
            if let Some(owner) = weak.upgrade() {
                owner.on_inner_message(message);
            }
        }));
        *self.inner_subscription.lock() = Some(id);
    }

    #[must_use]
    pub fn id(&self) -> AdapterId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inner(&self) -> &SharedAdapter {
        &self.inner
    }

    /// Publish to outbound observers.
    pub fn emit(&self, message: Message) {
        self.out.notify(message);
    }

    pub fn subscribe(&self, handler: OutHandler) -> SubscriptionId {
        self.out.subscribe_handler(handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.out.unsubscribe(id)
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Stop listening to the inner adapter without disposing it.
    pub fn detach(&self) {
        if let Some(id) = self.inner_subscription.lock().take() {
            self.inner.unsubscribe(id);
        }
    }

    /// Unsubscribe from the inner adapter, then dispose it.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.detach();
        self.inner.dispose();
        self.out.clear();
        debug!(adapter = %self.name, "Adapter disposed");
    }
}

impl std::fmt::Debug for WrapperCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WrapperCore")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("inner", &self.inner.name())
            .finish()
    }
}
