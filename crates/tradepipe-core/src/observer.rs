//! Explicit observer list.
//!
//! Handlers are snapshotted under the read lock and invoked outside it, so a
//! handler may subscribe or unsubscribe re-entrantly without deadlocking.

use crate::ids::SubscriptionId;
use parking_lot::RwLock;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Registered callback.
pub type Handler<T> = Arc<dyn Fn(T) + Send + Sync>;

pub struct Observers<T> {
    next_id: AtomicU64,
    handlers: RwLock<Vec<(SubscriptionId, Handler<T>)>>,
}

impl<T: Clone> Observers<T> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            handlers: RwLock::new(Vec::new()),
        }
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        self.subscribe_handler(Arc::new(handler))
    }

    pub fn subscribe_handler(&self, handler: Handler<T>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.write().push((id, handler));
        id
    }

    /// Returns `false` if the id was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(sid, _)| *sid != id);
        handlers.len() != before
    }

    pub fn clear(&self) {
        self.handlers.write().clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    fn snapshot(&self) -> Vec<Handler<T>> {
        self.handlers.read().iter().map(|(_, h)| h.clone()).collect()
    }

    /// Invoke every handler. Returns the number of handlers called.
    pub fn notify(&self, value: T) -> usize {
        let handlers = self.snapshot();
        let count = handlers.len();
        if let Some((last, rest)) = handlers.split_last() {
            for handler in rest {
                handler(value.clone());
            }
            last(value);
        }
        count
    }

    /// Invoke every handler, isolating panics.
    ///
    /// A panicking handler does not stop the remaining handlers; the panic
    /// messages are returned to the caller.
    pub fn try_notify(&self, value: T) -> Vec<String> {
        let mut failures = Vec::new();
        for handler in self.snapshot() {
            let v = value.clone();
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| handler(v))) {
                failures.push(panic_message(payload.as_ref()));
            }
        }
        failures
    }
}

impl<T: Clone> Default for Observers<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Observers<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers")
            .field("count", &self.handlers.read().len())
            .finish()
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_notify_reaches_all_handlers() {
        let observers: Observers<u32> = Observers::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s1 = seen.clone();
        observers.subscribe(move |v| s1.lock().push(("a", v)));
        let s2 = seen.clone();
        observers.subscribe(move |v| s2.lock().push(("b", v)));

        assert_eq!(observers.notify(5), 2);
        assert_eq!(*seen.lock(), vec![("a", 5), ("b", 5)]);
    }

    #[test]
    fn test_unsubscribe() {
        let observers: Observers<u32> = Observers::new();
        let id = observers.subscribe(|_| {});
        assert_eq!(observers.len(), 1);
        assert!(observers.unsubscribe(id));
        assert!(!observers.unsubscribe(id));
        assert!(observers.is_empty());
        assert_eq!(observers.notify(1), 0);
    }

    #[test]
    fn test_reentrant_unsubscribe_does_not_deadlock() {
        let observers: Arc<Observers<u32>> = Arc::new(Observers::new());
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));

        let obs = observers.clone();
        let slot_clone = slot.clone();
        let id = observers.subscribe(move |_| {
            if let Some(id) = *slot_clone.lock() {
                obs.unsubscribe(id);
            }
        });
        *slot.lock() = Some(id);

        observers.notify(1);
        assert!(observers.is_empty());
    }

    #[test]
    fn test_try_notify_isolates_panics() {
        let observers: Observers<u32> = Observers::new();
        let hits = Arc::new(Mutex::new(0));

        observers.subscribe(|_| panic!("observer failed"));
        let h = hits.clone();
        observers.subscribe(move |_| *h.lock() += 1);

        let failures = observers.try_notify(1);
        assert_eq!(failures, vec!["observer failed".to_string()]);
        assert_eq!(*hits.lock(), 1);
    }
}
