//! Reference-counted subscription table.
//!
//! Several consumers may share one upstream subscription. Only the first
//! subscriber (0 -> 1) and the last unsubscriber (1 -> 0) should reach the
//! pipeline; callers check `is_first` / `is_last` on the returned change.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;

/// Outcome of a subscriber count change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberChange {
    /// Count after adding a subscriber.
    Added(usize),
    /// Count after removing a subscriber.
    Removed(usize),
    /// Unsubscribe for a key nobody subscribed to.
    NotSubscribed,
}

impl SubscriberChange {
    #[must_use]
    pub fn is_first(&self) -> bool {
        matches!(self, Self::Added(1))
    }

    #[must_use]
    pub fn is_last(&self) -> bool {
        matches!(self, Self::Removed(0))
    }
}

#[derive(Debug)]
pub struct SubscriptionCounter<K> {
    counts: Mutex<HashMap<K, usize>>,
}

impl<K: Eq + Hash + Clone> SubscriptionCounter<K> {
    pub fn new() -> Self {
        Self {
            counts: Mutex::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self, key: &K) -> SubscriberChange {
        let mut counts = self.counts.lock();
        let count = counts.entry(key.clone()).or_insert(0);
        *count += 1;
        SubscriberChange::Added(*count)
    }

    pub fn unsubscribe(&self, key: &K) -> SubscriberChange {
        let mut counts = self.counts.lock();
        match counts.get_mut(key) {
            None => SubscriberChange::NotSubscribed,
            Some(count) => {
                *count -= 1;
                let remaining = *count;
                if remaining == 0 {
                    counts.remove(key);
                }
                SubscriberChange::Removed(remaining)
            }
        }
    }

    /// Add or remove one subscriber.
    pub fn change(&self, key: &K, subscribe: bool) -> SubscriberChange {
        if subscribe {
            self.subscribe(key)
        } else {
            self.unsubscribe(key)
        }
    }

    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.counts.lock().contains_key(key)
    }

    #[must_use]
    pub fn count(&self, key: &K) -> usize {
        self.counts.lock().get(key).copied().unwrap_or(0)
    }

    pub fn keys(&self) -> Vec<K> {
        self.counts.lock().keys().cloned().collect()
    }

    pub fn clear(&self) {
        self.counts.lock().clear();
    }
}

impl<K: Eq + Hash + Clone> Default for SubscriptionCounter<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_and_last_transitions() {
        let counter = SubscriptionCounter::new();

        assert!(counter.subscribe(&"a").is_first());
        assert_eq!(counter.subscribe(&"a"), SubscriberChange::Added(2));
        assert_eq!(counter.count(&"a"), 2);

        assert!(!counter.unsubscribe(&"a").is_last());
        assert!(counter.unsubscribe(&"a").is_last());
        assert!(!counter.contains(&"a"));
    }

    #[test]
    fn test_unsubscribe_unknown_key() {
        let counter: SubscriptionCounter<&str> = SubscriptionCounter::new();
        let change = counter.change(&"missing", false);
        assert_eq!(change, SubscriberChange::NotSubscribed);
        assert!(!change.is_last());
    }

    #[test]
    fn test_resubscribe_after_last() {
        let counter = SubscriptionCounter::new();
        counter.subscribe(&1u32);
        counter.unsubscribe(&1u32);
        assert!(counter.subscribe(&1u32).is_first());
    }
}
