//! Market data storage collaborator.
//!
//! The emulation only reads storage: which data types exist for a security,
//! which dates exist for a key, and one day of messages at a time.

use crate::error::{EmulationError, EmulationResult};
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use tradepipe_core::{DataArg, DataType, Message, SecurityId, SubscriptionKey};

/// Read-only market data store, partitioned by key and day.
pub trait MarketDataStorage: Send + Sync {
    /// Stored data types for a security with the args available for each.
    fn data_types(&self, security_id: &SecurityId) -> Vec<(DataType, Vec<DataArg>)>;

    /// Days with data for `key`, ascending.
    fn dates(&self, key: &SubscriptionKey) -> Vec<NaiveDate>;

    /// Messages of one day ordered by local time.
    fn load(&self, key: &SubscriptionKey, date: NaiveDate) -> EmulationResult<Vec<Message>>;
}

/// Storage held in memory.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    data: RwLock<HashMap<SubscriptionKey, BTreeMap<NaiveDate, Vec<Message>>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add messages under `key`. Messages must carry a local time; they are
    /// bucketed by its UTC date.
    pub fn insert(
        &self,
        key: SubscriptionKey,
        messages: impl IntoIterator<Item = Message>,
    ) -> EmulationResult<()> {
        let mut data = self.data.write();
        let days = data.entry(key.clone()).or_default();
        for message in messages {
            if !message.has_local_time() {
                return Err(EmulationError::Storage {
                    key,
                    message: format!("{} message without local time", message.message_type()),
                });
            }
            days.entry(message.local_time.date_naive())
                .or_default()
                .push(message);
        }
        for day in days.values_mut() {
            day.sort_by_key(|m| m.local_time);
        }
        Ok(())
    }

    #[must_use]
    pub fn message_count(&self) -> usize {
        self.data
            .read()
            .values()
            .flat_map(|days| days.values())
            .map(Vec::len)
            .sum()
    }
}

impl MarketDataStorage for InMemoryStorage {
    fn data_types(&self, security_id: &SecurityId) -> Vec<(DataType, Vec<DataArg>)> {
        let mut types: BTreeMap<DataType, BTreeSet<DataArg>> = BTreeMap::new();
        for key in self.data.read().keys() {
            if &key.security_id == security_id {
                types
                    .entry(key.data_type)
                    .or_default()
                    .insert(key.arg.clone());
            }
        }
        types
            .into_iter()
            .map(|(data_type, args)| (data_type, args.into_iter().collect()))
            .collect()
    }

    fn dates(&self, key: &SubscriptionKey) -> Vec<NaiveDate> {
        self.data
            .read()
            .get(key)
            .map(|days| days.keys().copied().collect())
            .unwrap_or_default()
    }

    fn load(&self, key: &SubscriptionKey, date: NaiveDate) -> EmulationResult<Vec<Message>> {
        Ok(self
            .data
            .read()
            .get(key)
            .and_then(|days| days.get(&date))
            .cloned()
            .unwrap_or_default())
    }
}

/// Lazy day-by-day reader over one key.
///
/// Loads the next day only when the previous one is exhausted. A load error
/// is yielded once and ends the cursor.
pub struct StorageCursor {
    storage: Arc<dyn MarketDataStorage>,
    key: SubscriptionKey,
    dates: VecDeque<NaiveDate>,
    current: VecDeque<Message>,
    failed: bool,
}

impl StorageCursor {
    pub fn new(
        storage: Arc<dyn MarketDataStorage>,
        key: SubscriptionKey,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Self {
        let from = from.map(|t| t.date_naive());
        let to = to.map(|t| t.date_naive());
        let dates = storage
            .dates(&key)
            .into_iter()
            .filter(|d| from.map_or(true, |f| *d >= f) && to.map_or(true, |t| *d <= t))
            .collect();
        Self {
            storage,
            key,
            dates,
            current: VecDeque::new(),
            failed: false,
        }
    }

    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }
}

impl Iterator for StorageCursor {
    type Item = EmulationResult<Message>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(message) = self.current.pop_front() {
                return Some(Ok(message));
            }
            if self.failed {
                return None;
            }
            let date = self.dates.pop_front()?;
            match self.storage.load(&self.key, date) {
                Ok(messages) => self.current = messages.into(),
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
