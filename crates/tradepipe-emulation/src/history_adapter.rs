//! Replay driver on the market-data side of the emulation basket.
//!
//! Tracks market data subscriptions and registered history sources. On
//! `EmulationState` control messages it echoes the state back and drives a
//! loader thread that merges, by local time, every subscribed storage key and
//! every registered source. A source replaces storage for its key.
//!
//! Each run ends with exactly one `Last` message: `is_error` is set when a
//! stream failed or the loader panicked, cleared on exhaustion or cancel.

use crate::config::EmulationConfig;
use crate::error::EmulationResult;
use crate::storage::{MarketDataStorage, StorageCursor};
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::{Condvar, Mutex};
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, trace, warn};
use tradepipe_adapter::{
    AdapterError, AdapterResult, AdapterRoles, MessageAdapter, OutHandler, SharedAdapter,
};
use tradepipe_core::{
    panic_message, AdapterId, Clock, ConnectMessage, DisconnectMessage, EmulationClock,
    EmulationState, HistorySource, MarketDataMessage, Message, MessageBody, Observers,
    SubscriptionId, SubscriptionKey,
};
use tradepipe_telemetry::Metrics;

const ADAPTER_NAME: &str = "history";

/// Replay window and clock tick interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplaySettings {
    pub start_time: Option<DateTime<Utc>>,
    pub stop_time: Option<DateTime<Utc>>,
    pub market_time_interval: TimeDelta,
}

impl From<&EmulationConfig> for ReplaySettings {
    fn from(config: &EmulationConfig) -> Self {
        Self {
            start_time: config.start_time,
            stop_time: config.stop_time,
            market_time_interval: config.market_time_interval(),
        }
    }
}

// ============================================================================
// Loader control
// ============================================================================

#[derive(Default)]
struct ControlFlags {
    paused: bool,
    cancelled: bool,
}

/// Pause / cancel switch shared with one loader run.
#[derive(Default)]
struct LoaderControl {
    flags: Mutex<ControlFlags>,
    changed: Condvar,
}

impl LoaderControl {
    /// Blocks while paused. Returns `false` once cancelled.
    fn checkpoint(&self) -> bool {
        let mut flags = self.flags.lock();
        while flags.paused && !flags.cancelled {
            self.changed.wait(&mut flags);
        }
        !flags.cancelled
    }

    fn pause(&self) {
        self.flags.lock().paused = true;
    }

    fn resume(&self) {
        self.flags.lock().paused = false;
        self.changed.notify_all();
    }

    fn cancel(&self) {
        self.flags.lock().cancelled = true;
        self.changed.notify_all();
    }

    fn is_paused(&self) -> bool {
        self.flags.lock().paused
    }
}

struct LoaderRun {
    control: Arc<LoaderControl>,
    handle: JoinHandle<()>,
}

// ============================================================================
// Merge
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Storage,
    Source,
}

impl Origin {
    fn as_str(self) -> &'static str {
        match self {
            Origin::Storage => "storage",
            Origin::Source => "source",
        }
    }
}

struct Stream {
    key: SubscriptionKey,
    origin: Origin,
    messages: Box<dyn Iterator<Item = EmulationResult<Message>> + Send>,
    head: Option<Message>,
}

enum Outcome {
    Exhausted,
    Cancelled,
}

struct Loader {
    clock: Arc<EmulationClock>,
    settings: ReplaySettings,
    streams: Vec<Stream>,
    out: Arc<Observers<Message>>,
    control: Arc<LoaderControl>,
    loaded: Arc<AtomicU64>,
}

impl Loader {
    fn run(&mut self) -> EmulationResult<Outcome> {
        let mut heap = BinaryHeap::with_capacity(self.streams.len());
        for idx in 0..self.streams.len() {
            if let Some(time) = self.advance(idx)? {
                heap.push(Reverse((time, idx)));
            }
        }

        let mut next_tick: Option<DateTime<Utc>> = None;
        while let Some(Reverse((time, idx))) = heap.pop() {
            if !self.control.checkpoint() {
                return Ok(Outcome::Cancelled);
            }
            let Some(message) = self.streams[idx].head.take() else {
                continue;
            };
            let origin = self.streams[idx].origin;
            if let Some(time) = self.advance(idx)? {
                heap.push(Reverse((time, idx)));
            }

            if next_tick.map_or(true, |tick| time >= tick) {
                self.out.notify(Message::time(time));
                next_tick = Some(time + self.settings.market_time_interval);
            }
            self.clock.advance_to(time);
            self.loaded.fetch_add(1, Ordering::Relaxed);
            Metrics::message_loaded(origin.as_str());
            self.out.notify(message);
        }
        Ok(Outcome::Exhausted)
    }

    /// Pull the next in-window message of stream `idx` into its head slot.
    fn advance(&mut self, idx: usize) -> EmulationResult<Option<DateTime<Utc>>> {
        let now = self.clock.now();
        let settings = self.settings;
        let stream = &mut self.streams[idx];
        loop {
            let Some(next) = stream.messages.next() else {
                debug!(key = %stream.key, origin = stream.origin.as_str(), "History stream exhausted");
                return Ok(None);
            };
            let mut message = next?;
            if !message.has_local_time() {
                message.local_time = now;
            }
            let time = message.local_time;
            if settings.start_time.is_some_and(|start| time < start) {
                continue;
            }
            if settings.stop_time.is_some_and(|stop| time > stop) {
                debug!(key = %stream.key, %time, "History stream reached stop time");
                return Ok(None);
            }
            stream.head = Some(message);
            return Ok(Some(time));
        }
    }
}

// ============================================================================
// Adapter
// ============================================================================

pub struct HistoryMessageAdapter {
    id: AdapterId,
    clock: Arc<EmulationClock>,
    storage: Arc<dyn MarketDataStorage>,
    settings: ReplaySettings,
    subscriptions: Mutex<BTreeSet<SubscriptionKey>>,
    sources: Mutex<HashMap<SubscriptionKey, HistorySource>>,
    out: Arc<Observers<Message>>,
    run: Mutex<Option<LoaderRun>>,
    loaded: Arc<AtomicU64>,
    disposed: AtomicBool,
}

impl HistoryMessageAdapter {
    pub fn new(
        storage: Arc<dyn MarketDataStorage>,
        clock: Arc<EmulationClock>,
        settings: ReplaySettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: AdapterId::next(),
            clock,
            storage,
            settings,
            subscriptions: Mutex::new(BTreeSet::new()),
            sources: Mutex::new(HashMap::new()),
            out: Arc::new(Observers::new()),
            run: Mutex::new(None),
            loaded: Arc::new(AtomicU64::new(0)),
            disposed: AtomicBool::new(false),
        })
    }

    /// Messages replayed since creation.
    #[must_use]
    pub fn loaded_message_count(&self) -> u64 {
        self.loaded.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn subscriptions(&self) -> Vec<SubscriptionKey> {
        self.subscriptions.lock().iter().cloned().collect()
    }

    #[must_use]
    pub fn has_source(&self, key: &SubscriptionKey) -> bool {
        self.sources.lock().contains_key(key)
    }

    fn emit(&self, message: Message) {
        self.out.notify(message);
    }

    fn on_market_data(&self, mut request: MarketDataMessage) {
        if request.is_subscribe {
            let has_source = self.sources.lock().contains_key(&request.key);
            if !has_source && self.storage.dates(&request.key).is_empty() {
                debug!(key = %request.key, "No history for subscription");
                request.error = Some(format!("no history for {}", request.key));
            }
            self.subscriptions.lock().insert(request.key.clone());
        } else {
            self.subscriptions.lock().remove(&request.key);
        }
        debug!(key = %request.key, subscribe = request.is_subscribe, "Market data subscription");
        self.emit(Message::new(request).at(self.clock.now()));
    }

    fn on_history_source(&self, key: SubscriptionKey, source: Option<HistorySource>) {
        let mut sources = self.sources.lock();
        match source {
            Some(source) => {
                sources.insert(key.clone(), source);
                debug!(%key, "History source registered");
            }
            None => {
                sources.remove(&key);
                debug!(%key, "History source removed");
            }
        }
    }

    fn on_state(&self, state: EmulationState) -> AdapterResult<()> {
        match state {
            EmulationState::Started => {
                self.emit(Message::emulation_state(state));
                self.start_loader()?;
            }
            EmulationState::Suspending => {
                self.emit(Message::emulation_state(state));
                if let Some(run) = self.run.lock().as_ref() {
                    run.control.pause();
                }
                self.emit(Message::emulation_state(EmulationState::Suspended));
            }
            EmulationState::Stopping => {
                self.emit(Message::emulation_state(state));
                // The loader reports Last on its way out; a finished one
                // already did.
                if let Some(run) = self.run.lock().as_ref() {
                    run.control.cancel();
                }
            }
            EmulationState::Starting | EmulationState::Suspended | EmulationState::Stopped => {
                self.emit(Message::emulation_state(state));
            }
        }
        Ok(())
    }

    fn start_loader(&self) -> AdapterResult<()> {
        let mut run = self.run.lock();
        if let Some(current) = run.as_ref() {
            if current.control.is_paused() && !current.handle.is_finished() {
                info!("Resuming history replay");
                current.control.resume();
                return Ok(());
            }
        }
        if let Some(previous) = run.take() {
            previous.control.cancel();
            if previous.handle.is_finished() && previous.handle.join().is_err() {
                warn!("Previous history loader terminated abnormally");
            }
        }

        if let Some(start) = self.settings.start_time {
            self.clock.reset(start);
        }

        let streams = self.streams();
        info!(
            streams = streams.len(),
            start = ?self.settings.start_time,
            stop = ?self.settings.stop_time,
            "Starting history replay"
        );

        let control = Arc::new(LoaderControl::default());
        let mut loader = Loader {
            clock: self.clock.clone(),
            settings: self.settings,
            streams,
            out: self.out.clone(),
            control: control.clone(),
            loaded: self.loaded.clone(),
        };
        let out = self.out.clone();
        let handle = thread::Builder::new()
            .name("history-loader".to_string())
            .spawn(move || {
                let is_error = match catch_unwind(AssertUnwindSafe(|| loader.run())) {
                    Ok(Ok(Outcome::Exhausted)) => {
                        info!("History replay finished");
                        false
                    }
                    Ok(Ok(Outcome::Cancelled)) => {
                        info!("History replay cancelled");
                        false
                    }
                    Ok(Err(e)) => {
                        error!(error = %e, "History replay failed");
                        Metrics::adapter_error(ADAPTER_NAME, "load");
                        true
                    }
                    Err(payload) => {
                        error!(error = %panic_message(payload.as_ref()), "History loader panicked");
                        Metrics::adapter_error(ADAPTER_NAME, "panic");
                        true
                    }
                };
                out.notify(Message::last(is_error));
            })
            .map_err(|e| AdapterError::Fault {
                adapter: ADAPTER_NAME.to_string(),
                message: format!("failed to spawn loader: {e}"),
            })?;

        *run = Some(LoaderRun { control, handle });
        Ok(())
    }

    fn streams(&self) -> Vec<Stream> {
        let start = self.settings.start_time.unwrap_or(DateTime::<Utc>::MIN_UTC);
        let sources: Vec<(SubscriptionKey, HistorySource)> = self
            .sources
            .lock()
            .iter()
            .map(|(k, s)| (k.clone(), s.clone()))
            .collect();

        let mut streams: Vec<Stream> = sources
            .iter()
            .map(|(key, source)| Stream {
                key: key.clone(),
                origin: Origin::Source,
                messages: Box::new(source(start).map(Ok)),
                head: None,
            })
            .collect();

        for key in self.subscriptions.lock().iter() {
            if sources.iter().any(|(k, _)| k == key) {
                continue;
            }
            streams.push(Stream {
                key: key.clone(),
                origin: Origin::Storage,
                messages: Box::new(StorageCursor::new(
                    self.storage.clone(),
                    key.clone(),
                    self.settings.start_time,
                    self.settings.stop_time,
                )),
                head: None,
            });
        }
        streams
    }

    fn cancel_loader(&self) {
        if let Some(run) = self.run.lock().take() {
            run.control.cancel();
        }
    }
}

impl MessageAdapter for HistoryMessageAdapter {
    fn id(&self) -> AdapterId {
        self.id
    }

    fn name(&self) -> &str {
        ADAPTER_NAME
    }

    fn roles(&self) -> AdapterRoles {
        AdapterRoles::MARKET_DATA
    }

    fn send_in_message(&self, message: Message) -> AdapterResult<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(AdapterError::Disposed(ADAPTER_NAME.to_string()));
        }
        let kind = message.message_type();
        Metrics::message_processed(ADAPTER_NAME, kind.as_str());
        trace!(%kind, "History adapter inbound");

        match message.body {
            MessageBody::Connect(_) => self.emit(Message::new(ConnectMessage::default())),
            MessageBody::Disconnect(_) => self.emit(Message::new(DisconnectMessage::default())),
            MessageBody::Reset => {
                self.cancel_loader();
                self.subscriptions.lock().clear();
                self.sources.lock().clear();
                self.clock.reset(self.settings.start_time.unwrap_or_default());
                debug!("History adapter reset");
            }
            MessageBody::MarketData(request) => self.on_market_data(request),
            MessageBody::HistorySource(registration) => {
                let source = if registration.is_subscribe {
                    registration.source
                } else {
                    None
                };
                self.on_history_source(registration.key, source);
            }
            MessageBody::EmulationState(state) => self.on_state(state)?,
            _ => trace!(%kind, "History adapter ignores message"),
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
        self.clock.now()
    }

    fn fork(&self) -> AdapterResult<SharedAdapter> {
        Ok(Self::new(
            self.storage.clone(),
            Arc::new(EmulationClock::new(self.clock.now())),
            self.settings,
        ))
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel_loader();
        self.out.clear();
        debug!("History adapter disposed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EmulationError;
    use crate::storage::InMemoryStorage;
    use chrono::{NaiveDate, TimeZone};
    use parking_lot::Mutex as PlMutex;
    use rust_decimal_macros::dec;
    use std::time::{Duration, Instant};
    use tradepipe_core::{
        DataArg, DataType, ExecutionMessage, HistorySourceMessage, MessageIter, MessageType,
        Price, SecurityId, Volume,
    };

    fn sec() -> SecurityId {
        SecurityId::new("ES", "CME")
    }

    fn key() -> SubscriptionKey {
        SubscriptionKey::new(sec(), DataType::Trades, DataArg::None)
    }

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap() + TimeDelta::seconds(secs)
    }

    fn tick(at: DateTime<Utc>, price: rust_decimal::Decimal) -> Message {
        Message::new(ExecutionMessage::tick(
            sec(),
            Price::new(price),
            Volume::new(dec!(1)),
            None,
        ))
        .at(at)
    }

    fn settings() -> ReplaySettings {
        ReplaySettings {
            start_time: None,
            stop_time: None,
            market_time_interval: TimeDelta::seconds(5),
        }
    }

    fn adapter(
        storage: InMemoryStorage,
        settings: ReplaySettings,
    ) -> (Arc<HistoryMessageAdapter>, Arc<PlMutex<Vec<Message>>>) {
        let adapter = HistoryMessageAdapter::new(
            Arc::new(storage),
            Arc::new(EmulationClock::default()),
            settings,
        );
        let seen = Arc::new(PlMutex::new(Vec::new()));
        let s = seen.clone();
        adapter.subscribe(Arc::new(move |m: Message| s.lock().push(m)));
        (adapter, seen)
    }

    fn wait_for_last(seen: &PlMutex<Vec<Message>>) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            let last = seen.lock().iter().find_map(|m| match m.body {
                MessageBody::Last(l) => Some(l.is_error),
                _ => None,
            });
            if let Some(is_error) = last {
                return is_error;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("loader did not finish");
    }

    fn tick_times(seen: &PlMutex<Vec<Message>>) -> Vec<DateTime<Utc>> {
        seen.lock()
            .iter()
            .filter(|m| m.message_type() == MessageType::Execution)
            .map(|m| m.local_time)
            .collect()
    }

    // Test 1: storage and source streams are merged by local time
    #[test]
    fn test_merges_storage_and_source_in_time_order() {
        let storage = InMemoryStorage::new();
        storage
            .insert(key(), vec![tick(t(0), dec!(1)), tick(t(20), dec!(3))])
            .unwrap();
        let (adapter, seen) = adapter(storage, settings());

        let other = SubscriptionKey::time_frame(sec(), 60);
        let source: HistorySource =
            Arc::new(|_start| -> MessageIter {
                Box::new(vec![tick(t(10), dec!(2)), tick(t(30), dec!(4))].into_iter())
            });
        adapter
            .send_in_message(Message::new(HistorySourceMessage {
                is_subscribe: true,
                key: other,
                source: Some(source),
            }))
            .unwrap();
        adapter
            .send_in_message(Message::new(MarketDataMessage::subscribe(key(), 1)))
            .unwrap();
        adapter
            .send_in_message(Message::emulation_state(EmulationState::Started))
            .unwrap();

        assert!(!wait_for_last(&seen));
        assert_eq!(tick_times(&seen), vec![t(0), t(10), t(20), t(30)]);
        assert_eq!(adapter.loaded_message_count(), 4);
        assert_eq!(adapter.current_time(), t(30));

        let times = seen
            .lock()
            .iter()
            .filter(|m| m.message_type() == MessageType::Time)
            .count();
        assert_eq!(times, 4);
    }

    // Test 2: a source for a subscribed key replaces storage
    #[test]
    fn test_source_takes_priority_over_storage() {
        let storage = InMemoryStorage::new();
        storage.insert(key(), vec![tick(t(0), dec!(1))]).unwrap();
        let (adapter, seen) = adapter(storage, settings());

        let source: HistorySource =
            Arc::new(|_| -> MessageIter { Box::new(std::iter::once(tick(t(5), dec!(9)))) });
        adapter
            .send_in_message(Message::new(HistorySourceMessage {
                is_subscribe: true,
                key: key(),
                source: Some(source),
            }))
            .unwrap();
        adapter
            .send_in_message(Message::new(MarketDataMessage::subscribe(key(), 1)))
            .unwrap();
        adapter
            .send_in_message(Message::emulation_state(EmulationState::Started))
            .unwrap();

        wait_for_last(&seen);
        assert_eq!(tick_times(&seen), vec![t(5)]);
    }

    // Test 3: the replay window drops messages outside start/stop
    #[test]
    fn test_window_bounds() {
        let storage = InMemoryStorage::new();
        storage
            .insert(key(), (0..5).map(|i| tick(t(i * 10), dec!(1))).collect::<Vec<_>>())
            .unwrap();
        let (adapter, seen) = adapter(
            storage,
            ReplaySettings {
                start_time: Some(t(10)),
                stop_time: Some(t(30)),
                ..settings()
            },
        );
        adapter
            .send_in_message(Message::new(MarketDataMessage::subscribe(key(), 1)))
            .unwrap();
        adapter
            .send_in_message(Message::emulation_state(EmulationState::Started))
            .unwrap();

        wait_for_last(&seen);
        assert_eq!(tick_times(&seen), vec![t(10), t(20), t(30)]);
    }

    struct FailingStorage;

    impl MarketDataStorage for FailingStorage {
        fn data_types(&self, _: &SecurityId) -> Vec<(DataType, Vec<DataArg>)> {
            Vec::new()
        }

        fn dates(&self, _: &SubscriptionKey) -> Vec<NaiveDate> {
            vec![t(0).date_naive()]
        }

        fn load(&self, key: &SubscriptionKey, _: NaiveDate) -> EmulationResult<Vec<Message>> {
            Err(EmulationError::Storage {
                key: key.clone(),
                message: "disk gone".to_string(),
            })
        }
    }

    // Test 4: a storage failure ends the run with an error Last
    #[test]
    fn test_load_failure_reports_error_last() {
        let adapter = HistoryMessageAdapter::new(
            Arc::new(FailingStorage),
            Arc::new(EmulationClock::default()),
            settings(),
        );
        let seen = Arc::new(PlMutex::new(Vec::new()));
        let s = seen.clone();
        adapter.subscribe(Arc::new(move |m: Message| s.lock().push(m)));

        adapter
            .send_in_message(Message::new(MarketDataMessage::subscribe(key(), 1)))
            .unwrap();
        adapter
            .send_in_message(Message::emulation_state(EmulationState::Started))
            .unwrap();

        assert!(wait_for_last(&seen));
    }

    // Test 5: subscribing a key with no data answers with an error ack
    #[test]
    fn test_subscription_without_data_flagged() {
        let (adapter, seen) = adapter(InMemoryStorage::new(), settings());
        adapter
            .send_in_message(Message::new(MarketDataMessage::subscribe(key(), 3)))
            .unwrap();

        let seen = seen.lock();
        let MessageBody::MarketData(ack) = &seen[0].body else {
            panic!("expected market data ack");
        };
        assert_eq!(ack.transaction_id, 3);
        assert!(ack.error.is_some());
        assert_eq!(adapter.subscriptions(), vec![key()]);
    }

    // Test 6: Suspending pauses the loader and echoes Suspended; Stopping cancels it
    #[test]
    fn test_suspend_then_stop() {
        let (adapter, seen) = adapter(InMemoryStorage::new(), settings());
        let gate = Arc::new((PlMutex::new(false), Condvar::new()));
        let g = gate.clone();
        // Source that blocks until the test has suspended the loader.
        let source: HistorySource = Arc::new(move |_| {
            let g = g.clone();
            Box::new((0..1000).map(move |i| {
                if i == 1 {
                    let (ready, cv) = &*g;
                    let mut ready = ready.lock();
                    while !*ready {
                        cv.wait(&mut ready);
                    }
                }
                tick(t(i), dec!(1))
            }))
        });
        adapter
            .send_in_message(Message::new(HistorySourceMessage {
                is_subscribe: true,
                key: key(),
                source: Some(source),
            }))
            .unwrap();
        adapter
            .send_in_message(Message::emulation_state(EmulationState::Started))
            .unwrap();
        adapter
            .send_in_message(Message::emulation_state(EmulationState::Suspending))
            .unwrap();
        {
            let (ready, cv) = &*gate;
            *ready.lock() = true;
            cv.notify_all();
        }
        thread::sleep(Duration::from_millis(50));
        let paused_at = adapter.loaded_message_count();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(adapter.loaded_message_count(), paused_at);
        assert!(paused_at < 1000);

        adapter
            .send_in_message(Message::emulation_state(EmulationState::Stopping))
            .unwrap();
        assert!(!wait_for_last(&seen));

        let states: Vec<EmulationState> = seen
            .lock()
            .iter()
            .filter_map(|m| match m.body {
                MessageBody::EmulationState(s) => Some(s),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                EmulationState::Started,
                EmulationState::Suspending,
                EmulationState::Suspended,
                EmulationState::Stopping
            ]
        );
    }

    // Test 7: unregistering a source removes it
    #[test]
    fn test_unregister_source() {
        let (adapter, _) = adapter(InMemoryStorage::new(), settings());
        let source: HistorySource = Arc::new(|_| -> MessageIter { Box::new(std::iter::empty()) });
        adapter
            .send_in_message(Message::new(HistorySourceMessage {
                is_subscribe: true,
                key: key(),
                source: Some(source),
            }))
            .unwrap();
        assert!(adapter.has_source(&key()));

        adapter
            .send_in_message(Message::new(HistorySourceMessage {
                is_subscribe: false,
                key: key(),
                source: None,
            }))
            .unwrap();
        assert!(!adapter.has_source(&key()));
    }
}
