//! History emulation connector.
//!
//! Composes the back-test pipeline:
//!
//! ```text
//!                       +--> transaction chain --> EmulationMessageAdapter
//! connector --> basket -+
//!                       +--> ChannelMessageAdapter --> HistoryMessageAdapter
//! ```
//!
//! Every outbound message of the basket is processed here: market data from
//! the history side is forwarded to the emulator, emulation state echoes
//! drive the state machine, executions and position changes update the
//! order and position stores. A failure while processing an outbound message
//! is reported to error observers and starts an orderly shutdown.

use crate::config::EmulationConfig;
use crate::emulation_adapter::EmulationMessageAdapter;
use crate::error::{EmulationError, EmulationResult};
use crate::history_adapter::{HistoryMessageAdapter, ReplaySettings};
use crate::positions::{PortfolioProvider, PositionProvider, PositionStore};
use crate::providers::{EntityFactory, SecurityProvider};
use crate::series::{
    unbounded_range, CandleBatch, CandleSeries, ExternalCandleSource, TimeRange,
};
use crate::state::{StateMachine, StateTransition};
use crate::storage::MarketDataStorage;
use crate::subscriptions::{SubscriberChange, SubscriptionCounter};
use crate::transactions::{OrderRequest, OrderTracker, TransactionProvider};
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};
use tradepipe_adapter::{
    AdapterError, BasketMessageAdapter, ChannelMessageAdapter, MessageAdapter, SharedAdapter,
};
use tradepipe_channel::InMemoryMessageChannel;
use tradepipe_core::{
    panic_message, AdapterId, CandleMessage, Clock, EmulationClock, EmulationState, Handler,
    HistorySource, HistorySourceMessage, IncrementalIdGenerator, MarketDataMessage, Message,
    MessageBody, Observers, Order, Portfolio, PortfolioMessage, Position,
    PositionChangeKind, PositionChangeMessage, PositionKey, Price, SecurityId, SubscriptionId,
    SubscriptionKey, TransactionId, Volume,
};
use tradepipe_telemetry::Metrics;

const CONNECTOR_NAME: &str = "connector";

pub struct HistoryEmulationConnector {
    config: RwLock<EmulationConfig>,
    clock: Arc<EmulationClock>,
    storage: Arc<dyn MarketDataStorage>,

    basket: Arc<BasketMessageAdapter>,
    basket_subscription: Mutex<Option<SubscriptionId>>,
    tx_id: AdapterId,
    md_id: AdapterId,
    emulator: Arc<EmulationMessageAdapter>,
    history: Option<Arc<HistoryMessageAdapter>>,
    history_out: Option<Arc<InMemoryMessageChannel>>,

    state: StateMachine,
    ids: Arc<IncrementalIdGenerator>,
    orders: OrderTracker,
    positions: PositionStore,
    factory: EntityFactory,
    portfolios: RwLock<Vec<Portfolio>>,

    market_data: SubscriptionCounter<SubscriptionKey>,
    history_sources: SubscriptionCounter<SubscriptionKey>,
    series: RwLock<HashMap<SubscriptionKey, CandleSeries>>,
    series_consumers: SubscriptionCounter<SubscriptionKey>,
    new_candles: Observers<CandleBatch>,
    series_stopped: Observers<CandleSeries>,

    out: Observers<Message>,
    errors: Observers<Arc<EmulationError>>,
    connected: Mutex<HashSet<AdapterId>>,
    is_finished: AtomicBool,
    pending_stop: AtomicBool,
    // One Stopping and one Stopped request per run; cleared on Starting.
    stopping_requested: AtomicBool,
    stopped_requested: AtomicBool,
    disposed: AtomicBool,
}

impl HistoryEmulationConnector {
    /// Connector replaying `storage` through a `HistoryMessageAdapter`
    /// behind a bounded "History Out" channel.
    pub fn new(
        config: EmulationConfig,
        securities: Arc<dyn SecurityProvider>,
        portfolios: Vec<Portfolio>,
        storage: Arc<dyn MarketDataStorage>,
    ) -> EmulationResult<Arc<Self>> {
        config.validate()?;
        let clock = Arc::new(EmulationClock::new(config.start_time.unwrap_or_default()));
        let history =
            HistoryMessageAdapter::new(storage.clone(), clock.clone(), ReplaySettings::from(&config));
        let history_out = Arc::new(InMemoryMessageChannel::bounded(
            "History Out",
            config.max_message_count,
        ));
        let md: SharedAdapter = ChannelMessageAdapter::new(
            history.clone(),
            Arc::new(InMemoryMessageChannel::unbounded("History In")),
            history_out.clone(),
        );
        Self::assemble(
            config,
            securities,
            portfolios,
            storage,
            clock,
            md,
            Some(history),
            Some(history_out),
        )
    }

    /// Connector over a caller supplied market data side adapter.
    pub fn with_market_data_adapter(
        config: EmulationConfig,
        securities: Arc<dyn SecurityProvider>,
        portfolios: Vec<Portfolio>,
        storage: Arc<dyn MarketDataStorage>,
        market_data: SharedAdapter,
    ) -> EmulationResult<Arc<Self>> {
        config.validate()?;
        let clock = Arc::new(EmulationClock::new(config.start_time.unwrap_or_default()));
        Self::assemble(
            config,
            securities,
            portfolios,
            storage,
            clock,
            market_data,
            None,
            None,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        config: EmulationConfig,
        securities: Arc<dyn SecurityProvider>,
        portfolios: Vec<Portfolio>,
        storage: Arc<dyn MarketDataStorage>,
        clock: Arc<EmulationClock>,
        md: SharedAdapter,
        history: Option<Arc<HistoryMessageAdapter>>,
        history_out: Option<Arc<InMemoryMessageChannel>>,
    ) -> EmulationResult<Arc<Self>> {
        let emulator = EmulationMessageAdapter::new(clock.clone());
        let tx = config.transaction_chain.build(emulator.clone())?;

        let basket = BasketMessageAdapter::new("emulation", clock.clone());
        basket.add_child(tx.clone());
        basket.add_child(md.clone());

        let ids = Arc::new(IncrementalIdGenerator::new());
        let orders = OrderTracker::new(basket.clone(), clock.clone(), ids.clone());

        info!(
            transaction_chain = config.transaction_chain.steps().len(),
            max_message_count = config.max_message_count,
            portfolios = portfolios.len(),
            "Emulation connector assembled"
        );

        let connector = Arc::new(Self {
            config: RwLock::new(config),
            clock,
            storage,
            basket: basket.clone(),
            basket_subscription: Mutex::new(None),
            tx_id: tx.id(),
            md_id: md.id(),
            emulator,
            history,
            history_out,
            state: StateMachine::new(),
            ids,
            orders,
            positions: PositionStore::new(),
            factory: EntityFactory::new(securities, portfolios.clone()),
            portfolios: RwLock::new(portfolios),
            market_data: SubscriptionCounter::new(),
            history_sources: SubscriptionCounter::new(),
            series: RwLock::new(HashMap::new()),
            series_consumers: SubscriptionCounter::new(),
            new_candles: Observers::new(),
            series_stopped: Observers::new(),
            out: Observers::new(),
            errors: Observers::new(),
            connected: Mutex::new(HashSet::new()),
            is_finished: AtomicBool::new(false),
            pending_stop: AtomicBool::new(false),
            stopping_requested: AtomicBool::new(false),
            stopped_requested: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&connector);
        let id = basket.subscribe(Arc::new(move |message: Message| {
            if let Some(connector) = weak.upgrade() {
                connector.on_out_message(message);
            }
        }));
        *connector.basket_subscription.lock() = Some(id);
        Ok(connector)
    }

    // ------------------------------------------------------------------------
    // State and counters
    // ------------------------------------------------------------------------

    #[must_use]
    pub fn state(&self) -> EmulationState {
        self.state.state()
    }

    /// Receiver for async callers awaiting a state.
    pub fn state_receiver(&self) -> watch::Receiver<EmulationState> {
        self.state.receiver()
    }

    pub fn subscribe_state<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(StateTransition) + Send + Sync + 'static,
    {
        self.state.subscribe(handler)
    }

    pub fn state_history(&self) -> Vec<StateTransition> {
        self.state.history()
    }

    /// `true` once history ran out without error.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.is_finished.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn loaded_message_count(&self) -> u64 {
        self.history
            .as_ref()
            .map_or(0, |h| h.loaded_message_count())
    }

    #[must_use]
    pub fn processed_message_count(&self) -> u64 {
        self.emulator.processed_message_count()
    }

    #[must_use]
    pub fn current_time(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn config(&self) -> EmulationConfig {
        self.config.read().clone()
    }

    /// Resize the read-ahead bound of the history channel.
    pub fn set_max_message_count(&self, max_message_count: usize) -> EmulationResult<()> {
        if max_message_count == 0 {
            return Err(EmulationError::Config(
                "max_message_count must be positive".to_string(),
            ));
        }
        self.config.write().max_message_count = max_message_count;
        if let Some(channel) = &self.history_out {
            channel.set_max_message_count(Some(max_message_count));
        }
        debug!(max_message_count, "History read-ahead bound changed");
        Ok(())
    }

    pub fn set_use_external_candle_source(&self, enabled: bool) {
        self.config.write().use_external_candle_source = enabled;
    }

    #[must_use]
    pub fn use_external_candle_source(&self) -> bool {
        self.config.read().use_external_candle_source
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    pub fn connect(&self) -> EmulationResult<()> {
        info!("Connecting emulation");
        self.send(Message::connect())
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        let connected = self.connected.lock();
        connected.contains(&self.tx_id) && connected.contains(&self.md_id)
    }

    /// Stop a running emulation, or disconnect a stopped one.
    pub fn disconnect(&self) -> EmulationResult<()> {
        match self.state() {
            EmulationState::Started | EmulationState::Suspended => self.request_stopping(),
            EmulationState::Starting | EmulationState::Suspending => {
                debug!("Stop requested while changing state; deferred");
                self.pending_stop.store(true, Ordering::Release);
                Ok(())
            }
            EmulationState::Stopping => Ok(()),
            EmulationState::Stopped => self.send(Message::disconnect()),
        }
    }

    pub fn start(&self) -> EmulationResult<()> {
        self.state.check(EmulationState::Starting)?;
        self.send_state(EmulationState::Starting)
    }

    pub fn suspend(&self) -> EmulationResult<()> {
        self.state.check(EmulationState::Suspending)?;
        self.send_state(EmulationState::Suspending)
    }

    /// Forget orders, positions and the finished flag before another run.
    pub fn clear_cache(&self) {
        self.is_finished.store(false, Ordering::Release);
        self.orders.clear();
        self.positions.clear();
        self.ids.reset();
        debug!("Emulation cache cleared");
    }

    /// Track a portfolio. A running emulation receives its opening balance
    /// right away; otherwise it is seeded on the next connect.
    pub fn register_portfolio(&self, portfolio: Portfolio) -> EmulationResult<()> {
        if !self.factory.add_portfolio(portfolio.clone()) {
            debug!(portfolio = %portfolio.name, "Portfolio already registered");
            return Ok(());
        }
        self.portfolios.write().push(portfolio.clone());
        if self.state() == EmulationState::Started {
            self.seed_portfolio(&portfolio)?;
        }
        Ok(())
    }

    /// Send a message into the pipeline, stamped with the replay clock.
    pub fn send_in_message(&self, message: Message) -> EmulationResult<()> {
        self.send(message)
    }

    pub fn subscribe_messages<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        self.out.subscribe(handler)
    }

    pub fn unsubscribe_messages(&self, id: SubscriptionId) -> bool {
        self.out.unsubscribe(id)
    }

    pub fn subscribe_errors<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(Arc<EmulationError>) + Send + Sync + 'static,
    {
        self.errors.subscribe(handler)
    }

    pub fn unsubscribe_errors(&self, id: SubscriptionId) -> bool {
        self.errors.unsubscribe(id)
    }

    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(id) = self.basket_subscription.lock().take() {
            self.basket.unsubscribe(id);
        }
        self.basket.dispose();
        self.out.clear();
        self.errors.clear();
        self.new_candles.clear();
        self.series_stopped.clear();
        info!("Emulation connector disposed");
    }

    // ------------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------------

    /// Register a user supplied source for `key`. Only the first
    /// registration reaches the replay driver.
    pub fn register_history_source(
        &self,
        key: SubscriptionKey,
        source: HistorySource,
    ) -> EmulationResult<()> {
        if !self.history_sources.subscribe(&key).is_first() {
            trace!(%key, "History source already registered");
            return Ok(());
        }
        self.send_to_market_data(Message::new(HistorySourceMessage {
            is_subscribe: true,
            key,
            source: Some(source),
        }))
    }

    /// Drop one registration for `key`; the last one removes the source.
    pub fn unregister_history_source(&self, key: SubscriptionKey) -> EmulationResult<()> {
        if !self.history_sources.unsubscribe(&key).is_last() {
            trace!(%key, "History source still referenced");
            return Ok(());
        }
        self.send_to_market_data(Message::new(HistorySourceMessage {
            is_subscribe: false,
            key,
            source: None,
        }))
    }

    #[must_use]
    pub fn has_history_source(&self, key: &SubscriptionKey) -> bool {
        self.history_sources.contains(key)
    }

    /// Subscribe to replayed data for `key`. Returns the request id when
    /// this was the first subscriber.
    pub fn subscribe_market_data(
        &self,
        key: SubscriptionKey,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> EmulationResult<Option<TransactionId>> {
        if !self.market_data.subscribe(&key).is_first() {
            return Ok(None);
        }
        let transaction_id = self.ids.next_id();
        let mut request = MarketDataMessage::subscribe(key, transaction_id);
        request.from = from;
        request.to = to;
        self.send_to_market_data(Message::new(request))?;
        Ok(Some(transaction_id))
    }

    pub fn unsubscribe_market_data(
        &self,
        key: SubscriptionKey,
    ) -> EmulationResult<Option<TransactionId>> {
        if !self.market_data.unsubscribe(&key).is_last() {
            return Ok(None);
        }
        let transaction_id = self.ids.next_id();
        self.send_to_market_data(Message::new(MarketDataMessage::unsubscribe(
            key,
            transaction_id,
        )))?;
        Ok(Some(transaction_id))
    }

    // ------------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------------

    fn send(&self, message: Message) -> EmulationResult<()> {
        let message = if message.has_local_time() {
            message
        } else {
            message.at(self.clock.now())
        };
        self.basket.send_in_message(message).map_err(Into::into)
    }

    fn send_to_market_data(&self, message: Message) -> EmulationResult<()> {
        self.send(message.for_adapter(self.md_id))
    }

    fn send_state(&self, state: EmulationState) -> EmulationResult<()> {
        debug!(%state, "Requesting emulation state");
        self.send(Message::emulation_state(state))
    }

    fn request_stopping(&self) -> EmulationResult<()> {
        self.request_once(&self.stopping_requested, EmulationState::Stopping)
    }

    fn request_stopped(&self) -> EmulationResult<()> {
        self.request_once(&self.stopped_requested, EmulationState::Stopped)
    }

    fn request_once(&self, sent: &AtomicBool, state: EmulationState) -> EmulationResult<()> {
        if sent.swap(true, Ordering::AcqRel) {
            trace!(%state, "State already requested");
            return Ok(());
        }
        let result = self.send_state(state);
        if result.is_err() {
            sent.store(false, Ordering::Release);
        }
        result
    }

    fn seed_portfolios(&self) -> EmulationResult<()> {
        let portfolios = self.portfolios.read().clone();
        for portfolio in &portfolios {
            self.seed_portfolio(portfolio)?;
        }
        Ok(())
    }

    /// Portfolio snapshot plus opening money position, routed through the
    /// emulator so it records the starting balance.
    fn seed_portfolio(&self, portfolio: &Portfolio) -> EmulationResult<()> {
        let now = self.clock.now();
        debug!(portfolio = %portfolio.name, money = %portfolio.begin_value, "Seeding portfolio");
        self.send(
            Message::new(PortfolioMessage {
                portfolio_name: portfolio.name.clone(),
                board: portfolio.board.clone(),
                is_subscribe: true,
            })
            .for_adapter(self.tx_id),
        )?;
        self.send(
            Message::new(
                PositionChangeMessage::new(SecurityId::money(), portfolio.name.clone(), now)
                    .add(PositionChangeKind::BeginValue, portfolio.begin_value)
                    .add(PositionChangeKind::CurrentValue, portfolio.begin_value)
                    .add(PositionChangeKind::BlockedValue, Decimal::ZERO),
            )
            .for_adapter(self.tx_id),
        )
    }

    /// Start an orderly shutdown from whatever state we are in.
    fn request_stop(&self) {
        match self.state() {
            EmulationState::Started | EmulationState::Suspended => {
                if let Err(e) = self.request_stopping() {
                    error!(error = %e, "Failed to request emulation stop");
                }
            }
            EmulationState::Starting | EmulationState::Suspending => {
                self.pending_stop.store(true, Ordering::Release);
            }
            EmulationState::Stopping | EmulationState::Stopped => {}
        }
    }

    // ------------------------------------------------------------------------
    // Outbound processing
    // ------------------------------------------------------------------------

    fn on_out_message(&self, message: Message) {
        let kind = message.message_type();
        let failure = match catch_unwind(AssertUnwindSafe(|| self.process_out(message))) {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e,
            Err(payload) => EmulationError::from(AdapterError::Fault {
                adapter: CONNECTOR_NAME.to_string(),
                message: panic_message(payload.as_ref()),
            }),
        };
        error!(%kind, error = %failure, "Emulation message processing failed");
        Metrics::adapter_error(CONNECTOR_NAME, kind.as_str());
        self.report(failure);
        self.request_stop();
    }

    fn report(&self, failure: EmulationError) {
        for panic in self.errors.try_notify(Arc::new(failure)) {
            warn!(error = %panic, "Error observer panicked");
        }
    }

    fn adapter_name(&self, id: Option<AdapterId>) -> String {
        id.and_then(|id| self.basket.child(id))
            .map_or_else(|| CONNECTOR_NAME.to_string(), |a| a.name().to_string())
    }

    fn fault(&self, id: Option<AdapterId>, message: String) -> EmulationError {
        EmulationError::from(AdapterError::Fault {
            adapter: self.adapter_name(id),
            message,
        })
    }

    fn process_out(&self, message: Message) -> EmulationResult<()> {
        let from_md = message.adapter == Some(self.md_id);
        let from_tx = message.adapter == Some(self.tx_id);
        trace!(kind = %message.message_type(), from_md, from_tx, "Connector outbound");

        match &message.body {
            MessageBody::Connect(ack) => {
                if let Some(error) = &ack.error {
                    return Err(self.fault(message.adapter, error.clone()));
                }
                if let Some(id) = message.adapter {
                    self.connected.lock().insert(id);
                }
                if from_tx {
                    self.seed_portfolios()?;
                }
                info!(adapter = %self.adapter_name(message.adapter), "Adapter connected");
                self.publish(message);
                Ok(())
            }
            MessageBody::Disconnect(ack) => {
                if let Some(id) = message.adapter {
                    self.connected.lock().remove(&id);
                }
                let error = ack.error.clone();
                info!(adapter = %self.adapter_name(message.adapter), "Adapter disconnected");
                let source = message.adapter;
                self.publish(message);
                match error {
                    Some(error) => Err(self.fault(source, error)),
                    None => Ok(()),
                }
            }
            MessageBody::Last(last) => self.on_last(last.is_error),
            MessageBody::Clearing => Ok(()),
            MessageBody::EmulationState(state) => {
                let state = *state;
                self.on_state_echo(state)?;
                self.publish(message);
                Ok(())
            }
            MessageBody::Error(e) => Err(self.fault(message.adapter, e.error.clone())),
            _ if from_md && message.is_market_data() => {
                self.send(message.for_adapter(self.tx_id))
            }
            MessageBody::Candle(candle) if from_tx && self.use_external_candle_source() => {
                if self.deliver_candle(candle) {
                    return Ok(());
                }
                self.apply_and_publish(message);
                Ok(())
            }
            _ => {
                if self.state() == EmulationState::Stopping && !drains_while_stopping(&message) {
                    trace!(kind = %message.message_type(), "Dropped while stopping");
                    return Ok(());
                }
                self.apply_and_publish(message);
                Ok(())
            }
        }
    }

    fn on_last(&self, is_error: bool) -> EmulationResult<()> {
        match self.state() {
            EmulationState::Started => {
                self.is_finished.store(!is_error, Ordering::Release);
                info!(is_error, "History exhausted, stopping emulation");
                self.request_stopping()?;
                self.request_stopped()
            }
            EmulationState::Stopping => self.request_stopped(),
            state => {
                debug!(%state, "End of history ignored");
                Ok(())
            }
        }
    }

    fn on_state_echo(&self, state: EmulationState) -> EmulationResult<()> {
        let change = self.state.transition(state)?;
        for failure in change.observer_failures {
            self.report(self.fault(None, format!("state observer: {failure}")));
        }

        match state {
            EmulationState::Starting => {
                self.stopping_requested.store(false, Ordering::Release);
                self.stopped_requested.store(false, Ordering::Release);
                self.send_state(EmulationState::Started)
            }
            EmulationState::Stopping => self.send(Message::disconnect()),
            EmulationState::Started | EmulationState::Suspended
                if self.pending_stop.swap(false, Ordering::AcqRel) =>
            {
                info!("Issuing deferred stop");
                self.request_stopping()
            }
            _ => Ok(()),
        }
    }

    /// Hand a candle to external candle subscribers. Returns `false` when no
    /// tracked series matches.
    fn deliver_candle(&self, candle: &CandleMessage) -> bool {
        let Some(series) = self.series.read().get(&candle.key()).cloned() else {
            return false;
        };
        trace!(%series, close = %candle.close, "External candle");
        for failure in self.new_candles.try_notify((series.clone(), vec![candle.clone()])) {
            warn!(%series, error = %failure, "Candle handler panicked");
        }
        if candle.is_finished {
            debug!(%series, "Candle series finished");
            for failure in self.series_stopped.try_notify(series) {
                warn!(error = %failure, "Series stop handler panicked");
            }
        }
        true
    }

    fn apply_and_publish(&self, message: Message) {
        match &message.body {
            MessageBody::Execution(execution) => self.orders.apply_execution(execution),
            MessageBody::PositionChange(change) => {
                self.positions.apply(change, message.local_time, &self.factory)
            }
            MessageBody::Portfolio(portfolio) => {
                self.positions
                    .ensure_portfolio(&portfolio.portfolio_name, &self.factory);
            }
            _ => {}
        }
        self.publish(message);
    }

    fn publish(&self, message: Message) {
        let kind = message.message_type();
        for failure in self.out.try_notify(message) {
            warn!(%kind, error = %failure, "Message handler panicked");
        }
    }
}

/// Fills, position updates and market data still land while stopping, so
/// the order and position books end up matching the emulator.
fn drains_while_stopping(message: &Message) -> bool {
    message.is_market_data()
        || matches!(
            message.body,
            MessageBody::Execution(_) | MessageBody::PositionChange(_)
        )
}

// ============================================================================
// Capability delegation
// ============================================================================

impl TransactionProvider for HistoryEmulationConnector {
    fn register_order(&self, request: OrderRequest) -> EmulationResult<TransactionId> {
        self.orders.register_order(request)
    }

    fn cancel_order(&self, transaction_id: TransactionId) -> EmulationResult<TransactionId> {
        self.orders.cancel_order(transaction_id)
    }

    fn replace_order(
        &self,
        transaction_id: TransactionId,
        price: Price,
        volume: Volume,
    ) -> EmulationResult<TransactionId> {
        self.orders.replace_order(transaction_id, price, volume)
    }

    fn order(&self, transaction_id: TransactionId) -> Option<Order> {
        self.orders.order(transaction_id)
    }

    fn orders(&self) -> Vec<Order> {
        self.orders.orders()
    }
}

impl PositionProvider for HistoryEmulationConnector {
    fn position(&self, key: &PositionKey) -> Option<Position> {
        self.positions.position(key)
    }

    fn positions(&self) -> Vec<Position> {
        self.positions.positions()
    }
}

impl PortfolioProvider for HistoryEmulationConnector {
    fn portfolio(&self, name: &str) -> Option<Portfolio> {
        self.positions.portfolio(name)
    }

    fn portfolios(&self) -> Vec<Portfolio> {
        self.positions.portfolios()
    }
}

impl ExternalCandleSource for HistoryEmulationConnector {
    fn supported_ranges(&self, series: &CandleSeries) -> Vec<TimeRange> {
        let key = series.key();
        if self.history_sources.contains(&key) {
            return vec![unbounded_range()];
        }

        let stored = self
            .storage
            .data_types(&series.security_id)
            .into_iter()
            .any(|(data_type, args)| data_type == key.data_type && args.contains(&key.arg));
        if !stored {
            return Vec::new();
        }

        let dates = self.storage.dates(&key);
        match (dates.first(), dates.last()) {
            (Some(first), Some(last)) => {
                let from = first.and_time(chrono::NaiveTime::MIN).and_utc();
                let to = last.and_time(chrono::NaiveTime::MIN).and_utc() + TimeDelta::days(1);
                vec![from..to]
            }
            _ => Vec::new(),
        }
    }

    fn subscribe_candles(
        &self,
        series: &CandleSeries,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> EmulationResult<()> {
        let key = series.key();
        if self.history_sources.contains(&key) {
            debug!(%series, "Candles served by registered history source");
        } else {
            self.subscribe_market_data(key.clone(), from, to)?;
        }
        self.series_consumers.subscribe(&key);
        self.series.write().insert(key, series.clone());
        Ok(())
    }

    /// Drop one consumer of `series`. External delivery continues until the
    /// last consumer leaves.
    fn unsubscribe_candles(&self, series: &CandleSeries) -> EmulationResult<()> {
        let key = series.key();
        let change = self.series_consumers.unsubscribe(&key);
        if change == SubscriberChange::NotSubscribed {
            trace!(%series, "Candle series not subscribed");
            return Ok(());
        }
        if change.is_last() {
            self.series.write().remove(&key);
        }
        if !self.history_sources.contains(&key) {
            self.unsubscribe_market_data(key)?;
        }
        Ok(())
    }

    fn on_new_candles(&self, handler: Handler<CandleBatch>) -> SubscriptionId {
        self.new_candles.subscribe_handler(handler)
    }

    fn on_series_stopped(&self, handler: Handler<CandleSeries>) -> SubscriptionId {
        self.series_stopped.subscribe_handler(handler)
    }

    fn remove_new_candles_handler(&self, id: SubscriptionId) -> bool {
        self.new_candles.unsubscribe(id)
    }

    fn remove_series_stopped_handler(&self, id: SubscriptionId) -> bool {
        self.series_stopped.unsubscribe(id)
    }
}

impl std::fmt::Debug for HistoryEmulationConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryEmulationConnector")
            .field("state", &self.state())
            .field("is_finished", &self.is_finished())
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::CollectionSecurityProvider;
    use crate::storage::InMemoryStorage;
    use chrono::TimeZone;
    use parking_lot::Mutex as PlMutex;
    use rust_decimal_macros::dec;
    use tradepipe_adapter::{AdapterRoles, MockAdapter};
    use tradepipe_core::{
        CandleKind, DataArg, DataType, ExecutionMessage, MessageIter, MessageType, Side,
    };
    use EmulationState::*;

    fn es() -> SecurityId {
        SecurityId::new("ES", "CME")
    }

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, d, 12, 0, 0).unwrap()
    }

    /// Echoes state requests and acknowledges connects, like the replay side.
    fn echo_md() -> Arc<MockAdapter> {
        MockAdapter::with_responder("md", AdapterRoles::MARKET_DATA, |m| match &m.body {
            MessageBody::EmulationState(s) => vec![Message::emulation_state(*s)],
            MessageBody::Connect(_) => vec![Message::connect()],
            _ => Vec::new(),
        })
    }

    fn connector_with(
        md: Arc<MockAdapter>,
        storage: InMemoryStorage,
    ) -> Arc<HistoryEmulationConnector> {
        HistoryEmulationConnector::with_market_data_adapter(
            EmulationConfig::default(),
            Arc::new(CollectionSecurityProvider::default()),
            vec![Portfolio::new("main", dec!(100000))],
            Arc::new(storage),
            md,
        )
        .unwrap()
    }

    fn errors_of(connector: &HistoryEmulationConnector) -> Arc<PlMutex<Vec<String>>> {
        let errors = Arc::new(PlMutex::new(Vec::new()));
        let e = errors.clone();
        connector.subscribe_errors(move |err| e.lock().push(err.to_string()));
        errors
    }

    fn count_stopped(connector: &HistoryEmulationConnector) -> usize {
        connector
            .state_history()
            .iter()
            .filter(|t| t.to == Stopped)
            .count()
    }

    // Test 1: a stray Started echo while Stopped is reported, state unchanged
    #[test]
    fn test_illegal_echo_reported() {
        let md = echo_md();
        let connector = connector_with(md.clone(), InMemoryStorage::new());
        let errors = errors_of(&connector);

        md.emit(Message::emulation_state(Started));

        assert_eq!(connector.state(), Stopped);
        assert_eq!(errors.lock().len(), 1);
        assert!(errors.lock()[0].contains("->"));
        assert!(connector.state_history().is_empty());
    }

    // Test 2: start drives Starting -> Started through the echoes
    #[test]
    fn test_start_and_illegal_start() {
        let md = echo_md();
        let connector = connector_with(md, InMemoryStorage::new());

        connector.start().unwrap();
        assert_eq!(connector.state(), Started);
        assert!(matches!(
            connector.start().unwrap_err(),
            EmulationError::InvalidStateTransition { from: Started, to: Starting }
        ));
    }

    // Test 3: history source registrations are reference counted
    #[test]
    fn test_history_source_ref_counting() {
        let md = echo_md();
        let connector = connector_with(md.clone(), InMemoryStorage::new());
        let key = SubscriptionKey::time_frame(es(), 60);
        let source: HistorySource = Arc::new(|_| -> MessageIter { Box::new(std::iter::empty()) });

        let sources = |md: &MockAdapter| -> Vec<bool> {
            md.received()
                .iter()
                .filter_map(|m| match &m.body {
                    MessageBody::HistorySource(h) => Some(h.is_subscribe),
                    _ => None,
                })
                .collect()
        };

        connector.register_history_source(key.clone(), source.clone()).unwrap();
        connector.register_history_source(key.clone(), source).unwrap();
        assert_eq!(sources(&md), vec![true]);

        connector.unregister_history_source(key.clone()).unwrap();
        assert_eq!(sources(&md), vec![true]);
        assert!(connector.has_history_source(&key));

        connector.unregister_history_source(key.clone()).unwrap();
        assert_eq!(sources(&md), vec![true, false]);
        assert!(!connector.has_history_source(&key));
    }

    // Test 4: two Last messages while Stopping produce one Stopped
    #[test]
    fn test_last_while_stopping_is_idempotent() {
        let md = echo_md();
        let connector = connector_with(md.clone(), InMemoryStorage::new());
        connector.start().unwrap();
        connector.disconnect().unwrap();
        assert_eq!(connector.state(), Stopping);

        md.set_deferred(true);
        md.emit(Message::last(false));
        md.emit(Message::last(false));
        md.flush();

        assert_eq!(connector.state(), Stopped);
        assert_eq!(count_stopped(&connector), 1);
        assert!(!connector.is_finished());
    }

    // Test 5: end of data while Started finishes the run
    #[test]
    fn test_last_while_started_finishes() {
        let md = echo_md();
        let connector = connector_with(md.clone(), InMemoryStorage::new());
        connector.start().unwrap();

        md.emit(Message::last(false));
        assert_eq!(connector.state(), Stopped);
        assert!(connector.is_finished());
        assert_eq!(
            md.received_types()
                .iter()
                .filter(|t| **t == MessageType::Disconnect)
                .count(),
            1
        );

        connector.clear_cache();
        assert!(!connector.is_finished());
        connector.start().unwrap();
        md.emit(Message::last(true));
        assert_eq!(connector.state(), Stopped);
        assert!(!connector.is_finished());
    }

    // Test 6: connecting seeds tracked portfolios through the emulator
    #[test]
    fn test_connect_seeds_portfolios() {
        let md = echo_md();
        let connector = connector_with(md, InMemoryStorage::new());
        let seen = Arc::new(PlMutex::new(Vec::new()));
        let s = seen.clone();
        connector.subscribe_messages(move |m| s.lock().push(m.message_type()));

        connector.connect().unwrap();

        assert!(connector.is_connected());
        let pf = connector.portfolio("main").unwrap();
        assert_eq!(pf.begin_value, dec!(100000));
        assert_eq!(pf.current_value, dec!(100000));
        let seen = seen.lock();
        assert!(seen.contains(&MessageType::Portfolio));
        assert!(seen.contains(&MessageType::PositionChange));
    }

    // Test 7: a fault while Starting stops right after Started
    #[test]
    fn test_fault_during_starting_defers_stop() {
        let md = MockAdapter::with_responder("md", AdapterRoles::MARKET_DATA, |m| match &m.body {
            MessageBody::EmulationState(s) if *s != Started => vec![Message::emulation_state(*s)],
            _ => Vec::new(),
        });
        let connector = connector_with(md.clone(), InMemoryStorage::new());
        let errors = errors_of(&connector);

        connector.start().unwrap();
        assert_eq!(connector.state(), Starting);

        md.emit(Message::error("feed broke"));
        assert_eq!(errors.lock().len(), 1);
        assert_eq!(connector.state(), Starting);

        md.emit(Message::emulation_state(Started));
        assert_eq!(connector.state(), Stopping);
    }

    // Test 8: supported ranges come from sources first, then storage
    #[test]
    fn test_supported_ranges() {
        let storage = InMemoryStorage::new();
        let key = SubscriptionKey::time_frame(es(), 60);
        let candle = |at: DateTime<Utc>| {
            Message::new(CandleMessage {
                security_id: es(),
                kind: CandleKind::TimeFrame,
                arg: DataArg::TimeFrame(60),
                open_time: at,
                close_time: at,
                open: Price::new(dec!(1)),
                high: Price::new(dec!(1)),
                low: Price::new(dec!(1)),
                close: Price::new(dec!(1)),
                total_volume: Volume::new(dec!(1)),
                is_finished: true,
            })
            .at(at)
        };
        storage.insert(key, vec![candle(day(1)), candle(day(3))]).unwrap();
        let connector = connector_with(echo_md(), storage);

        let stored = CandleSeries::time_frame(es(), 60);
        let ranges = connector.supported_ranges(&stored);
        assert_eq!(ranges.len(), 1);
        assert_eq!(
            ranges[0],
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
                ..Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap()
        );

        let missing = CandleSeries::time_frame(es(), 300);
        assert!(connector.supported_ranges(&missing).is_empty());

        connector
            .register_history_source(
                missing.key(),
                Arc::new(|_| -> MessageIter { Box::new(std::iter::empty()) }),
            )
            .unwrap();
        assert_eq!(connector.supported_ranges(&missing), vec![unbounded_range()]);
    }

    // Test 9: candle subscriptions are reference counted per key
    #[test]
    fn test_candle_subscription_ref_counting() {
        let md = echo_md();
        let connector = connector_with(md.clone(), InMemoryStorage::new());
        let series = CandleSeries::time_frame(es(), 60);

        connector.subscribe_candles(&series, Some(day(1)), None).unwrap();
        connector.subscribe_candles(&series, Some(day(1)), None).unwrap();
        connector.unsubscribe_candles(&series).unwrap();

        let requests: Vec<MarketDataMessage> = md
            .received()
            .iter()
            .filter_map(|m| match &m.body {
                MessageBody::MarketData(r) => Some(r.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].from, Some(day(1)));

        connector.unsubscribe_candles(&series).unwrap();
        let last = md
            .received()
            .into_iter()
            .rev()
            .find_map(|m| match m.body {
                MessageBody::MarketData(r) => Some(r),
                _ => None,
            })
            .unwrap();
        assert!(!last.is_subscribe);
        assert_eq!(last.key.data_type, DataType::Candles(CandleKind::TimeFrame));
    }

    // Test 10: tracked candles go to external subscribers when enabled
    #[test]
    fn test_external_candles_bypass_stream() {
        let md = echo_md();
        let connector = connector_with(md.clone(), InMemoryStorage::new());
        connector.set_use_external_candle_source(true);
        let series = CandleSeries::time_frame(es(), 60);
        connector.subscribe_candles(&series, None, None).unwrap();

        let batches = Arc::new(PlMutex::new(Vec::new()));
        let b = batches.clone();
        connector.on_new_candles(Arc::new(move |(s, candles): CandleBatch| {
            b.lock().push((s, candles.len()))
        }));
        let stopped = Arc::new(PlMutex::new(0));
        let st = stopped.clone();
        connector.on_series_stopped(Arc::new(move |_| *st.lock() += 1));
        let published = Arc::new(PlMutex::new(0));
        let p = published.clone();
        connector.subscribe_messages(move |m| {
            if m.message_type() == MessageType::Candle {
                *p.lock() += 1;
            }
        });

        md.emit(
            Message::new(CandleMessage {
                security_id: es(),
                kind: CandleKind::TimeFrame,
                arg: DataArg::TimeFrame(60),
                open_time: day(1),
                close_time: day(1),
                open: Price::new(dec!(1)),
                high: Price::new(dec!(2)),
                low: Price::new(dec!(1)),
                close: Price::new(dec!(2)),
                total_volume: Volume::new(dec!(10)),
                is_finished: true,
            })
            .at(day(1)),
        );

        assert_eq!(*batches.lock(), vec![(series, 1)]);
        assert_eq!(*stopped.lock(), 1);
        assert_eq!(*published.lock(), 0);
    }

    // Test 11: orders flow through the emulator and update snapshots
    #[test]
    fn test_order_round_trip() {
        let md = echo_md();
        let connector = connector_with(md.clone(), InMemoryStorage::new());
        connector.connect().unwrap();
        connector.start().unwrap();

        md.emit(
            Message::new(ExecutionMessage::tick(
                es(),
                Price::new(dec!(5000)),
                Volume::new(dec!(1)),
                None,
            ))
            .at(day(1)),
        );
        let tid = connector
            .register_order(OrderRequest::market(es(), "main", Side::Buy, Volume::new(dec!(2))))
            .unwrap();

        let order = connector.order(tid).unwrap();
        assert_eq!(order.state, tradepipe_core::OrderState::Done);
        assert!(order.balance.is_zero());
        let position = connector.position(&PositionKey::new(es(), "main")).unwrap();
        assert_eq!(position.current_value, dec!(2));
        assert_eq!(connector.portfolio("main").unwrap().current_value, dec!(90000));
    }

    fn tick_at(price: Decimal) -> Message {
        Message::new(ExecutionMessage::tick(
            es(),
            Price::new(price),
            Volume::new(dec!(1)),
            None,
        ))
        .at(day(1))
    }

    fn finished_candle() -> Message {
        Message::new(CandleMessage {
            security_id: es(),
            kind: CandleKind::TimeFrame,
            arg: DataArg::TimeFrame(60),
            open_time: day(1),
            close_time: day(1),
            open: Price::new(dec!(1)),
            high: Price::new(dec!(2)),
            low: Price::new(dec!(1)),
            close: Price::new(dec!(2)),
            total_volume: Volume::new(dec!(10)),
            is_finished: true,
        })
        .at(day(1))
    }

    // Test 12: a fill arriving while Stopping still updates orders and positions
    #[test]
    fn test_fill_while_stopping_is_applied() {
        let md = echo_md();
        let connector = connector_with(md.clone(), InMemoryStorage::new());
        connector.connect().unwrap();
        connector.start().unwrap();

        md.emit(tick_at(dec!(5000)));
        let tid = connector
            .register_order(OrderRequest::limit(
                es(),
                "main",
                Side::Buy,
                Price::new(dec!(4990)),
                Volume::new(dec!(2)),
            ))
            .unwrap();
        assert_eq!(
            connector.order(tid).unwrap().state,
            tradepipe_core::OrderState::Active
        );

        let published = Arc::new(PlMutex::new(Vec::new()));
        let p = published.clone();
        connector.subscribe_messages(move |m| p.lock().push(m.message_type()));

        connector.disconnect().unwrap();
        assert_eq!(connector.state(), Stopping);
        md.emit(tick_at(dec!(4980)));

        let order = connector.order(tid).unwrap();
        assert_eq!(order.state, tradepipe_core::OrderState::Done);
        let position = connector.position(&PositionKey::new(es(), "main")).unwrap();
        assert_eq!(position.current_value, dec!(2));
        let published = published.lock();
        assert!(published.contains(&MessageType::Execution));
        assert!(published.contains(&MessageType::PositionChange));

        drop(published);
        md.emit(Message::new(PortfolioMessage {
            portfolio_name: "late".to_string(),
            board: None,
            is_subscribe: true,
        }));
        assert!(connector.portfolio("late").is_none());
    }

    // Test 13: end of data racing a user stop requests each stop state once
    #[test]
    fn test_last_racing_disconnect_requests_stop_once() {
        let md = echo_md();
        let connector = connector_with(md.clone(), InMemoryStorage::new());
        let errors = errors_of(&connector);
        connector.start().unwrap();

        md.set_deferred(true);
        connector.disconnect().unwrap();
        md.emit(Message::last(false));
        assert_eq!(connector.state(), Started);
        md.flush();

        assert_eq!(connector.state(), Stopped);
        assert_eq!(count_stopped(&connector), 1);
        assert!(errors.lock().is_empty());
        let stopping_requests = md
            .received()
            .iter()
            .filter(|m| matches!(m.body, MessageBody::EmulationState(Stopping)))
            .count();
        assert_eq!(stopping_requests, 1);

        // A fresh run may stop again.
        md.set_deferred(false);
        connector.start().unwrap();
        md.emit(Message::last(false));
        assert_eq!(connector.state(), Stopped);
        assert_eq!(count_stopped(&connector), 2);
        assert!(errors.lock().is_empty());
    }

    // Test 14: a duplicate Stopped echo is rejected and reported
    #[test]
    fn test_duplicate_stopped_echo_reported() {
        let md = echo_md();
        let connector = connector_with(md.clone(), InMemoryStorage::new());
        let errors = errors_of(&connector);
        connector.start().unwrap();
        md.emit(Message::last(false));
        assert_eq!(connector.state(), Stopped);

        md.emit(Message::emulation_state(Stopped));

        assert_eq!(connector.state(), Stopped);
        assert_eq!(errors.lock().len(), 1);
        assert_eq!(count_stopped(&connector), 1);
    }

    // Test 15: external delivery lasts until the last candle consumer leaves
    #[test]
    fn test_sourced_series_kept_for_remaining_consumer() {
        let md = echo_md();
        let connector = connector_with(md.clone(), InMemoryStorage::new());
        connector.set_use_external_candle_source(true);
        let series = CandleSeries::time_frame(es(), 60);
        connector
            .register_history_source(
                series.key(),
                Arc::new(|_| -> MessageIter { Box::new(std::iter::empty()) }),
            )
            .unwrap();

        let delivered = Arc::new(PlMutex::new(0));
        let d = delivered.clone();
        connector.on_new_candles(Arc::new(move |_| *d.lock() += 1));
        let published = Arc::new(PlMutex::new(0));
        let p = published.clone();
        connector.subscribe_messages(move |m| {
            if m.message_type() == MessageType::Candle {
                *p.lock() += 1;
            }
        });

        connector.subscribe_candles(&series, None, None).unwrap();
        connector.subscribe_candles(&series, None, None).unwrap();
        connector.unsubscribe_candles(&series).unwrap();
        md.emit(finished_candle());
        assert_eq!(*delivered.lock(), 1);
        assert_eq!(*published.lock(), 0);

        connector.unsubscribe_candles(&series).unwrap();
        md.emit(finished_candle());
        assert_eq!(*delivered.lock(), 1);
        assert_eq!(*published.lock(), 1);

        // Unknown series is ignored.
        connector.unsubscribe_candles(&series).unwrap();
        assert!(!md
            .received()
            .iter()
            .any(|m| matches!(m.body, MessageBody::MarketData(_))));
    }
}
