//! Pipeline message model.
//!
//! A `Message` is an envelope (ingress time + basket back-reference) around
//! a `MessageBody` tagged union. Commands flow inward through the adapter
//! chain, executions and market data flow outward.
//!
//! Timestamps use `DateTime::<Utc>::default()` (Unix epoch) as the "unset"
//! value.

use crate::decimal::{Price, Volume};
use crate::ids::{AdapterId, SecurityId, TransactionId};
use crate::market_data::{CandleKind, DataArg, Level1Field, Quote, SubscriptionKey};
use crate::order::{ExecutionType, OrderState, OrderType, Side};
use crate::state::EmulationState;
use chrono::{DateTime, TimeDelta, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Lazy, finite, non-restartable message sequence.
pub type MessageIter = Box<dyn Iterator<Item = Message> + Send>;

/// User supplied history callback: given the replay start boundary, yields
/// the messages to inject.
pub type HistorySource = Arc<dyn Fn(DateTime<Utc>) -> MessageIter + Send + Sync>;

// ============================================================================
// Envelope
// ============================================================================

/// Message envelope.
#[derive(Debug, Clone)]
pub struct Message {
    /// Time assigned at ingress. Epoch means "not yet stamped".
    pub local_time: DateTime<Utc>,
    /// Child adapter that produced / should consume this message.
    pub adapter: Option<AdapterId>,
    pub body: MessageBody,
}

impl Message {
    pub fn new(body: impl Into<MessageBody>) -> Self {
        Self {
            local_time: DateTime::<Utc>::default(),
            adapter: None,
            body: body.into(),
        }
    }

    /// Builder-style local time assignment.
    #[must_use]
    pub fn at(mut self, local_time: DateTime<Utc>) -> Self {
        self.local_time = local_time;
        self
    }

    /// Builder-style adapter targeting.
    #[must_use]
    pub fn for_adapter(mut self, adapter: AdapterId) -> Self {
        self.adapter = Some(adapter);
        self
    }

    #[must_use]
    pub fn has_local_time(&self) -> bool {
        self.local_time != DateTime::<Utc>::default()
    }

    #[must_use]
    pub fn message_type(&self) -> MessageType {
        self.body.message_type()
    }

    pub fn connect() -> Self {
        Self::new(ConnectMessage::default())
    }

    pub fn disconnect() -> Self {
        Self::new(DisconnectMessage::default())
    }

    pub fn reset() -> Self {
        Self::new(MessageBody::Reset)
    }

    pub fn time(local_time: DateTime<Utc>) -> Self {
        Self::new(MessageBody::Time).at(local_time)
    }

    pub fn clearing() -> Self {
        Self::new(MessageBody::Clearing)
    }

    pub fn emulation_state(state: EmulationState) -> Self {
        Self::new(MessageBody::EmulationState(state))
    }

    pub fn last(is_error: bool) -> Self {
        Self::new(LastMessage { is_error })
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self::new(ErrorMessage {
            error: error.into(),
        })
    }

    pub fn as_execution(&self) -> Option<&ExecutionMessage> {
        match &self.body {
            MessageBody::Execution(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_execution_mut(&mut self) -> Option<&mut ExecutionMessage> {
        match &mut self.body {
            MessageBody::Execution(m) => Some(m),
            _ => None,
        }
    }

    /// Security the message refers to, if any.
    pub fn security_id(&self) -> Option<&SecurityId> {
        match &self.body {
            MessageBody::OrderRegister(m) => Some(&m.security_id),
            MessageBody::OrderReplace(m) => Some(&m.security_id),
            MessageBody::OrderCancel(m) => Some(&m.security_id),
            MessageBody::Execution(m) => Some(&m.security_id),
            MessageBody::Security(m) => Some(&m.security_id),
            MessageBody::Level1Change(m) => Some(&m.security_id),
            MessageBody::QuoteChange(m) => Some(&m.security_id),
            MessageBody::Candle(m) => Some(&m.security_id),
            MessageBody::PositionChange(m) => Some(&m.security_id),
            MessageBody::MarketData(m) => Some(&m.key.security_id),
            MessageBody::HistorySource(m) => Some(&m.key.security_id),
            _ => None,
        }
    }

    /// Market data payload: anything a history feed replays.
    #[must_use]
    pub fn is_market_data(&self) -> bool {
        match &self.body {
            MessageBody::Security(_)
            | MessageBody::Board(_)
            | MessageBody::Level1Change(_)
            | MessageBody::QuoteChange(_)
            | MessageBody::Candle(_)
            | MessageBody::Time => true,
            MessageBody::Execution(m) => m.execution_type == ExecutionType::Tick,
            _ => false,
        }
    }
}

// ============================================================================
// Body
// ============================================================================

/// Message kind discriminant, used for logging and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Connect,
    Disconnect,
    Reset,
    OrderRegister,
    OrderReplace,
    OrderPairReplace,
    OrderCancel,
    Execution,
    Security,
    Board,
    Level1Change,
    QuoteChange,
    Candle,
    Time,
    MarketData,
    Portfolio,
    PositionChange,
    EmulationState,
    HistorySource,
    Clearing,
    Last,
    Error,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::Reset => "reset",
            Self::OrderRegister => "order_register",
            Self::OrderReplace => "order_replace",
            Self::OrderPairReplace => "order_pair_replace",
            Self::OrderCancel => "order_cancel",
            Self::Execution => "execution",
            Self::Security => "security",
            Self::Board => "board",
            Self::Level1Change => "level1_change",
            Self::QuoteChange => "quote_change",
            Self::Candle => "candle",
            Self::Time => "time",
            Self::MarketData => "market_data",
            Self::Portfolio => "portfolio",
            Self::PositionChange => "position_change",
            Self::EmulationState => "emulation_state",
            Self::HistorySource => "history_source",
            Self::Clearing => "clearing",
            Self::Last => "last",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub enum MessageBody {
    Connect(ConnectMessage),
    Disconnect(DisconnectMessage),
    Reset,
    OrderRegister(OrderRegisterMessage),
    OrderReplace(OrderReplaceMessage),
    OrderPairReplace(OrderPairReplaceMessage),
    OrderCancel(OrderCancelMessage),
    Execution(ExecutionMessage),
    Security(SecurityMessage),
    Board(BoardMessage),
    Level1Change(Level1ChangeMessage),
    QuoteChange(QuoteChangeMessage),
    Candle(CandleMessage),
    /// Replay clock tick; the time is the envelope's local time.
    Time,
    MarketData(MarketDataMessage),
    Portfolio(PortfolioMessage),
    PositionChange(PositionChangeMessage),
    EmulationState(EmulationState),
    HistorySource(HistorySourceMessage),
    Clearing,
    Last(LastMessage),
    Error(ErrorMessage),
}

impl MessageBody {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Connect(_) => MessageType::Connect,
            Self::Disconnect(_) => MessageType::Disconnect,
            Self::Reset => MessageType::Reset,
            Self::OrderRegister(_) => MessageType::OrderRegister,
            Self::OrderReplace(_) => MessageType::OrderReplace,
            Self::OrderPairReplace(_) => MessageType::OrderPairReplace,
            Self::OrderCancel(_) => MessageType::OrderCancel,
            Self::Execution(_) => MessageType::Execution,
            Self::Security(_) => MessageType::Security,
            Self::Board(_) => MessageType::Board,
            Self::Level1Change(_) => MessageType::Level1Change,
            Self::QuoteChange(_) => MessageType::QuoteChange,
            Self::Candle(_) => MessageType::Candle,
            Self::Time => MessageType::Time,
            Self::MarketData(_) => MessageType::MarketData,
            Self::Portfolio(_) => MessageType::Portfolio,
            Self::PositionChange(_) => MessageType::PositionChange,
            Self::EmulationState(_) => MessageType::EmulationState,
            Self::HistorySource(_) => MessageType::HistorySource,
            Self::Clearing => MessageType::Clearing,
            Self::Last(_) => MessageType::Last,
            Self::Error(_) => MessageType::Error,
        }
    }
}

macro_rules! impl_into_body {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for MessageBody {
                fn from(m: $ty) -> Self {
                    MessageBody::$variant(m)
                }
            }
        )*
    };
}

impl_into_body! {
    ConnectMessage => Connect,
    DisconnectMessage => Disconnect,
    OrderRegisterMessage => OrderRegister,
    OrderReplaceMessage => OrderReplace,
    OrderPairReplaceMessage => OrderPairReplace,
    OrderCancelMessage => OrderCancel,
    ExecutionMessage => Execution,
    SecurityMessage => Security,
    BoardMessage => Board,
    Level1ChangeMessage => Level1Change,
    QuoteChangeMessage => QuoteChange,
    CandleMessage => Candle,
    MarketDataMessage => MarketData,
    PortfolioMessage => Portfolio,
    PositionChangeMessage => PositionChange,
    EmulationState => EmulationState,
    HistorySourceMessage => HistorySource,
    LastMessage => Last,
    ErrorMessage => Error,
}

// ============================================================================
// Connection control
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct ConnectMessage {
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DisconnectMessage {
    pub error: Option<String>,
}

// ============================================================================
// Order commands
// ============================================================================

#[derive(Debug, Clone)]
pub struct OrderRegisterMessage {
    pub transaction_id: TransactionId,
    pub security_id: SecurityId,
    pub portfolio_name: String,
    pub side: Side,
    pub order_type: OrderType,
    pub price: Price,
    pub volume: Volume,
    pub comment: Option<String>,
}

/// Cancel of `old_transaction_id` plus registration under `transaction_id`.
#[derive(Debug, Clone)]
pub struct OrderReplaceMessage {
    pub transaction_id: TransactionId,
    pub old_transaction_id: TransactionId,
    pub security_id: SecurityId,
    pub portfolio_name: String,
    pub side: Side,
    pub order_type: OrderType,
    pub price: Price,
    pub volume: Volume,
}

#[derive(Debug, Clone)]
pub struct OrderPairReplaceMessage {
    pub message1: OrderReplaceMessage,
    pub message2: OrderReplaceMessage,
}

#[derive(Debug, Clone)]
pub struct OrderCancelMessage {
    pub transaction_id: TransactionId,
    /// Transaction id of the order being cancelled.
    pub order_transaction_id: TransactionId,
    pub security_id: SecurityId,
    pub portfolio_name: String,
}

// ============================================================================
// Execution reports
// ============================================================================

/// Order or trade event.
///
/// `commission` and `latency` are enrichment slots: each is assigned at most
/// once, by the first layer that sees it unset.
#[derive(Debug, Clone)]
pub struct ExecutionMessage {
    pub security_id: SecurityId,
    pub portfolio_name: String,
    pub server_time: DateTime<Utc>,
    pub transaction_id: TransactionId,
    pub original_transaction_id: TransactionId,
    pub execution_type: ExecutionType,
    pub order_state: Option<OrderState>,
    pub order_id: Option<u64>,
    pub side: Option<Side>,
    pub order_price: Price,
    pub order_volume: Option<Volume>,
    /// Unfilled remainder.
    pub balance: Option<Volume>,
    pub trade_id: Option<u64>,
    pub trade_price: Option<Price>,
    pub trade_volume: Option<Volume>,
    pub commission: Option<Decimal>,
    pub latency: Option<TimeDelta>,
    pub error: Option<String>,
}

impl ExecutionMessage {
    fn blank(execution_type: ExecutionType, security_id: SecurityId) -> Self {
        Self {
            security_id,
            portfolio_name: String::new(),
            server_time: DateTime::<Utc>::default(),
            transaction_id: 0,
            original_transaction_id: 0,
            execution_type,
            order_state: None,
            order_id: None,
            side: None,
            order_price: Price::ZERO,
            order_volume: None,
            balance: None,
            trade_id: None,
            trade_price: None,
            trade_volume: None,
            commission: None,
            latency: None,
            error: None,
        }
    }

    /// Order state report answering `original_transaction_id`.
    pub fn order(
        security_id: SecurityId,
        original_transaction_id: TransactionId,
        state: OrderState,
    ) -> Self {
        Self {
            original_transaction_id,
            order_state: Some(state),
            ..Self::blank(ExecutionType::Order, security_id)
        }
    }

    /// Own trade report.
    pub fn trade(
        security_id: SecurityId,
        original_transaction_id: TransactionId,
        price: Price,
        volume: Volume,
    ) -> Self {
        Self {
            original_transaction_id,
            trade_price: Some(price),
            trade_volume: Some(volume),
            ..Self::blank(ExecutionType::Trade, security_id)
        }
    }

    /// Anonymous market trade.
    pub fn tick(security_id: SecurityId, price: Price, volume: Volume, side: Option<Side>) -> Self {
        Self {
            trade_price: Some(price),
            trade_volume: Some(volume),
            side,
            ..Self::blank(ExecutionType::Tick, security_id)
        }
    }

    #[must_use]
    pub fn has_order_info(&self) -> bool {
        self.execution_type == ExecutionType::Order
    }

    #[must_use]
    pub fn has_trade_info(&self) -> bool {
        self.execution_type == ExecutionType::Trade
    }
}

// ============================================================================
// Market data
// ============================================================================

#[derive(Debug, Clone)]
pub struct SecurityMessage {
    pub security_id: SecurityId,
    pub name: Option<String>,
    pub price_step: Option<Price>,
    pub volume_step: Option<Volume>,
}

#[derive(Debug, Clone)]
pub struct BoardMessage {
    pub code: String,
    pub exchange: String,
}

#[derive(Debug, Clone)]
pub struct Level1ChangeMessage {
    pub security_id: SecurityId,
    pub server_time: DateTime<Utc>,
    pub changes: BTreeMap<Level1Field, Decimal>,
}

impl Level1ChangeMessage {
    pub fn new(security_id: SecurityId, server_time: DateTime<Utc>) -> Self {
        Self {
            security_id,
            server_time,
            changes: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn add(mut self, field: Level1Field, value: Decimal) -> Self {
        self.changes.insert(field, value);
        self
    }
}

#[derive(Debug, Clone)]
pub struct QuoteChangeMessage {
    pub security_id: SecurityId,
    pub server_time: DateTime<Utc>,
    /// Best first.
    pub bids: Vec<Quote>,
    /// Best first.
    pub asks: Vec<Quote>,
}

#[derive(Debug, Clone)]
pub struct CandleMessage {
    pub security_id: SecurityId,
    pub kind: CandleKind,
    pub arg: DataArg,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    pub total_volume: Volume,
    pub is_finished: bool,
}

impl CandleMessage {
    /// Subscription key this candle belongs to.
    pub fn key(&self) -> SubscriptionKey {
        SubscriptionKey::new(
            self.security_id.clone(),
            crate::market_data::DataType::Candles(self.kind),
            self.arg.clone(),
        )
    }
}

/// Market data (un)subscription request.
#[derive(Debug, Clone)]
pub struct MarketDataMessage {
    pub key: SubscriptionKey,
    pub is_subscribe: bool,
    pub transaction_id: TransactionId,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl MarketDataMessage {
    pub fn subscribe(key: SubscriptionKey, transaction_id: TransactionId) -> Self {
        Self {
            key,
            is_subscribe: true,
            transaction_id,
            from: None,
            to: None,
            error: None,
        }
    }

    pub fn unsubscribe(key: SubscriptionKey, transaction_id: TransactionId) -> Self {
        Self {
            is_subscribe: false,
            ..Self::subscribe(key, transaction_id)
        }
    }
}

// ============================================================================
// Portfolio / positions
// ============================================================================

#[derive(Debug, Clone)]
pub struct PortfolioMessage {
    pub portfolio_name: String,
    pub board: Option<String>,
    pub is_subscribe: bool,
}

/// Position change field identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PositionChangeKind {
    BeginValue,
    CurrentValue,
    BlockedValue,
    AveragePrice,
    RealizedPnL,
    Commission,
}

#[derive(Debug, Clone)]
pub struct PositionChangeMessage {
    pub security_id: SecurityId,
    pub portfolio_name: String,
    pub server_time: DateTime<Utc>,
    pub changes: BTreeMap<PositionChangeKind, Decimal>,
}

impl PositionChangeMessage {
    pub fn new(
        security_id: SecurityId,
        portfolio_name: impl Into<String>,
        server_time: DateTime<Utc>,
    ) -> Self {
        Self {
            security_id,
            portfolio_name: portfolio_name.into(),
            server_time,
            changes: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn add(mut self, kind: PositionChangeKind, value: Decimal) -> Self {
        self.changes.insert(kind, value);
        self
    }

    pub fn get(&self, kind: PositionChangeKind) -> Option<Decimal> {
        self.changes.get(&kind).copied()
    }
}

// ============================================================================
// Emulation control vocabulary
// ============================================================================

/// Register (or clear) a user supplied history source for a key.
#[derive(Clone)]
pub struct HistorySourceMessage {
    pub is_subscribe: bool,
    pub key: SubscriptionKey,
    pub source: Option<HistorySource>,
}

impl fmt::Debug for HistorySourceMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistorySourceMessage")
            .field("is_subscribe", &self.is_subscribe)
            .field("key", &self.key)
            .field("source", &self.source.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

/// End of history data.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastMessage {
    pub is_error: bool,
}

/// Error reported by a pipeline stage.
#[derive(Debug, Clone)]
pub struct ErrorMessage {
    pub error: String,
}
