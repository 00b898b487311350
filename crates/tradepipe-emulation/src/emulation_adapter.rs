//! Market emulator on the transaction side of the emulation basket.
//!
//! Keeps the last price per security from replayed market data and answers
//! order commands with execution reports:
//! - a marketable order fills in full at the last price (trade, then `Done`)
//! - a resting limit order fills at its own price once the market crosses it
//! - every fill is followed by a position change for the security and one
//!   for the portfolio's money position
//!
//! Market data, portfolio and position messages are echoed so downstream
//! consumers see them in the same stream as the executions they caused.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};
use tradepipe_adapter::{
    AdapterError, AdapterResult, AdapterRoles, MessageAdapter, OutHandler, SharedAdapter,
};
use tradepipe_core::{
    AdapterId, Clock, ConnectMessage, DisconnectMessage, EmulationClock, ExecutionMessage,
    ExecutionType, Level1Field, Message, MessageBody, Observers, OrderCancelMessage,
    OrderRegisterMessage, OrderReplaceMessage, OrderState, OrderType, PositionChangeKind,
    PositionChangeMessage, PositionKey, Price, SecurityId, Side, SubscriptionId, TransactionId,
    Volume,
};
use tradepipe_telemetry::Metrics;

const ADAPTER_NAME: &str = "emulator";

#[derive(Debug, Clone)]
struct RestingOrder {
    transaction_id: TransactionId,
    order_id: u64,
    security_id: SecurityId,
    portfolio_name: String,
    side: Side,
    order_type: OrderType,
    price: Price,
    volume: Volume,
}

impl RestingOrder {
    /// Fill price against `last`, if the order crosses it.
    fn fill_price(&self, last: Price, on_arrival: bool) -> Option<Price> {
        let crosses = match (self.order_type, self.side) {
            (OrderType::Market, _) => true,
            (OrderType::Limit, Side::Buy) => self.price >= last,
            (OrderType::Limit, Side::Sell) => self.price <= last,
        };
        match crosses {
            false => None,
            true if on_arrival || self.order_type == OrderType::Market => Some(last),
            true => Some(self.price),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Holding {
    volume: Decimal,
    average_price: Decimal,
    realized_pnl: Decimal,
}

impl Holding {
    fn apply_fill(&mut self, signed_volume: Decimal, price: Decimal) {
        let before = self.volume;
        let after = before + signed_volume;
        let same_direction =
            before.is_zero() || before.is_sign_positive() == signed_volume.is_sign_positive();

        if same_direction {
            self.average_price = if after.is_zero() {
                Decimal::ZERO
            } else {
                (before * self.average_price + signed_volume * price) / after
            };
        } else {
            let closed = signed_volume.abs().min(before.abs());
            let direction = if before.is_sign_positive() {
                Decimal::ONE
            } else {
                -Decimal::ONE
            };
            self.realized_pnl += closed * (price - self.average_price) * direction;
            if after.is_zero() {
                self.average_price = Decimal::ZERO;
            } else if after.is_sign_positive() != before.is_sign_positive() {
                self.average_price = price;
            }
        }
        self.volume = after;
    }
}

#[derive(Default)]
struct Book {
    last_prices: HashMap<SecurityId, Price>,
    orders: BTreeMap<TransactionId, RestingOrder>,
    holdings: HashMap<PositionKey, Holding>,
    money: HashMap<String, Decimal>,
    next_order_id: u64,
    next_trade_id: u64,
}

impl Book {
    fn order_report(
        &self,
        order: &RestingOrder,
        original_transaction_id: TransactionId,
        state: OrderState,
        balance: Volume,
        now: DateTime<Utc>,
    ) -> Message {
        let mut report =
            ExecutionMessage::order(order.security_id.clone(), original_transaction_id, state);
        report.transaction_id = order.transaction_id;
        report.portfolio_name = order.portfolio_name.clone();
        report.server_time = now;
        report.order_id = Some(order.order_id);
        report.side = Some(order.side);
        report.order_price = order.price;
        report.order_volume = Some(order.volume);
        report.balance = Some(balance);
        Message::new(report).at(now)
    }

    fn rejection(
        security_id: &SecurityId,
        portfolio_name: &str,
        transaction_id: TransactionId,
        error: String,
        now: DateTime<Utc>,
    ) -> Message {
        debug!(transaction_id, %error, "Order request rejected");
        let mut report =
            ExecutionMessage::order(security_id.clone(), transaction_id, OrderState::Failed);
        report.transaction_id = transaction_id;
        report.portfolio_name = portfolio_name.to_string();
        report.server_time = now;
        report.error = Some(error);
        Message::new(report).at(now)
    }

    /// Accept an order answering request `original`, filling it right away
    /// when marketable.
    fn accept(
        &mut self,
        request: &OrderRegisterMessage,
        original: TransactionId,
        now: DateTime<Utc>,
        out: &mut Vec<Message>,
    ) {
        if request.volume.inner() <= Decimal::ZERO {
            out.push(Self::rejection(
                &request.security_id,
                &request.portfolio_name,
                request.transaction_id,
                format!("invalid volume {}", request.volume),
                now,
            ));
            return;
        }
        let last = self.last_prices.get(&request.security_id).copied();
        if request.order_type == OrderType::Market && last.is_none() {
            out.push(Self::rejection(
                &request.security_id,
                &request.portfolio_name,
                request.transaction_id,
                format!("no market price for {}", request.security_id),
                now,
            ));
            return;
        }

        self.next_order_id += 1;
        let order = RestingOrder {
            transaction_id: request.transaction_id,
            order_id: self.next_order_id,
            security_id: request.security_id.clone(),
            portfolio_name: request.portfolio_name.clone(),
            side: request.side,
            order_type: request.order_type,
            price: request.price,
            volume: request.volume,
        };
        out.push(self.order_report(&order, original, OrderState::Active, order.volume, now));

        match last.and_then(|last| order.fill_price(last, true)) {
            Some(price) => self.fill(&order, price, now, out),
            None => {
                trace!(transaction_id = order.transaction_id, price = %order.price, "Order resting");
                self.orders.insert(order.transaction_id, order);
            }
        }
    }

    fn fill(
        &mut self,
        order: &RestingOrder,
        price: Price,
        now: DateTime<Utc>,
        out: &mut Vec<Message>,
    ) {
        self.next_trade_id += 1;
        let mut trade = ExecutionMessage::trade(
            order.security_id.clone(),
            order.transaction_id,
            price,
            order.volume,
        );
        trade.transaction_id = order.transaction_id;
        trade.portfolio_name = order.portfolio_name.clone();
        trade.server_time = now;
        trade.order_id = Some(order.order_id);
        trade.trade_id = Some(self.next_trade_id);
        trade.side = Some(order.side);
        trade.order_price = order.price;
        trade.order_volume = Some(order.volume);
        out.push(Message::new(trade).at(now));
        out.push(self.order_report(
            order,
            order.transaction_id,
            OrderState::Done,
            Volume::ZERO,
            now,
        ));

        let signed = order.volume.inner() * Decimal::from(order.side.sign());
        let key = PositionKey::new(order.security_id.clone(), order.portfolio_name.clone());
        let holding = self.holdings.entry(key).or_default();
        holding.apply_fill(signed, price.inner());
        let holding = *holding;

        let money = self.money.entry(order.portfolio_name.clone()).or_default();
        *money -= signed * price.inner();
        let money = *money;

        debug!(
            transaction_id = order.transaction_id,
            security = %order.security_id,
            side = %order.side,
            price = %price,
            volume = %order.volume,
            "Order filled"
        );

        out.push(
            Message::new(
                PositionChangeMessage::new(
                    order.security_id.clone(),
                    order.portfolio_name.clone(),
                    now,
                )
                .add(PositionChangeKind::CurrentValue, holding.volume)
                .add(PositionChangeKind::AveragePrice, holding.average_price)
                .add(PositionChangeKind::RealizedPnL, holding.realized_pnl),
            )
            .at(now),
        );
        out.push(
            Message::new(
                PositionChangeMessage::new(SecurityId::money(), order.portfolio_name.clone(), now)
                    .add(PositionChangeKind::CurrentValue, money),
            )
            .at(now),
        );
    }

    /// Record a new last price and fill resting orders it crosses.
    fn on_price(
        &mut self,
        security_id: &SecurityId,
        last: Price,
        now: DateTime<Utc>,
        out: &mut Vec<Message>,
    ) {
        self.last_prices.insert(security_id.clone(), last);
        let crossed: Vec<(RestingOrder, Price)> = self
            .orders
            .values()
            .filter(|o| &o.security_id == security_id)
            .filter_map(|o| o.fill_price(last, false).map(|p| (o.clone(), p)))
            .collect();
        for (order, price) in crossed {
            self.orders.remove(&order.transaction_id);
            self.fill(&order, price, now, out);
        }
    }

    fn cancel(
        &mut self,
        request: &OrderCancelMessage,
        now: DateTime<Utc>,
        out: &mut Vec<Message>,
    ) {
        match self.orders.remove(&request.order_transaction_id) {
            Some(order) => {
                debug!(transaction_id = order.transaction_id, "Order cancelled");
                out.push(self.order_report(
                    &order,
                    request.transaction_id,
                    OrderState::Done,
                    order.volume,
                    now,
                ));
            }
            None => out.push(Self::rejection(
                &request.security_id,
                &request.portfolio_name,
                request.transaction_id,
                format!("order {} not found", request.order_transaction_id),
                now,
            )),
        }
    }

    fn replace(
        &mut self,
        request: &OrderReplaceMessage,
        now: DateTime<Utc>,
        out: &mut Vec<Message>,
    ) {
        let Some(old) = self.orders.remove(&request.old_transaction_id) else {
            out.push(Self::rejection(
                &request.security_id,
                &request.portfolio_name,
                request.transaction_id,
                format!("order {} not found", request.old_transaction_id),
                now,
            ));
            return;
        };
        out.push(self.order_report(&old, request.transaction_id, OrderState::Done, old.volume, now));
        self.accept(&registration(request), request.transaction_id, now, out);
    }
}

fn registration(request: &OrderReplaceMessage) -> OrderRegisterMessage {
    OrderRegisterMessage {
        transaction_id: request.transaction_id,
        security_id: request.security_id.clone(),
        portfolio_name: request.portfolio_name.clone(),
        side: request.side,
        order_type: request.order_type,
        price: request.price,
        volume: request.volume,
        comment: None,
    }
}

/// Last price carried by a market data message.
fn last_price(message: &Message) -> Option<(SecurityId, Price)> {
    match &message.body {
        MessageBody::Level1Change(m) => m
            .changes
            .get(&Level1Field::LastTradePrice)
            .or_else(|| m.changes.get(&Level1Field::ClosePrice))
            .map(|p| (m.security_id.clone(), Price::new(*p))),
        MessageBody::QuoteChange(m) => {
            let price = match (m.bids.first(), m.asks.first()) {
                (Some(bid), Some(ask)) => {
                    Price::new((bid.price.inner() + ask.price.inner()) / Decimal::from(2))
                }
                (Some(q), None) | (None, Some(q)) => q.price,
                (None, None) => return None,
            };
            Some((m.security_id.clone(), price))
        }
        MessageBody::Candle(m) => Some((m.security_id.clone(), m.close)),
        MessageBody::Execution(m) if m.execution_type == ExecutionType::Tick => {
            m.trade_price.map(|p| (m.security_id.clone(), p))
        }
        _ => None,
    }
}

pub struct EmulationMessageAdapter {
    id: AdapterId,
    clock: Arc<EmulationClock>,
    book: Mutex<Book>,
    out: Observers<Message>,
    processed: AtomicU64,
    disposed: AtomicBool,
}

impl EmulationMessageAdapter {
    pub fn new(clock: Arc<EmulationClock>) -> Arc<Self> {
        Arc::new(Self {
            id: AdapterId::next(),
            clock,
            book: Mutex::new(Book::default()),
            out: Observers::new(),
            processed: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn processed_message_count(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn last_price(&self, security_id: &SecurityId) -> Option<Price> {
        self.book.lock().last_prices.get(security_id).copied()
    }

    #[must_use]
    pub fn resting_order_count(&self) -> usize {
        self.book.lock().orders.len()
    }

    /// Replies for one inbound message. Runs under the book lock.
    fn process(&self, message: Message) -> Vec<Message> {
        let now = self.clock.now();
        let mut out = Vec::new();
        let mut book = self.book.lock();

        if let Some((security_id, price)) = last_price(&message) {
            out.push(message.clone());
            book.on_price(&security_id, price, now, &mut out);
            return out;
        }

        match message.body {
            MessageBody::Connect(_) => out.push(Message::new(ConnectMessage::default()).at(now)),
            MessageBody::Disconnect(_) => {
                out.push(Message::new(DisconnectMessage::default()).at(now))
            }
            MessageBody::Reset => {
                *book = Book::default();
                debug!("Emulator reset");
            }
            MessageBody::OrderRegister(request) => {
                let original = request.transaction_id;
                book.accept(&request, original, now, &mut out);
            }
            MessageBody::OrderCancel(request) => book.cancel(&request, now, &mut out),
            MessageBody::OrderReplace(request) => book.replace(&request, now, &mut out),
            MessageBody::OrderPairReplace(pair) => {
                let missing = [&pair.message1, &pair.message2]
                    .into_iter()
                    .any(|leg| !book.orders.contains_key(&leg.old_transaction_id));
                if missing {
                    for leg in [&pair.message1, &pair.message2] {
                        out.push(Book::rejection(
                            &leg.security_id,
                            &leg.portfolio_name,
                            leg.transaction_id,
                            "pair replace leg not found".to_string(),
                            now,
                        ));
                    }
                } else {
                    book.replace(&pair.message1, now, &mut out);
                    book.replace(&pair.message2, now, &mut out);
                }
            }
            MessageBody::PositionChange(ref change) => {
                if change.security_id.is_money() {
                    if let Some(current) = change.get(PositionChangeKind::CurrentValue) {
                        book.money.insert(change.portfolio_name.clone(), current);
                    }
                }
                out.push(message);
            }
            MessageBody::Portfolio(_)
            | MessageBody::Security(_)
            | MessageBody::Board(_)
            | MessageBody::Time => out.push(message),
            _ => trace!(kind = %message.message_type(), "Emulator ignores message"),
        }
        out
    }
}

impl MessageAdapter for EmulationMessageAdapter {
    fn id(&self) -> AdapterId {
        self.id
    }

    fn name(&self) -> &str {
        ADAPTER_NAME
    }

    fn roles(&self) -> AdapterRoles {
        AdapterRoles::TRANSACTIONS
    }

    fn send_in_message(&self, message: Message) -> AdapterResult<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(AdapterError::Disposed(ADAPTER_NAME.to_string()));
        }
        self.processed.fetch_add(1, Ordering::Relaxed);
        Metrics::message_processed(ADAPTER_NAME, message.message_type().as_str());

        // Replies are published after the book lock is released: handlers
        // may send follow-up commands straight back into this adapter.
        for reply in self.process(message) {
            self.out.notify(reply);
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
        Ok(Self::new(self.clock.clone()))
    }

    fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::AcqRel) {
            self.out.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use parking_lot::Mutex as PlMutex;
    use rust_decimal_macros::dec;
    use tradepipe_core::{
        Level1ChangeMessage, OrderPairReplaceMessage, Quote, QuoteChangeMessage,
    };

    fn es() -> SecurityId {
        SecurityId::new("ES", "CME")
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
    }

    fn emulator() -> (Arc<EmulationMessageAdapter>, Arc<PlMutex<Vec<Message>>>) {
        let emulator = EmulationMessageAdapter::new(Arc::new(EmulationClock::new(now())));
        let seen = Arc::new(PlMutex::new(Vec::new()));
        let s = seen.clone();
        emulator.subscribe(Arc::new(move |m: Message| s.lock().push(m)));
        (emulator, seen)
    }

    fn last(price: Decimal) -> Message {
        Message::new(
            Level1ChangeMessage::new(es(), now()).add(Level1Field::LastTradePrice, price),
        )
        .at(now())
    }

    fn register(tid: TransactionId, side: Side, order_type: OrderType, price: Decimal) -> Message {
        Message::new(OrderRegisterMessage {
            transaction_id: tid,
            security_id: es(),
            portfolio_name: "main".to_string(),
            side,
            order_type,
            price: Price::new(price),
            volume: Volume::new(dec!(2)),
            comment: None,
        })
        .at(now())
    }

    fn replace(tid: TransactionId, old: TransactionId, price: Decimal) -> OrderReplaceMessage {
        OrderReplaceMessage {
            transaction_id: tid,
            old_transaction_id: old,
            security_id: es(),
            portfolio_name: "main".to_string(),
            side: Side::Buy,
            order_type: OrderType::Limit,
            price: Price::new(price),
            volume: Volume::new(dec!(2)),
        }
    }

    fn executions(seen: &PlMutex<Vec<Message>>) -> Vec<ExecutionMessage> {
        seen.lock()
            .iter()
            .filter_map(|m| m.as_execution().cloned())
            .collect()
    }

    // Test 1: marketable order fills at the last price
    #[test]
    fn test_market_order_fills() {
        let (emulator, seen) = emulator();
        emulator.send_in_message(last(dec!(5000))).unwrap();
        seen.lock().clear();

        emulator
            .send_in_message(register(1, Side::Buy, OrderType::Market, dec!(0)))
            .unwrap();

        let execs = executions(&seen);
        assert_eq!(execs.len(), 3);
        assert_eq!(execs[0].order_state, Some(OrderState::Active));
        assert_eq!(execs[1].execution_type, ExecutionType::Trade);
        assert_eq!(execs[1].trade_price, Some(Price::new(dec!(5000))));
        assert_eq!(execs[2].order_state, Some(OrderState::Done));
        assert!(execs.iter().all(|e| e.transaction_id == 1));

        let changes: Vec<PositionChangeMessage> = seen
            .lock()
            .iter()
            .filter_map(|m| match &m.body {
                MessageBody::PositionChange(p) => Some(p.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(changes[0].get(PositionChangeKind::CurrentValue), Some(dec!(2)));
        assert_eq!(changes[0].get(PositionChangeKind::AveragePrice), Some(dec!(5000)));
        assert!(changes[1].security_id.is_money());
        assert_eq!(changes[1].get(PositionChangeKind::CurrentValue), Some(dec!(-10000)));
    }

    // Test 2: market order without a price is rejected
    #[test]
    fn test_market_order_without_price_fails() {
        let (emulator, seen) = emulator();
        emulator
            .send_in_message(register(1, Side::Sell, OrderType::Market, dec!(0)))
            .unwrap();

        let execs = executions(&seen);
        assert_eq!(execs.len(), 1);
        assert_eq!(execs[0].order_state, Some(OrderState::Failed));
        assert!(execs[0].error.is_some());
    }

    // Test 3: resting limit fills at its own price once crossed
    #[test]
    fn test_resting_limit_fills_on_cross() {
        let (emulator, seen) = emulator();
        emulator.send_in_message(last(dec!(5000))).unwrap();
        emulator
            .send_in_message(register(1, Side::Buy, OrderType::Limit, dec!(4990)))
            .unwrap();
        assert_eq!(emulator.resting_order_count(), 1);

        emulator
            .send_in_message(
                Message::new(QuoteChangeMessage {
                    security_id: es(),
                    server_time: now(),
                    bids: vec![Quote::new(Price::new(dec!(4985)), Volume::new(dec!(1)))],
                    asks: vec![Quote::new(Price::new(dec!(4987)), Volume::new(dec!(1)))],
                })
                .at(now()),
            )
            .unwrap();

        assert_eq!(emulator.resting_order_count(), 0);
        let trade = executions(&seen)
            .into_iter()
            .find(|e| e.execution_type == ExecutionType::Trade)
            .unwrap();
        assert_eq!(trade.trade_price, Some(Price::new(dec!(4990))));
        assert_eq!(emulator.last_price(&es()), Some(Price::new(dec!(4986))));
    }

    // Test 4: cancel answers the cancel request; unknown orders are rejected
    #[test]
    fn test_cancel() {
        let (emulator, seen) = emulator();
        emulator
            .send_in_message(register(1, Side::Buy, OrderType::Limit, dec!(4990)))
            .unwrap();
        seen.lock().clear();

        let cancel = |tid, order| {
            Message::new(OrderCancelMessage {
                transaction_id: tid,
                order_transaction_id: order,
                security_id: es(),
                portfolio_name: "main".to_string(),
            })
        };
        emulator.send_in_message(cancel(2, 1)).unwrap();
        emulator.send_in_message(cancel(3, 1)).unwrap();

        let execs = executions(&seen);
        assert_eq!(execs[0].transaction_id, 1);
        assert_eq!(execs[0].original_transaction_id, 2);
        assert_eq!(execs[0].order_state, Some(OrderState::Done));
        assert_eq!(execs[1].transaction_id, 3);
        assert_eq!(execs[1].order_state, Some(OrderState::Failed));
    }

    // Test 5: replace retires the old order and registers the new one
    #[test]
    fn test_replace() {
        let (emulator, seen) = emulator();
        emulator
            .send_in_message(register(1, Side::Buy, OrderType::Limit, dec!(4990)))
            .unwrap();
        seen.lock().clear();

        emulator
            .send_in_message(Message::new(replace(2, 1, dec!(4995))))
            .unwrap();

        let execs = executions(&seen);
        assert_eq!(execs.len(), 2);
        assert_eq!((execs[0].transaction_id, execs[0].original_transaction_id), (1, 2));
        assert_eq!(execs[0].order_state, Some(OrderState::Done));
        assert_eq!((execs[1].transaction_id, execs[1].original_transaction_id), (2, 2));
        assert_eq!(execs[1].order_state, Some(OrderState::Active));
        assert_eq!(emulator.resting_order_count(), 1);
    }

    // Test 6: pair replace with a missing leg rejects both legs
    #[test]
    fn test_pair_replace_missing_leg() {
        let (emulator, seen) = emulator();
        emulator
            .send_in_message(register(1, Side::Buy, OrderType::Limit, dec!(4990)))
            .unwrap();
        seen.lock().clear();

        emulator
            .send_in_message(Message::new(OrderPairReplaceMessage {
                message1: replace(3, 1, dec!(4991)),
                message2: replace(4, 2, dec!(4992)),
            }))
            .unwrap();

        let execs = executions(&seen);
        assert_eq!(execs.len(), 2);
        assert!(execs.iter().all(|e| e.order_state == Some(OrderState::Failed)));
        assert_eq!(emulator.resting_order_count(), 1);
    }

    // Test 7: seeded money is the base for fills
    #[test]
    fn test_money_seed_and_round_trip_pnl() {
        let (emulator, seen) = emulator();
        emulator
            .send_in_message(Message::new(
                PositionChangeMessage::new(SecurityId::money(), "main", now())
                    .add(PositionChangeKind::BeginValue, dec!(100000))
                    .add(PositionChangeKind::CurrentValue, dec!(100000)),
            ))
            .unwrap();
        emulator.send_in_message(last(dec!(100))).unwrap();
        emulator
            .send_in_message(register(1, Side::Buy, OrderType::Market, dec!(0)))
            .unwrap();
        emulator.send_in_message(last(dec!(110))).unwrap();
        seen.lock().clear();
        emulator
            .send_in_message(register(2, Side::Sell, OrderType::Market, dec!(0)))
            .unwrap();

        let changes: Vec<PositionChangeMessage> = seen
            .lock()
            .iter()
            .filter_map(|m| match &m.body {
                MessageBody::PositionChange(p) => Some(p.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(changes[0].get(PositionChangeKind::CurrentValue), Some(dec!(0)));
        assert_eq!(changes[0].get(PositionChangeKind::RealizedPnL), Some(dec!(20)));
        assert_eq!(changes[1].get(PositionChangeKind::CurrentValue), Some(dec!(100020)));
    }

    #[test]
    fn test_connect_ack_and_counter() {
        let (emulator, seen) = emulator();
        emulator.send_in_message(Message::connect()).unwrap();
        assert_eq!(seen.lock()[0].message_type(), tradepipe_core::MessageType::Connect);
        assert_eq!(emulator.processed_message_count(), 1);
    }
}
