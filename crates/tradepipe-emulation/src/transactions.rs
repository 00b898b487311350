//! Order submission and order snapshots.
//!
//! `OrderTracker` turns order requests into protocol messages sent through
//! the connector's root adapter and keeps an `Order` snapshot per
//! registration transaction id, updated from execution reports.
//!
//! Execution reports identify the order by `transaction_id` (the order's own
//! registration id) and the request they answer by `original_transaction_id`.

use crate::error::{EmulationError, EmulationResult};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, trace, warn};
use tradepipe_adapter::{AdapterError, MessageAdapter, SharedAdapter};
use tradepipe_core::{
    Clock, ExecutionMessage, ExecutionType, IncrementalIdGenerator, Message, Order,
    OrderCancelMessage, OrderRegisterMessage, OrderReplaceMessage, OrderState, OrderType, Price,
    SecurityId, Side, TransactionId, Volume,
};

/// New order parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub security_id: SecurityId,
    pub portfolio_name: String,
    pub side: Side,
    pub order_type: OrderType,
    pub price: Price,
    pub volume: Volume,
    pub comment: Option<String>,
}

impl OrderRequest {
    pub fn limit(
        security_id: SecurityId,
        portfolio_name: impl Into<String>,
        side: Side,
        price: Price,
        volume: Volume,
    ) -> Self {
        Self {
            security_id,
            portfolio_name: portfolio_name.into(),
            side,
            order_type: OrderType::Limit,
            price,
            volume,
            comment: None,
        }
    }

    pub fn market(
        security_id: SecurityId,
        portfolio_name: impl Into<String>,
        side: Side,
        volume: Volume,
    ) -> Self {
        Self {
            order_type: OrderType::Market,
            ..Self::limit(security_id, portfolio_name, side, Price::ZERO, volume)
        }
    }
}

/// Order transaction capability.
pub trait TransactionProvider {
    /// Submit a new order. Returns its transaction id.
    fn register_order(&self, request: OrderRequest) -> EmulationResult<TransactionId>;

    /// Request cancellation. Returns the cancel transaction id.
    fn cancel_order(&self, transaction_id: TransactionId) -> EmulationResult<TransactionId>;

    /// Replace an order with a new price and volume. Returns the new order's
    /// transaction id.
    fn replace_order(
        &self,
        transaction_id: TransactionId,
        price: Price,
        volume: Volume,
    ) -> EmulationResult<TransactionId>;

    fn order(&self, transaction_id: TransactionId) -> Option<Order>;

    fn orders(&self) -> Vec<Order>;
}

pub struct OrderTracker {
    adapter: SharedAdapter,
    clock: Arc<dyn Clock>,
    ids: Arc<IncrementalIdGenerator>,
    orders: DashMap<TransactionId, Order>,
}

impl OrderTracker {
    pub fn new(
        adapter: SharedAdapter,
        clock: Arc<dyn Clock>,
        ids: Arc<IncrementalIdGenerator>,
    ) -> Self {
        Self {
            adapter,
            clock,
            ids,
            orders: DashMap::new(),
        }
    }

    fn pending(&self, transaction_id: TransactionId, request: &OrderRequest) -> Order {
        Order {
            transaction_id,
            security_id: request.security_id.clone(),
            portfolio_name: request.portfolio_name.clone(),
            side: request.side,
            order_type: request.order_type,
            price: request.price,
            volume: request.volume,
            balance: request.volume,
            state: OrderState::Pending,
            order_id: None,
            commission: Decimal::ZERO,
            latency_registration: None,
            latency_cancellation: None,
            last_change_time: None,
        }
    }

    fn send(&self, message: Message) -> EmulationResult<()> {
        self.adapter
            .send_in_message(message.at(self.clock.now()))
            .map_err(Into::into)
    }

    fn fail(&self, transaction_id: TransactionId) {
        if let Some(mut order) = self.orders.get_mut(&transaction_id) {
            order.state = OrderState::Failed;
        }
    }

    fn known(&self, transaction_id: TransactionId) -> EmulationResult<Order> {
        self.orders
            .get(&transaction_id)
            .map(|o| o.clone())
            .ok_or_else(|| {
                EmulationError::from(AdapterError::InvalidArgument(format!(
                    "unknown order {transaction_id}"
                )))
            })
    }

    /// Update the snapshot an execution refers to.
    pub fn apply_execution(&self, execution: &ExecutionMessage) {
        let transaction_id = if execution.transaction_id != 0 {
            execution.transaction_id
        } else {
            execution.original_transaction_id
        };
        let Some(mut order) = self.orders.get_mut(&transaction_id) else {
            trace!(transaction_id, "Execution for untracked order");
            return;
        };

        match execution.execution_type {
            ExecutionType::Order => {
                let was_pending = order.state == OrderState::Pending;
                if let Some(state) = execution.order_state {
                    order.state = state;
                }
                if let Some(order_id) = execution.order_id {
                    order.order_id = Some(order_id);
                }
                if let Some(balance) = execution.balance {
                    order.balance = balance;
                }
                if let Some(latency) = execution.latency {
                    if was_pending {
                        order.latency_registration = Some(latency);
                    } else {
                        order.latency_cancellation = Some(latency);
                    }
                }
                if let Some(error) = &execution.error {
                    warn!(transaction_id, error = %error, "Order failed");
                }
            }
            ExecutionType::Trade => {}
            ExecutionType::Tick => return,
        }

        if let Some(commission) = execution.commission {
            order.commission += commission;
        }
        order.last_change_time = Some(execution.server_time);
    }

    pub fn clear(&self) {
        self.orders.clear();
    }
}

impl TransactionProvider for OrderTracker {
    fn register_order(&self, request: OrderRequest) -> EmulationResult<TransactionId> {
        let transaction_id = self.ids.next_id();
        self.orders
            .insert(transaction_id, self.pending(transaction_id, &request));
        debug!(
            transaction_id,
            security = %request.security_id,
            side = %request.side,
            volume = %request.volume,
            "Registering order"
        );

        let message = Message::new(OrderRegisterMessage {
            transaction_id,
            security_id: request.security_id,
            portfolio_name: request.portfolio_name,
            side: request.side,
            order_type: request.order_type,
            price: request.price,
            volume: request.volume,
            comment: request.comment,
        });
        if let Err(e) = self.send(message) {
            self.fail(transaction_id);
            return Err(e);
        }
        Ok(transaction_id)
    }

    fn cancel_order(&self, transaction_id: TransactionId) -> EmulationResult<TransactionId> {
        let order = self.known(transaction_id)?;
        let cancel_id = self.ids.next_id();
        debug!(transaction_id, cancel_id, "Cancelling order");

        self.send(Message::new(OrderCancelMessage {
            transaction_id: cancel_id,
            order_transaction_id: transaction_id,
            security_id: order.security_id,
            portfolio_name: order.portfolio_name,
        }))?;
        Ok(cancel_id)
    }

    fn replace_order(
        &self,
        transaction_id: TransactionId,
        price: Price,
        volume: Volume,
    ) -> EmulationResult<TransactionId> {
        let old = self.known(transaction_id)?;
        let new_id = self.ids.next_id();
        let request = OrderRequest {
            order_type: old.order_type,
            ..OrderRequest::limit(
                old.security_id.clone(),
                old.portfolio_name.clone(),
                old.side,
                price,
                volume,
            )
        };
        self.orders.insert(new_id, self.pending(new_id, &request));
        debug!(transaction_id, new_id, price = %price, "Replacing order");

        let message = Message::new(OrderReplaceMessage {
            transaction_id: new_id,
            old_transaction_id: transaction_id,
            security_id: old.security_id,
            portfolio_name: old.portfolio_name,
            side: old.side,
            order_type: old.order_type,
            price,
            volume,
        });
        if let Err(e) = self.send(message) {
            self.fail(new_id);
            return Err(e);
        }
        Ok(new_id)
    }

    fn order(&self, transaction_id: TransactionId) -> Option<Order> {
        self.orders.get(&transaction_id).map(|o| o.clone())
    }

    fn orders(&self) -> Vec<Order> {
        let mut all: Vec<Order> = self.orders.iter().map(|o| o.clone()).collect();
        all.sort_by_key(|o| o.transaction_id);
        all
    }
}
