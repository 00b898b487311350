//! Commission calculation.
//!
//! `CommissionMessageAdapter` feeds every inbound message to a
//! `CommissionCalculator` for bookkeeping and, on the way out, attaches a fee
//! to order and trade executions whose commission is still unset. The unset
//! check makes enrichment exactly-once across stacked commission layers.

use crate::adapter::{AdapterRoles, MessageAdapter, OutHandler, SharedAdapter};
use crate::error::{AdapterError, AdapterResult};
use crate::wrapper::{InnerOutput, WrapperCore};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};
use tradepipe_core::{
    AdapterId, ExecutionMessage, ExecutionType, Message, MessageBody, OrderState, SubscriptionId,
    TransactionId, Volume,
};
use tradepipe_telemetry::Metrics;

// ============================================================================
// Calculator contract
// ============================================================================

/// Fee calculator injected into a commission adapter.
pub trait CommissionCalculator: Send + Sync {
    /// Bookkeeping for an inbound message. `Reset` clears the total.
    fn process(&self, message: &Message);

    /// Fee for an execution report, accumulated into the total. `None` when
    /// no rule applies.
    fn commission(&self, execution: &ExecutionMessage) -> Option<Decimal>;

    fn reset(&self);

    /// Accumulated commission.
    fn total(&self) -> Decimal;

    /// Fresh calculator with the same rules and a zero total.
    fn fork(&self) -> Arc<dyn CommissionCalculator>;
}

// ============================================================================
// Rule-based manager
// ============================================================================

/// Fee rule.
///
/// Order rules apply to accepted order reports (`Active`), trade rules to
/// own trade reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommissionRule {
    /// Fixed fee per accepted order.
    PerOrder { value: Decimal },
    /// Fee per unit of accepted order volume.
    PerOrderVolume { value: Decimal },
    /// Fixed fee per trade.
    PerTrade { value: Decimal },
    /// Fee per unit of traded volume.
    PerTradeVolume { value: Decimal },
    /// Fraction of trade turnover (price * volume).
    PerTurnover { rate: Decimal },
}

impl CommissionRule {
    fn apply(&self, execution: &ExecutionMessage, order_volume: Option<Volume>) -> Option<Decimal> {
        let accepted_order = execution.execution_type == ExecutionType::Order
            && execution.order_state == Some(OrderState::Active);
        let trade = execution.execution_type == ExecutionType::Trade;

        match self {
            Self::PerOrder { value } if accepted_order => Some(*value),
            Self::PerOrderVolume { value } if accepted_order => {
                order_volume.map(|v| v.inner() * *value)
            }
            Self::PerTrade { value } if trade => Some(*value),
            Self::PerTradeVolume { value } if trade => {
                execution.trade_volume.map(|v| v.inner() * *value)
            }
            Self::PerTurnover { rate } if trade => execution
                .trade_price
                .zip(execution.trade_volume)
                .map(|(price, volume)| volume.turnover(price) * *rate),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct CommissionState {
    total: Decimal,
    /// Registered volume by transaction id, for order-volume rules.
    order_volumes: HashMap<TransactionId, Volume>,
}

/// Rule-based commission calculator.
#[derive(Debug)]
pub struct CommissionManager {
    rules: Vec<CommissionRule>,
    state: Mutex<CommissionState>,
}

impl CommissionManager {
    pub fn new(rules: Vec<CommissionRule>) -> Self {
        Self {
            rules,
            state: Mutex::new(CommissionState::default()),
        }
    }

    pub fn rules(&self) -> &[CommissionRule] {
        &self.rules
    }
}

impl CommissionCalculator for CommissionManager {
    fn process(&self, message: &Message) {
        match &message.body {
            MessageBody::Reset => self.reset(),
            MessageBody::OrderRegister(m) => {
                self.state.lock().order_volumes.insert(m.transaction_id, m.volume);
            }
            MessageBody::OrderReplace(m) => {
                self.state.lock().order_volumes.insert(m.transaction_id, m.volume);
            }
            MessageBody::OrderPairReplace(m) => {
                let mut state = self.state.lock();
                state.order_volumes.insert(m.message1.transaction_id, m.message1.volume);
                state.order_volumes.insert(m.message2.transaction_id, m.message2.volume);
            }
            _ => {}
        }
    }

    fn commission(&self, execution: &ExecutionMessage) -> Option<Decimal> {
        let mut state = self.state.lock();
        let order_volume = execution.order_volume.or_else(|| {
            state
                .order_volumes
                .get(&execution.original_transaction_id)
                .copied()
        });

        let mut fee: Option<Decimal> = None;
        for rule in &self.rules {
            if let Some(value) = rule.apply(execution, order_volume) {
                fee = Some(fee.unwrap_or(Decimal::ZERO) + value);
            }
        }

        if execution.order_state.is_some_and(|s| s.is_final()) {
            state.order_volumes.remove(&execution.original_transaction_id);
        }

        if let Some(value) = fee {
            state.total += value;
            Metrics::commission_total(state.total.to_f64().unwrap_or(0.0));
        }
        fee
    }

    fn reset(&self) {
        let mut state = self.state.lock();
        state.total = Decimal::ZERO;
        state.order_volumes.clear();
        Metrics::commission_total(0.0);
    }

    fn total(&self) -> Decimal {
        self.state.lock().total
    }

    fn fork(&self) -> Arc<dyn CommissionCalculator> {
        Arc::new(Self::new(self.rules.clone()))
    }
}

// ============================================================================
// Adapter
// ============================================================================

/// Wrapper attaching commissions to outbound executions.
pub struct CommissionMessageAdapter {
    core: WrapperCore,
    manager: RwLock<Arc<dyn CommissionCalculator>>,
}

impl CommissionMessageAdapter {
    pub fn new(inner: SharedAdapter, manager: Arc<dyn CommissionCalculator>) -> Arc<Self> {
        let name = format!("commission({})", inner.name());
        let adapter = Arc::new(Self {
            core: WrapperCore::new(name, inner),
            manager: RwLock::new(manager),
        });
        adapter.core.attach(&adapter);
        adapter
    }

    pub fn commission_manager(&self) -> Arc<dyn CommissionCalculator> {
        self.manager.read().clone()
    }

    /// Swap the calculator. `None` is rejected.
    pub fn set_commission_manager(
        &self,
        manager: Option<Arc<dyn CommissionCalculator>>,
    ) -> AdapterResult<()> {
        let manager = manager.ok_or_else(|| {
            AdapterError::InvalidArgument("commission manager must not be empty".to_string())
        })?;
        *self.manager.write() = manager;
        debug!(adapter = %self.core.name(), "Commission manager replaced");
        Ok(())
    }
}

impl InnerOutput for CommissionMessageAdapter {
    fn on_inner_message(&self, mut message: Message) {
        if let Some(execution) = message.as_execution_mut() {
            let eligible = matches!(
                execution.execution_type,
                ExecutionType::Order | ExecutionType::Trade
            );
            if eligible && execution.commission.is_none() {
                let manager = self.commission_manager();
                execution.commission = manager.commission(execution);
                trace!(
                    transaction_id = execution.original_transaction_id,
                    commission = ?execution.commission,
                    "Commission attached"
                );
            }
        }
        self.core.emit(message);
    }
}

impl MessageAdapter for CommissionMessageAdapter {
    fn id(&self) -> AdapterId {
        self.core.id()
    }

    fn name(&self) -> &str {
        self.core.name()
    }

    fn roles(&self) -> AdapterRoles {
        self.core.inner().roles()
    }

    fn send_in_message(&self, message: Message) -> AdapterResult<()> {
        if self.core.is_disposed() {
            return Err(AdapterError::Disposed(self.core.name().to_string()));
        }
        self.commission_manager().process(&message);
        self.core.inner().send_in_message(message)
    }

    fn subscribe(&self, handler: OutHandler) -> SubscriptionId {
        self.core.subscribe(handler)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.core.unsubscribe(id)
    }

    fn current_time(&self) -> DateTime<Utc> {
        self.core.inner().current_time()
    }

    fn fork(&self) -> AdapterResult<SharedAdapter> {
        let inner = self.core.inner().fork()?;
        Ok(Self::new(inner, self.commission_manager().fork()))
    }

    fn dispose(&self) {
        self.core.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CountingCommissionCalculator, MockAdapter};
    use parking_lot::Mutex as PlMutex;
    use rust_decimal_macros::dec;
    use tradepipe_core::{OrderRegisterMessage, OrderType, Price, SecurityId, Side};

    fn sec() -> SecurityId {
        SecurityId::new("AAPL", "NASDAQ")
    }

    fn collect(adapter: &dyn MessageAdapter) -> Arc<PlMutex<Vec<Message>>> {
        let seen = Arc::new(PlMutex::new(Vec::new()));
        let s = seen.clone();
        adapter.subscribe(Arc::new(move |m| s.lock().push(m)));
        seen
    }

    fn trade(id: u64, price: Decimal, volume: Decimal) -> Message {
        Message::new(ExecutionMessage::trade(
            sec(),
            id,
            Price::new(price),
            Volume::new(volume),
        ))
    }

    // Test 1: every inbound message reaches the calculator and the inner adapter
    #[test]
    fn test_inbound_forwarded_to_calculator_and_inner() {
        let inner = MockAdapter::new("venue", AdapterRoles::TRANSACTIONS);
        let calc = Arc::new(CountingCommissionCalculator::new(dec!(1)));
        let adapter = CommissionMessageAdapter::new(inner.clone(), calc.clone());

        adapter.send_in_message(Message::connect()).unwrap();
        adapter.send_in_message(Message::reset()).unwrap();

        assert_eq!(calc.processed(), 2);
        assert_eq!(
            inner.received_types(),
            vec![tradepipe_core::MessageType::Connect, tradepipe_core::MessageType::Reset]
        );
    }

    // Test 2: commission attached only when unset, exactly once across two layers
    #[test]
    fn test_commission_exactly_once_when_stacked() {
        let inner = MockAdapter::new("venue", AdapterRoles::TRANSACTIONS);
        let inner_calc = Arc::new(CountingCommissionCalculator::new(dec!(1.5)));
        let outer_calc = Arc::new(CountingCommissionCalculator::new(dec!(99)));
        let first = CommissionMessageAdapter::new(inner.clone(), inner_calc.clone());
        let second = CommissionMessageAdapter::new(first, outer_calc.clone());
        let seen = collect(second.as_ref());

        inner.emit(trade(1, dec!(100), dec!(2)));

        let out = seen.lock();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_execution().unwrap().commission, Some(dec!(1.5)));
        assert_eq!(inner_calc.computed(), 1);
        assert_eq!(outer_calc.computed(), 0);
    }

    // Test 3: preset commission and non-execution messages pass through untouched
    #[test]
    fn test_passthrough_when_preset_or_not_execution() {
        let inner = MockAdapter::new("venue", AdapterRoles::TRANSACTIONS);
        let calc = Arc::new(CountingCommissionCalculator::new(dec!(1)));
        let adapter = CommissionMessageAdapter::new(inner.clone(), calc.clone());
        let seen = collect(adapter.as_ref());

        let mut preset = trade(1, dec!(10), dec!(1));
        preset.as_execution_mut().unwrap().commission = Some(dec!(0.25));
        inner.emit(preset);
        inner.emit(Message::connect());
        inner.emit(Message::new(ExecutionMessage::tick(
            sec(),
            Price::new(dec!(10)),
            Volume::new(dec!(1)),
            None,
        )));

        let out = seen.lock();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].as_execution().unwrap().commission, Some(dec!(0.25)));
        assert!(out[2].as_execution().unwrap().commission.is_none());
        assert_eq!(calc.computed(), 0);
    }

    // Test 4: replacing the manager with nothing fails
    #[test]
    fn test_set_empty_manager_rejected() {
        let inner = MockAdapter::new("venue", AdapterRoles::TRANSACTIONS);
        let adapter =
            CommissionMessageAdapter::new(inner, Arc::new(CommissionManager::new(Vec::new())));

        let result = adapter.set_commission_manager(None);
        assert!(matches!(result, Err(AdapterError::InvalidArgument(_))));

        let replacement: Arc<dyn CommissionCalculator> =
            Arc::new(CountingCommissionCalculator::new(dec!(2)));
        adapter.set_commission_manager(Some(replacement)).unwrap();
        assert_eq!(adapter.commission_manager().total(), Decimal::ZERO);
    }

    // Test 5: rule evaluation
    #[test]
    fn test_manager_rules() {
        let manager = CommissionManager::new(vec![
            CommissionRule::PerOrder { value: dec!(0.5) },
            CommissionRule::PerOrderVolume { value: dec!(0.1) },
            CommissionRule::PerTrade { value: dec!(1) },
            CommissionRule::PerTurnover { rate: dec!(0.001) },
        ]);

        manager.process(&Message::new(OrderRegisterMessage {
            transaction_id: 3,
            security_id: sec(),
            portfolio_name: "main".into(),
            side: Side::Buy,
            order_type: OrderType::Limit,
            price: Price::new(dec!(100)),
            volume: Volume::new(dec!(10)),
            comment: None,
        }));

        let accepted = ExecutionMessage::order(sec(), 3, OrderState::Active);
        assert_eq!(manager.commission(&accepted), Some(dec!(1.5)));

        let pending = ExecutionMessage::order(sec(), 3, OrderState::Pending);
        assert_eq!(manager.commission(&pending), None);

        let fill = ExecutionMessage::trade(sec(), 3, Price::new(dec!(100)), Volume::new(dec!(10)));
        assert_eq!(manager.commission(&fill), Some(dec!(2)));

        assert_eq!(manager.total(), dec!(3.5));
        manager.process(&Message::reset());
        assert_eq!(manager.total(), Decimal::ZERO);
    }

    // Test 6: rules parse from TOML
    #[test]
    fn test_rules_from_toml() {
        #[derive(Deserialize)]
        struct Rules {
            rules: Vec<CommissionRule>,
        }
        let parsed: Rules = toml::from_str(
            r#"
            [[rules]]
            type = "per_trade"
            value = "1.5"

            [[rules]]
            type = "per_turnover"
            rate = "0.0002"
            "#,
        )
        .unwrap();
        assert_eq!(
            parsed.rules,
            vec![
                CommissionRule::PerTrade { value: dec!(1.5) },
                CommissionRule::PerTurnover { rate: dec!(0.0002) },
            ]
        );
    }

    // Test 7: fork gets an independent total
    #[test]
    fn test_fork_has_independent_total() {
        let inner = MockAdapter::new("venue", AdapterRoles::TRANSACTIONS);
        let adapter = CommissionMessageAdapter::new(
            inner.clone(),
            Arc::new(CommissionManager::new(vec![CommissionRule::PerTrade {
                value: dec!(1),
            }])),
        );
        let _seen = collect(adapter.as_ref());
        inner.emit(trade(1, dec!(10), dec!(1)));

        let forked = adapter.fork().unwrap();
        assert_ne!(forked.id(), adapter.id());
        assert_eq!(adapter.commission_manager().total(), dec!(1));
    }
}
