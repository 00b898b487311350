//! Chain-level behaviour: commission and latency enrichment through a
//! channel-decoupled chain built from recorded steps.

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use parking_lot::Mutex;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tradepipe_adapter::{
    AdapterChainBuilder, AdapterRoles, ChainStep, CommissionRule, MessageAdapter, MockAdapter,
};
use tradepipe_channel::ChannelConfig;
use tradepipe_core::{
    ExecutionMessage, Message, MessageBody, OrderRegisterMessage, OrderState, OrderType, Price,
    SecurityId, Side, Volume,
};

fn t(ms: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 6, 9, 30, 0).unwrap() + TimeDelta::milliseconds(ms)
}

fn sec() -> SecurityId {
    SecurityId::new("MSFT", "NASDAQ")
}

/// Venue mock: acknowledges registrations 25 ms later and fills them.
fn venue() -> Arc<MockAdapter> {
    MockAdapter::with_responder("venue", AdapterRoles::TRANSACTIONS, |m| match &m.body {
        MessageBody::OrderRegister(reg) => {
            let ack = Message::new(ExecutionMessage::order(
                reg.security_id.clone(),
                reg.transaction_id,
                OrderState::Active,
            ))
            .at(m.local_time + TimeDelta::milliseconds(25));
            let fill = Message::new(ExecutionMessage::trade(
                reg.security_id.clone(),
                reg.transaction_id,
                reg.price,
                reg.volume,
            ))
            .at(m.local_time + TimeDelta::milliseconds(30));
            vec![ack, fill]
        }
        _ => Vec::new(),
    })
}

fn register(id: u64, at: DateTime<Utc>) -> Message {
    Message::new(OrderRegisterMessage {
        transaction_id: id,
        security_id: sec(),
        portfolio_name: "main".into(),
        side: Side::Buy,
        order_type: OrderType::Limit,
        price: Price::new(dec!(400)),
        volume: Volume::new(dec!(5)),
        comment: None,
    })
    .at(at)
}

#[test]
fn test_chain_enriches_executions_once() {
    let builder = AdapterChainBuilder::new()
        .with(ChainStep::Latency)
        .with(ChainStep::Commission {
            rules: vec![
                CommissionRule::PerOrder { value: dec!(0.1) },
                CommissionRule::PerTradeVolume { value: dec!(0.01) },
            ],
        })
        // A second commission layer must never override the first.
        .with(ChainStep::Commission {
            rules: vec![CommissionRule::PerTrade { value: dec!(100) }],
        })
        .with(ChainStep::Channel {
            input: ChannelConfig::unbounded("Tx In"),
            output: ChannelConfig::bounded("Tx Out", 8),
        });

    let chain = builder.build(venue()).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    chain.subscribe(Arc::new(move |m: Message| s.lock().push(m)));

    chain.send_in_message(register(1, t(0))).unwrap();
    chain.send_in_message(register(2, t(100))).unwrap();

    for _ in 0..400 {
        if seen.lock().len() == 4 {
            break;
        }
        thread::sleep(Duration::from_millis(5));
    }
    chain.dispose();

    let out = seen.lock();
    assert_eq!(out.len(), 4);

    let ack = out[0].as_execution().unwrap();
    assert_eq!(ack.original_transaction_id, 1);
    assert_eq!(ack.commission, Some(dec!(0.1)));
    assert_eq!(ack.latency, Some(TimeDelta::milliseconds(25)));

    let fill = out[1].as_execution().unwrap();
    assert_eq!(fill.commission, Some(dec!(0.05)));
    assert!(fill.latency.is_none());

    assert_eq!(out[2].as_execution().unwrap().original_transaction_id, 2);
    assert_eq!(
        out[2].as_execution().unwrap().latency,
        Some(TimeDelta::milliseconds(25))
    );
}

#[test]
fn test_duplicate_transaction_surfaces_to_caller() {
    let builder = AdapterChainBuilder::new().with(ChainStep::Latency);
    let chain = builder.build(venue()).unwrap();

    chain.send_in_message(register(7, t(0))).unwrap();
    let err = chain.send_in_message(register(7, t(1))).unwrap_err();
    assert!(err.to_string().contains("Transaction 7"));
}
