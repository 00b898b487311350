//! End-to-end replay through the threaded history pipeline.

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tradepipe_core::{
    DataArg, DataType, EmulationState, ExecutionMessage, HistorySource, Message, MessageIter,
    MessageType, OrderState, Portfolio, PositionKey, Price, SecurityId, Side, SubscriptionKey, Volume,
};
use tradepipe_emulation::{
    CollectionSecurityProvider, EmulationConfig, HistoryEmulationConnector, InMemoryStorage,
    OrderRequest, PortfolioProvider, PositionProvider, TransactionProvider,
};

fn es() -> SecurityId {
    SecurityId::new("ES", "CME")
}

fn trades() -> SubscriptionKey {
    SubscriptionKey::new(es(), DataType::Trades, DataArg::None)
}

fn at(secs: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 14, 30, secs).unwrap()
}

fn tick(secs: u32, price: Decimal) -> Message {
    Message::new(ExecutionMessage::tick(
        es(),
        Price::new(price),
        Volume::new(dec!(1)),
        None,
    ))
    .at(at(secs))
}

fn connector(storage: InMemoryStorage) -> Arc<HistoryEmulationConnector> {
    let config = EmulationConfig {
        max_message_count: 2,
        market_time_interval_ms: 1000,
        ..EmulationConfig::default()
    };
    HistoryEmulationConnector::new(
        config,
        Arc::new(CollectionSecurityProvider::default()),
        vec![Portfolio::new("main", dec!(100000))],
        Arc::new(storage),
    )
    .unwrap()
}

async fn wait_until(what: &str, check: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn wait_for_state(connector: &HistoryEmulationConnector, state: EmulationState) {
    let mut rx = connector.state_receiver();
    tokio::time::timeout(Duration::from_secs(10), rx.wait_for(|s| *s == state))
        .await
        .expect("state not reached in time")
        .expect("state channel closed");
}

#[tokio::test]
async fn test_replay_fills_resting_order_and_finishes() {
    let storage = InMemoryStorage::new();
    storage
        .insert(
            trades(),
            vec![
                tick(0, dec!(100)),
                tick(1, dec!(100.5)),
                tick(2, dec!(99)),
                tick(3, dec!(101)),
            ],
        )
        .unwrap();
    let connector = connector(storage);

    let published = Arc::new(Mutex::new(Vec::new()));
    let p = published.clone();
    connector.subscribe_messages(move |m| p.lock().push(m.message_type()));

    connector.connect().unwrap();
    wait_until("connect", || connector.is_connected()).await;
    assert_eq!(connector.portfolio("main").unwrap().current_value, dec!(100000));

    let subscription = connector
        .subscribe_market_data(trades(), None, None)
        .unwrap();
    assert!(subscription.is_some());

    let tid = connector
        .register_order(OrderRequest::limit(
            es(),
            "main",
            Side::Buy,
            Price::new(dec!(99)),
            Volume::new(dec!(2)),
        ))
        .unwrap();
    assert_eq!(connector.order(tid).unwrap().state, OrderState::Active);

    connector.start().unwrap();
    wait_for_state(&connector, EmulationState::Stopped).await;

    assert!(connector.is_finished());
    assert_eq!(connector.loaded_message_count(), 4);

    let order = connector.order(tid).unwrap();
    assert_eq!(order.state, OrderState::Done);
    assert!(order.balance.is_zero());

    let position = connector.position(&PositionKey::new(es(), "main")).unwrap();
    assert_eq!(position.current_value, dec!(2));
    assert_eq!(position.average_price, Some(Price::new(dec!(99))));
    assert_eq!(connector.portfolio("main").unwrap().current_value, dec!(99802));

    let states: Vec<EmulationState> = connector.state_history().iter().map(|t| t.to).collect();
    assert_eq!(
        states,
        vec![
            EmulationState::Starting,
            EmulationState::Started,
            EmulationState::Stopping,
            EmulationState::Stopped,
        ]
    );
    let published = published.lock();
    assert!(published.contains(&MessageType::Time));
    assert!(published.contains(&MessageType::EmulationState));

    connector.dispose();
}

#[tokio::test]
async fn test_disconnect_mid_run_stops_without_finishing() {
    let connector = connector(InMemoryStorage::new());
    let endless: HistorySource = Arc::new(|_start| -> MessageIter {
        Box::new((1i64..).map(|ms| {
            Message::new(ExecutionMessage::tick(
                es(),
                Price::new(dec!(100)),
                Volume::new(dec!(1)),
                None,
            ))
            .at(at(0) + TimeDelta::milliseconds(ms))
        }))
    });
    connector.register_history_source(trades(), endless).unwrap();
    connector.connect().unwrap();
    wait_until("connect", || connector.is_connected()).await;

    connector.start().unwrap();
    wait_for_state(&connector, EmulationState::Started).await;
    wait_until("replay progress", || connector.processed_message_count() > 10).await;
    connector.disconnect().unwrap();
    wait_for_state(&connector, EmulationState::Stopped).await;

    assert!(!connector.is_finished());
    assert!(connector.loaded_message_count() > 0);
    connector.dispose();
}
