//! JSON-lines history loader.
//!
//! One record per line, tagged by `type`:
//!
//! ```text
//! {"type":"tick","time":"2024-03-01T14:30:00Z","security":{"code":"ES","board":"CME"},"price":"5000","volume":"1"}
//! {"type":"level1","time":"...","security":{...},"last":"5000","bid":"4999.75","ask":"5000.25"}
//! {"type":"candle","time":"...","security":{...},"time_frame_secs":60,"open":"...","high":"...","low":"...","close":"...","volume":"..."}
//! ```
//!
//! Blank lines and lines starting with `#` are skipped.

use crate::error::{AppError, AppResult};
use chrono::{DateTime, TimeDelta, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::io::{BufRead, BufReader, Read};
use tracing::{debug, info};
use tradepipe_core::{
    CandleKind, CandleMessage, DataArg, DataType, ExecutionMessage, Level1ChangeMessage,
    Level1Field, Message, Price, SecurityId, Side, SubscriptionKey, Volume,
};
use tradepipe_emulation::InMemoryStorage;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HistoryRecord {
    Tick {
        time: DateTime<Utc>,
        security: SecurityId,
        price: Decimal,
        volume: Decimal,
        #[serde(default)]
        side: Option<Side>,
    },
    Level1 {
        time: DateTime<Utc>,
        security: SecurityId,
        #[serde(default)]
        last: Option<Decimal>,
        #[serde(default)]
        bid: Option<Decimal>,
        #[serde(default)]
        ask: Option<Decimal>,
    },
    /// Time-frame candle; `time` is the open time.
    Candle {
        time: DateTime<Utc>,
        security: SecurityId,
        time_frame_secs: u64,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
    },
}

impl HistoryRecord {
    /// Storage key and message. Candles are stamped with their close time.
    pub fn into_message(self) -> (SubscriptionKey, Message) {
        match self {
            Self::Tick {
                time,
                security,
                price,
                volume,
                side,
            } => {
                let mut tick = ExecutionMessage::tick(
                    security.clone(),
                    Price::new(price),
                    Volume::new(volume),
                    side,
                );
                tick.server_time = time;
                (
                    SubscriptionKey::new(security, DataType::Trades, DataArg::None),
                    Message::new(tick).at(time),
                )
            }
            Self::Level1 {
                time,
                security,
                last,
                bid,
                ask,
            } => {
                let mut change = Level1ChangeMessage::new(security.clone(), time);
                for (field, value) in [
                    (Level1Field::LastTradePrice, last),
                    (Level1Field::BestBidPrice, bid),
                    (Level1Field::BestAskPrice, ask),
                ] {
                    if let Some(value) = value {
                        change = change.add(field, value);
                    }
                }
                (
                    SubscriptionKey::new(security, DataType::Level1, DataArg::None),
                    Message::new(change).at(time),
                )
            }
            Self::Candle {
                time,
                security,
                time_frame_secs,
                open,
                high,
                low,
                close,
                volume,
            } => {
                let close_time = time + TimeDelta::seconds(time_frame_secs as i64);
                let candle = CandleMessage {
                    security_id: security.clone(),
                    kind: CandleKind::TimeFrame,
                    arg: DataArg::TimeFrame(time_frame_secs),
                    open_time: time,
                    close_time,
                    open: Price::new(open),
                    high: Price::new(high),
                    low: Price::new(low),
                    close: Price::new(close),
                    total_volume: Volume::new(volume),
                    is_finished: false,
                };
                (
                    SubscriptionKey::time_frame(security, time_frame_secs),
                    Message::new(candle).at(close_time),
                )
            }
        }
    }
}

/// Loaded history and the keys it covers.
#[derive(Debug)]
pub struct LoadedHistory {
    pub storage: InMemoryStorage,
    pub keys: BTreeSet<SubscriptionKey>,
    pub records: usize,
}

/// Read JSON-lines records from `reader`. `path` only labels errors.
pub fn load_history<R: Read>(reader: R, path: &str) -> AppResult<LoadedHistory> {
    let storage = InMemoryStorage::new();
    let mut keys = BTreeSet::new();
    let mut records = 0;

    for (index, line) in BufReader::new(reader).lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let record: HistoryRecord =
            serde_json::from_str(trimmed).map_err(|e| AppError::History {
                path: path.to_string(),
                line: index + 1,
                message: e.to_string(),
            })?;
        let (key, message) = record.into_message();
        storage.insert(key.clone(), [message])?;
        keys.insert(key);
        records += 1;
    }

    debug!(path, keys = keys.len(), "History keys discovered");
    info!(path, records, "History loaded");
    Ok(LoadedHistory {
        storage,
        keys,
        records,
    })
}

pub fn load_history_file(path: &str) -> AppResult<LoadedHistory> {
    let file = std::fs::File::open(path)?;
    load_history(file, path)
}
