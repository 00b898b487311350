//! Back-test application.
//!
//! Drives one emulation run: connect, subscribe, start, feed scripted orders
//! as replay time advances, wait for `Stopped` (or Ctrl-C), then report.

use crate::config::{AppConfig, ScriptedOrder};
use crate::error::{AppError, AppResult};
use crate::history::{load_history_file, LoadedHistory};
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tradepipe_core::{
    EmulationState, MessageBody, Order, OrderType, Portfolio, Position, Price, SubscriptionKey,
    TransactionId, Volume,
};
use tradepipe_emulation::{
    CandleBatch, CandleSeries, CollectionSecurityProvider, ExternalCandleSource,
    HistoryEmulationConnector, OrderRequest, PortfolioProvider, PositionProvider,
    TransactionProvider,
};
use tradepipe_telemetry::{RunStats, RunStatsReporter};

/// Adapters whose counters appear in the run summary.
const REPORTED_ADAPTERS: [&str; 3] = ["history", "emulator", "connector"];

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of a run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// History ran out without error.
    pub finished: bool,
    /// Stopped by Ctrl-C before history ran out.
    pub interrupted: bool,
    pub history_records: usize,
    pub loaded_messages: u64,
    pub processed_messages: u64,
    pub candles: usize,
    pub stopped_series: usize,
    pub errors: usize,
    pub unsubmitted_orders: usize,
    pub orders: Vec<Order>,
    pub positions: Vec<Position>,
    pub portfolios: Vec<Portfolio>,
    pub stats: RunStats,
}

pub struct Application {
    config: AppConfig,
    connector: Arc<HistoryEmulationConnector>,
    keys: BTreeSet<SubscriptionKey>,
    history_records: usize,
}

impl Application {
    /// Load the configured history file and assemble the connector.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let history = load_history_file(&config.data.path)?;
        Self::with_history(config, history)
    }

    pub fn with_history(config: AppConfig, history: LoadedHistory) -> AppResult<Self> {
        let securities = Arc::new(CollectionSecurityProvider::new(config.securities.clone()));
        let portfolios = config
            .portfolios
            .iter()
            .map(|p| p.to_portfolio())
            .collect();
        let connector = HistoryEmulationConnector::new(
            config.emulation.clone(),
            securities,
            portfolios,
            Arc::new(history.storage),
        )?;

        Ok(Self {
            config,
            connector,
            keys: history.keys,
            history_records: history.records,
        })
    }

    pub fn connector(&self) -> &Arc<HistoryEmulationConnector> {
        &self.connector
    }

    pub async fn run(self) -> AppResult<RunReport> {
        let reporter =
            RunStatsReporter::new(REPORTED_ADAPTERS.iter().map(|s| s.to_string()).collect());

        // Replay clock ticks drive scripted order submission.
        let (time_tx, mut time_rx) = mpsc::unbounded_channel::<DateTime<Utc>>();
        self.connector.subscribe_messages(move |message| {
            if matches!(message.body, MessageBody::Time) {
                let _ = time_tx.send(message.local_time);
            }
        });

        let errors = Arc::new(AtomicUsize::new(0));
        let error_count = errors.clone();
        self.connector.subscribe_errors(move |error| {
            warn!(%error, "Emulation error");
            error_count.fetch_add(1, Ordering::Relaxed);
        });

        let candles = Arc::new(AtomicUsize::new(0));
        let stopped_series = Arc::new(AtomicUsize::new(0));
        let candle_count = candles.clone();
        self.connector
            .on_new_candles(Arc::new(move |(series, batch): CandleBatch| {
                debug!(%series, candles = batch.len(), "Candles received");
                candle_count.fetch_add(batch.len(), Ordering::Relaxed);
            }));
        let stopped_count = stopped_series.clone();
        self.connector.on_series_stopped(Arc::new(move |series| {
            info!(%series, "Candle series finished");
            stopped_count.fetch_add(1, Ordering::Relaxed);
        }));

        self.connect().await?;
        self.subscribe()?;

        let mut timed: Vec<ScriptedOrder> = Vec::new();
        for order in &self.config.orders {
            match order.at {
                Some(_) => timed.push(order.clone()),
                None => {
                    self.submit(order)?;
                }
            }
        }
        timed.sort_by_key(|o| o.at);
        let mut timed: VecDeque<ScriptedOrder> = timed.into();

        let mut state_rx = self.connector.state_receiver();
        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(self.config.run_timeout_secs);
        self.connector.start()?;
        info!(orders = self.config.orders.len(), "Emulation started");

        let mut interrupted = false;
        loop {
            tokio::select! {
                Some(now) = time_rx.recv() => {
                    while timed.front().and_then(|o| o.at).is_some_and(|at| at <= now) {
                        if let Some(order) = timed.pop_front() {
                            if let Err(e) = self.submit(&order) {
                                warn!(error = %e, security = %order.security, "Scripted order rejected");
                            }
                        }
                    }
                }

                changed = state_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = *state_rx.borrow_and_update();
                    if state == EmulationState::Stopped {
                        break;
                    }
                }

                _ = tokio::signal::ctrl_c(), if !interrupted => {
                    info!("Shutdown signal received");
                    interrupted = true;
                    self.connector.disconnect()?;
                }

                _ = tokio::time::sleep_until(deadline) => {
                    self.connector.dispose();
                    return Err(AppError::Timeout("emulation to stop".to_string()));
                }
            }
        }

        if !timed.is_empty() {
            warn!(count = timed.len(), "Scripted orders never reached their submit time");
        }

        let report = RunReport {
            finished: self.connector.is_finished(),
            interrupted,
            history_records: self.history_records,
            loaded_messages: self.connector.loaded_message_count(),
            processed_messages: self.connector.processed_message_count(),
            candles: candles.load(Ordering::Relaxed),
            stopped_series: stopped_series.load(Ordering::Relaxed),
            errors: errors.load(Ordering::Relaxed),
            unsubmitted_orders: timed.len(),
            orders: self.connector.orders(),
            positions: self.connector.positions(),
            portfolios: PortfolioProvider::portfolios(self.connector.as_ref()),
            stats: reporter.get_stats(),
        };

        log_report(&report);
        reporter.output_summary();
        if let Some(path) = &self.config.telemetry.stats_path {
            std::fs::write(path, reporter.to_json()?)?;
            info!(path, "Run statistics written");
        }

        self.connector.dispose();
        Ok(report)
    }

    async fn connect(&self) -> AppResult<()> {
        self.connector.connect()?;
        let waited = tokio::time::timeout(CONNECT_TIMEOUT, async {
            while !self.connector.is_connected() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        waited.map_err(|_| AppError::Timeout("adapters to connect".to_string()))
    }

    /// Candle series go through the external candle source, every other
    /// stored key through a plain market data subscription.
    fn subscribe(&self) -> AppResult<()> {
        let emulation = &self.config.emulation;
        let mut covered = BTreeSet::new();
        for candle in &self.config.candles {
            let series = CandleSeries::time_frame(candle.security.clone(), candle.time_frame_secs);
            if self.connector.supported_ranges(&series).is_empty() {
                warn!(%series, "No history for candle series");
            }
            self.connector
                .subscribe_candles(&series, emulation.start_time, emulation.stop_time)?;
            covered.insert(series.key());
        }

        for key in self.keys.difference(&covered) {
            self.connector.subscribe_market_data(
                key.clone(),
                emulation.start_time,
                emulation.stop_time,
            )?;
            debug!(%key, "Subscribed market data");
        }
        Ok(())
    }

    fn submit(&self, order: &ScriptedOrder) -> AppResult<TransactionId> {
        let volume = Volume::new(order.volume);
        let request = match order.order_type {
            OrderType::Market => OrderRequest::market(
                order.security.clone(),
                order.portfolio.clone(),
                order.side,
                volume,
            ),
            OrderType::Limit => OrderRequest::limit(
                order.security.clone(),
                order.portfolio.clone(),
                order.side,
                Price::new(order.price.unwrap_or_default()),
                volume,
            ),
        };
        let transaction_id = self.connector.register_order(request)?;
        info!(
            transaction_id,
            security = %order.security,
            side = %order.side,
            volume = %order.volume,
            "Scripted order submitted"
        );
        Ok(transaction_id)
    }
}

fn log_report(report: &RunReport) {
    info!(
        finished = report.finished,
        interrupted = report.interrupted,
        records = report.history_records,
        loaded = report.loaded_messages,
        processed = report.processed_messages,
        candles = report.candles,
        errors = report.errors,
        "Back-test finished"
    );
    for order in &report.orders {
        info!(
            transaction_id = order.transaction_id,
            security = %order.security_id,
            side = %order.side,
            state = %order.state,
            balance = %order.balance,
            "Order"
        );
    }
    for position in &report.positions {
        info!(
            security = %position.key.security_id,
            portfolio = %position.key.portfolio_name,
            volume = %position.current_value,
            realized_pnl = %position.realized_pnl,
            "Position"
        );
    }
    for portfolio in &report.portfolios {
        info!(
            portfolio = %portfolio.name,
            begin = %portfolio.begin_value,
            current = %portfolio.current_value,
            "Portfolio"
        );
    }
}
