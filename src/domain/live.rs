//! Live trading wrapper around the replay core.
//!
//! A [`LiveBot`] runs one symbol on its own named thread, driving an async
//! loop on a single-threaded tokio runtime: fetch bars, check exits, score,
//! execute, record equity, sleep. Shutdown goes through a
//! [`CancellationToken`] observed at cycle boundaries and while sleeping.
//!
//! Providers and executors are blocking ports, so every call runs on the
//! blocking pool through a [`CallGate`] that bounds it with
//! `tokio::time::timeout`. A data call that overruns makes the cycle
//! `DataUnavailable`. An order that overruns is parked and reconciled at the
//! start of the next cycle: its fill is booked (or unwound) once the
//! executor answers, and no new order is sent while one is outstanding.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tokio::runtime::Runtime;
use tokio::task::{JoinError, JoinHandle as TaskHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::error::TradeError;
use super::execution::{
    ExecutionConfig, Fill, OrderIntent, book_fill, plan_signal, plan_triggered_exit,
};
use super::ledger::PositionLedger;
use super::ohlcv::{Bar, normalize_bars};
use super::position::{Position, Trade};
use super::sentiment::{SentimentCorrelator, SentimentPoint};
use super::signal::{Scorer, Signal};
use crate::ports::data_port::MarketDataProvider;
use crate::ports::order_port::{OrderExecutor, OrderRecord};
use crate::ports::sentiment_port::SentimentProvider;

const JOIN_POLL: Duration = Duration::from_millis(10);

pub type SharedMarket = Arc<dyn MarketDataProvider + Send + Sync>;
pub type SharedSentiment = Arc<dyn SentimentProvider + Send + Sync>;

#[derive(Debug, Clone)]
pub struct LiveConfig {
    pub symbol: String,
    pub timeframe: String,
    pub bar_limit: usize,
    pub initial_capital: f64,
    pub cycle_interval: Duration,
    pub call_timeout: Duration,
    pub join_timeout: Duration,
    /// Calls allowed to still be running past their deadline before new
    /// calls are refused.
    pub max_outstanding_calls: usize,
    pub sentiment_window: chrono::Duration,
    /// Ignore overreaction readings unless the symbol is socially active.
    pub require_activity: bool,
    /// Stop by itself after this many cycles.
    pub max_cycles: Option<usize>,
}

impl LiveConfig {
    pub fn new(symbol: &str) -> Self {
        LiveConfig {
            symbol: symbol.to_string(),
            timeframe: "1m".to_string(),
            bar_limit: 100,
            initial_capital: 10_000.0,
            cycle_interval: Duration::from_secs(60),
            call_timeout: Duration::from_secs(10),
            join_timeout: Duration::from_secs(5),
            max_outstanding_calls: 4,
            sentiment_window: chrono::Duration::hours(1),
            require_activity: true,
            max_cycles: None,
        }
    }

    pub fn validate(&self) -> Result<(), TradeError> {
        if self.symbol.trim().is_empty() {
            return Err(TradeError::invalid_config("live", "symbol", "must not be empty"));
        }
        if !(self.initial_capital.is_finite() && self.initial_capital > 0.0) {
            return Err(TradeError::invalid_config(
                "live",
                "initial_capital",
                "must be positive",
            ));
        }
        if self.bar_limit == 0 {
            return Err(TradeError::invalid_config("live", "bar_limit", "must be at least 1"));
        }
        if self.max_outstanding_calls == 0 {
            return Err(TradeError::invalid_config(
                "live",
                "max_outstanding_calls",
                "must be at least 1",
            ));
        }
        for (key, d) in [
            ("call_timeout", self.call_timeout),
            ("join_timeout", self.join_timeout),
        ] {
            if d.is_zero() {
                return Err(TradeError::invalid_config("live", key, "must be positive"));
            }
        }
        Ok(())
    }
}

struct Outstanding(Arc<AtomicUsize>);

impl Drop for Outstanding {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Runs blocking port calls on the blocking pool, each bounded by a
/// deadline.
///
/// A call that misses its deadline keeps its pool thread until the port
/// returns. At most `limit` calls may be running at once; further calls
/// are refused without being started.
#[derive(Debug, Clone)]
pub struct CallGate {
    timeout: Duration,
    limit: usize,
    running: Arc<AtomicUsize>,
}

impl CallGate {
    pub fn new(timeout: Duration, limit: usize) -> Self {
        CallGate {
            timeout,
            limit,
            running: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Calls started and not yet returned, timed out or not.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    fn timed_out(&self, operation: &str) -> TradeError {
        TradeError::Timeout {
            operation: operation.to_string(),
            millis: self.timeout.as_millis() as u64,
        }
    }

    /// Start `f` on the blocking pool. Must be called inside a runtime.
    pub fn start<T, F>(
        &self,
        symbol: &str,
        operation: &str,
        f: F,
    ) -> Result<TaskHandle<Result<T, TradeError>>, TradeError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, TradeError> + Send + 'static,
    {
        let before = self.running.fetch_add(1, Ordering::SeqCst);
        let guard = Outstanding(Arc::clone(&self.running));
        if before >= self.limit {
            return Err(TradeError::data_unavailable(
                symbol,
                format!("{operation} refused, {before} calls still running"),
            ));
        }
        Ok(tokio::task::spawn_blocking(move || {
            let _guard = guard;
            f()
        }))
    }

    /// Wait up to the deadline for a started call. `None` means the call is
    /// still running; the handle stays valid and can be awaited later.
    pub async fn wait<T>(
        &self,
        symbol: &str,
        operation: &str,
        handle: &mut TaskHandle<Result<T, TradeError>>,
    ) -> Option<Result<T, TradeError>> {
        match tokio::time::timeout(self.timeout, handle).await {
            Ok(Ok(result)) => Some(result),
            Ok(Err(join)) => Some(Err(TradeError::data_unavailable(
                symbol,
                format!("{operation} did not complete: {join}"),
            ))),
            Err(_) => None,
        }
    }

    pub async fn call<T, F>(&self, symbol: &str, operation: &str, f: F) -> Result<T, TradeError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, TradeError> + Send + 'static,
    {
        let mut handle = self.start(symbol, operation, f)?;
        match self.wait(symbol, operation, &mut handle).await {
            Some(result) => result,
            None => Err(self.timed_out(operation)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LiveSummary {
    pub cycles: usize,
    /// Cycles that ended early because data was unavailable, a call
    /// failed, or an earlier order was still outstanding.
    pub skipped_cycles: usize,
    pub signals: Vec<Signal>,
    pub trades: Vec<Trade>,
    pub open_positions: Vec<Position>,
    pub cash: f64,
    pub last_equity: Option<f64>,
    /// Orders that overran their deadline and were booked once they
    /// answered.
    pub late_fills: usize,
    /// Order still unanswered when the bot stopped.
    pub outstanding_order: Option<OrderIntent>,
}

struct ParkedOrder {
    intent: OrderIntent,
    handle: TaskHandle<Result<OrderRecord, TradeError>>,
}

enum Sent {
    Filled(OrderRecord),
    Parked,
}

struct Worker<S, E> {
    config: LiveConfig,
    scorer: S,
    correlator: SentimentCorrelator,
    execution: ExecutionConfig,
    ledger: PositionLedger,
    executor: Arc<Mutex<E>>,
    gate: CallGate,
    parked: Option<ParkedOrder>,
    market: SharedMarket,
    sentiment: Option<SharedSentiment>,
    cancel: CancellationToken,
}

fn as_unavailable(symbol: &str, err: TradeError) -> TradeError {
    match err {
        TradeError::Timeout { .. } => TradeError::data_unavailable(symbol, err.to_string()),
        other => other,
    }
}

impl<S, E> Worker<S, E>
where
    S: Scorer,
    E: OrderExecutor + Send + 'static,
{
    async fn run(mut self) -> LiveSummary {
        let mut summary = LiveSummary::default();
        let symbol = self.config.symbol.clone();
        info!(symbol = %symbol, stage = "live", "bot started");

        while !self.cancel.is_cancelled() {
            if self.config.max_cycles.is_some_and(|max| summary.cycles >= max) {
                break;
            }
            summary.cycles += 1;
            if let Err(e) = self.cycle(&mut summary).await {
                summary.skipped_cycles += 1;
                warn!(symbol = %symbol, error = %e, stage = "live", "cycle skipped");
            }
            tokio::select! {
                _ = self.cancel.cancelled() => {}
                _ = tokio::time::sleep(self.config.cycle_interval) => {}
            }
        }

        self.drain_parked(&mut summary).await;
        summary.trades = self.ledger.trades().to_vec();
        summary.open_positions = self.ledger.portfolio().positions.values().cloned().collect();
        summary.cash = self.ledger.cash();
        info!(
            symbol = %symbol,
            cycles = summary.cycles,
            trades = summary.trades.len(),
            late_fills = summary.late_fills,
            stage = "live",
            "bot stopped"
        );
        summary
    }

    async fn fetch_bars(&self) -> Result<Vec<Bar>, TradeError> {
        let symbol = self.config.symbol.clone();
        let market = Arc::clone(&self.market);
        let timeframe = self.config.timeframe.clone();
        let limit = self.config.bar_limit;
        let sym = symbol.clone();
        let bars = self
            .gate
            .call(&symbol, "get_price_data", move || {
                market.get_price_data(&sym, &timeframe, limit)
            })
            .await
            .map_err(|e| as_unavailable(&symbol, e))?;
        Ok(normalize_bars(&symbol, bars))
    }

    async fn current_price(&self) -> Option<f64> {
        let symbol = self.config.symbol.clone();
        let market = Arc::clone(&self.market);
        let sym = symbol.clone();
        match self
            .gate
            .call(&symbol, "get_current_price", move || market.get_current_price(&sym))
            .await
        {
            Ok(p) if p.is_finite() && p > 0.0 => Some(p),
            Ok(p) => {
                warn!(symbol = %symbol, price = p, stage = "live", "ignoring unusable quote");
                None
            }
            Err(e) => {
                warn!(symbol = %symbol, error = %e, stage = "live", "no current price");
                None
            }
        }
    }

    async fn fetch_sentiment(&self) -> Vec<SentimentPoint> {
        let Some(provider) = &self.sentiment else {
            return Vec::new();
        };
        let symbol = self.config.symbol.clone();
        let provider = Arc::clone(provider);
        let window = self.config.sentiment_window;
        let sym = symbol.clone();
        match self
            .gate
            .call(&symbol, "get_sentiment_series", move || {
                Ok(provider.get_sentiment_series(&sym, window))
            })
            .await
        {
            Ok(Some(mut series)) => {
                series.sort_by_key(|s| s.timestamp);
                series
            }
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(symbol = %symbol, error = %e, stage = "sentiment", "sentiment unavailable");
                Vec::new()
            }
        }
    }

    async fn socially_active(&self) -> bool {
        let Some(provider) = &self.sentiment else {
            return false;
        };
        let symbol = self.config.symbol.clone();
        let provider = Arc::clone(provider);
        let sym = symbol.clone();
        match self
            .gate
            .call(&symbol, "get_social_activity_score", move || {
                Ok(provider.get_social_activity_score(&sym))
            })
            .await
        {
            Ok((active, score)) => {
                debug!(symbol = %symbol, active, score, stage = "sentiment", "social activity");
                active
            }
            Err(e) => {
                warn!(symbol = %symbol, error = %e, stage = "sentiment", "activity unavailable");
                false
            }
        }
    }

    /// Send an order and wait up to the call deadline. On overrun the order
    /// is parked for reconciliation.
    async fn send(&mut self, intent: OrderIntent) -> Result<Sent, TradeError> {
        let executor = Arc::clone(&self.executor);
        let order = intent.clone();
        let mut handle = self.gate.start(&intent.symbol, "execute_trade", move || {
            let mut executor = executor.lock().unwrap_or_else(PoisonError::into_inner);
            order.send(&mut *executor)
        })?;
        match self.gate.wait(&intent.symbol, "execute_trade", &mut handle).await {
            Some(result) => result.map(Sent::Filled),
            None => {
                warn!(
                    symbol = %intent.symbol,
                    timestamp = %intent.timestamp,
                    side = %intent.side,
                    quantity = intent.quantity,
                    stage = "execute",
                    "order outstanding past deadline, reconciling next cycle"
                );
                self.parked = Some(ParkedOrder { intent, handle });
                Ok(Sent::Parked)
            }
        }
    }

    /// Book a fill; if the ledger refuses it, send the offsetting order.
    async fn settle(
        &mut self,
        intent: &OrderIntent,
        record: &OrderRecord,
    ) -> Result<Option<Fill>, TradeError> {
        match book_fill(&mut self.ledger, intent, record) {
            Ok(fill) => Ok(fill),
            Err(e) => {
                error!(
                    symbol = %intent.symbol,
                    timestamp = %intent.timestamp,
                    order_id = record.order_id,
                    error = %e,
                    stage = "execute",
                    "fill could not be booked, unwinding"
                );
                let unwind = intent.unwind(record);
                match self.send(unwind.clone()).await {
                    Ok(Sent::Filled(r)) => {
                        // an unwind books nothing on the ledger
                        let _ = book_fill(&mut self.ledger, &unwind, &r);
                    }
                    Ok(Sent::Parked) => {}
                    Err(u) => error!(
                        symbol = %intent.symbol,
                        error = %u,
                        stage = "execute",
                        "unwind failed, broker position differs from ledger"
                    ),
                }
                Err(e)
            }
        }
    }

    async fn execute(&mut self, intent: OrderIntent) -> Result<Option<Fill>, TradeError> {
        match self.send(intent.clone()).await? {
            Sent::Filled(record) => self.settle(&intent, &record).await,
            Sent::Parked => Err(self.gate.timed_out("execute_trade")),
        }
    }

    /// Book a parked order that has since answered. Errors while it is
    /// still running, so the cycle is skipped rather than trading on a
    /// ledger that may be missing a fill.
    async fn reconcile(&mut self, summary: &mut LiveSummary) -> Result<(), TradeError> {
        let Some(parked) = self.parked.take() else {
            return Ok(());
        };
        if !parked.handle.is_finished() {
            let symbol = parked.intent.symbol.clone();
            self.parked = Some(parked);
            return Err(TradeError::data_unavailable(
                &symbol,
                "previous order still outstanding",
            ));
        }
        let ParkedOrder { intent, handle } = parked;
        let answer = handle.await;
        self.settle_parked(intent, answer, summary).await;
        Ok(())
    }

    async fn settle_parked(
        &mut self,
        intent: OrderIntent,
        answer: Result<Result<OrderRecord, TradeError>, JoinError>,
        summary: &mut LiveSummary,
    ) {
        let result = answer.unwrap_or_else(|join| {
            Err(TradeError::data_unavailable(
                &intent.symbol,
                format!("execute_trade did not complete: {join}"),
            ))
        });
        match result {
            Ok(record) => {
                info!(
                    symbol = %intent.symbol,
                    order_id = record.order_id,
                    stage = "reconcile",
                    "late fill received"
                );
                summary.late_fills += 1;
                if let Err(e) = self.settle(&intent, &record).await {
                    warn!(symbol = %intent.symbol, error = %e, stage = "reconcile", "late fill refused");
                }
            }
            Err(e) => {
                warn!(symbol = %intent.symbol, error = %e, stage = "reconcile", "outstanding order failed");
            }
        }
    }

    /// Give a parked order one more deadline before shutting down. Settling
    /// it may park an unwind, which gets its own deadline.
    async fn drain_parked(&mut self, summary: &mut LiveSummary) {
        while let Some(ParkedOrder { intent, mut handle }) = self.parked.take() {
            match tokio::time::timeout(self.gate.timeout(), &mut handle).await {
                Ok(answer) => self.settle_parked(intent, answer, summary).await,
                Err(_) => {
                    warn!(
                        symbol = %intent.symbol,
                        stage = "reconcile",
                        "order still outstanding at shutdown"
                    );
                    summary.outstanding_order = Some(intent);
                    return;
                }
            }
        }
    }

    async fn cycle(&mut self, summary: &mut LiveSummary) -> Result<(), TradeError> {
        self.reconcile(summary).await?;

        let symbol = self.config.symbol.clone();
        let bars = self.fetch_bars().await?;
        let Some(last) = bars.last() else {
            return Err(TradeError::data_unavailable(&symbol, "no bars returned"));
        };
        if !last.is_usable() {
            return Err(TradeError::data_unavailable(
                &symbol,
                format!("unusable close {}", last.close),
            ));
        }
        let timestamp = last.timestamp;
        // fills happen at the live quote when there is one
        let mut quote = last.clone();
        if let Some(price) = self.current_price().await {
            quote.close = price;
        }

        if let Some(exit) = plan_triggered_exit(&self.ledger, &symbol, &quote) {
            if let Err(e) = self.execute(exit).await {
                warn!(symbol = %symbol, %timestamp, error = %e, stage = "stop_check", "exit rejected");
            }
        }

        let sentiment = self.fetch_sentiment().await;
        let mut reading = self.correlator.read(&symbol, &bars, &sentiment);
        if self.config.require_activity
            && reading.as_ref().is_some_and(|r| r.overreaction)
            && !self.socially_active().await
        {
            debug!(symbol = %symbol, stage = "sentiment", "overreaction ignored, symbol quiet");
            reading = None;
        }

        if let Some(signal) = self.scorer.score(&symbol, &bars, reading.as_ref()) {
            // nothing new is sent while an exit is outstanding
            if self.parked.is_none() {
                let planned = plan_signal(&self.ledger, &self.execution, &signal, &quote);
                let outcome = match planned {
                    Ok(Some(intent)) => self.execute(intent).await.map(|_| ()),
                    Ok(None) => Ok(()),
                    Err(e) => Err(e),
                };
                if let Err(e) = outcome {
                    warn!(symbol = %symbol, %timestamp, error = %e, stage = "execute", "order rejected");
                }
            }
            summary.signals.push(signal);
        }

        let equity = self
            .ledger
            .record_equity(timestamp, &HashMap::from([(symbol.clone(), quote.close)]));
        summary.last_equity = Some(equity);
        Ok(())
    }
}

/// Handle to a running bot thread.
pub struct LiveBot {
    name: String,
    cancel: CancellationToken,
    handle: Option<JoinHandle<LiveSummary>>,
    join_timeout: Duration,
}

impl LiveBot {
    pub fn spawn<S, E>(
        config: LiveConfig,
        scorer: S,
        correlator: SentimentCorrelator,
        execution: ExecutionConfig,
        executor: E,
        market: SharedMarket,
        sentiment: Option<SharedSentiment>,
    ) -> Result<Self, TradeError>
    where
        S: Scorer + Send + 'static,
        E: OrderExecutor + Send + 'static,
    {
        config.validate()?;
        execution.validate()?;

        let name = format!("bot-{}", config.symbol);
        let cancel = CancellationToken::new();
        let join_timeout = config.join_timeout;
        let runtime: Runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .thread_name(format!("{name}-call"))
            .max_blocking_threads(config.max_outstanding_calls + 1)
            .build()?;
        let worker = Worker {
            ledger: PositionLedger::new(
                config.initial_capital,
                execution.stop_loss_pct,
                execution.take_profit_pct,
            ),
            executor: Arc::new(Mutex::new(executor)),
            gate: CallGate::new(config.call_timeout, config.max_outstanding_calls),
            parked: None,
            config,
            scorer,
            correlator,
            execution,
            market,
            sentiment,
            cancel: cancel.clone(),
        };
        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            let summary = runtime.block_on(worker.run());
            // calls still stuck in a port are left to finish on their own
            runtime.shutdown_background();
            summary
        })?;

        Ok(LiveBot {
            name,
            cancel,
            handle: Some(handle),
            join_timeout,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask the worker to stop at its next cycle boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Cancel, then wait up to the join timeout for the worker.
    pub fn stop(self) -> Result<LiveSummary, TradeError> {
        self.cancel();
        self.join()
    }

    /// Wait up to the join timeout for the worker to finish on its own.
    pub fn join(mut self) -> Result<LiveSummary, TradeError> {
        let deadline = Instant::now() + self.join_timeout;
        while !self.is_finished() {
            if Instant::now() >= deadline {
                warn!(bot = %self.name, stage = "live", "worker did not stop in time");
                return Err(TradeError::Timeout {
                    operation: format!("join {}", self.name),
                    millis: self.join_timeout.as_millis() as u64,
                });
            }
            thread::sleep(JOIN_POLL);
        }
        let Some(handle) = self.handle.take() else {
            return Ok(LiveSummary::default());
        };
        handle.join().map_err(|_| TradeError::WorkerPanicked {
            name: self.name.clone(),
        })
    }
}

impl Drop for LiveBot {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
