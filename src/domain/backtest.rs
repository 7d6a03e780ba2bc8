//! Deterministic replay engine.
//!
//! Each symbol is replayed independently against its own ledger, scorer
//! and executor (cloned from the engine's prototypes). Per bar, in order:
//! stop check, score, decide/execute, record equity. Open positions are
//! liquidated at the last usable close. A data problem in one symbol never
//! aborts the others; it is recorded in that symbol's status.

use std::collections::HashMap;
use std::fmt;

use chrono::{Duration, NaiveDateTime};
use tracing::{debug, info, warn};

use super::code_data::{SymbolData, build_unified_timeline};
use super::error::TradeError;
use super::execution::{ExecutionConfig, apply_signal, check_exits, close_position};
use super::ledger::PositionLedger;
use super::metrics::{AnalyzerConfig, PerformanceReport, SentimentImpact, analyze_sentiment};
use super::ohlcv::{Bar, normalize_bars};
use super::portfolio::EquityPoint;
use super::position::{ExitReason, Trade};
use super::sentiment::SentimentCorrelator;
use super::signal::{Scorer, Signal};
use crate::ports::data_port::MarketDataProvider;
use crate::ports::order_port::OrderExecutor;
use crate::ports::sentiment_port::SentimentProvider;

const DEFAULT_GAP_FACTOR: i32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Init,
    LoadingData,
    Replaying,
    Finalizing,
    Done,
    Error,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineState::Init => "INIT",
            EngineState::LoadingData => "LOADING_DATA",
            EngineState::Replaying => "REPLAYING",
            EngineState::Finalizing => "FINALIZING",
            EngineState::Done => "DONE",
            EngineState::Error => "ERROR",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct BacktestConfig {
    /// Capital given to each symbol's ledger.
    pub initial_capital: f64,
    /// Consecutive bars further apart than this are a data gap. `None`
    /// derives the limit per symbol from its median bar spacing.
    pub max_bar_gap: Option<Duration>,
    pub timeframe: String,
    pub bar_limit: usize,
    /// Replay symbols on scoped threads.
    pub parallel: bool,
    pub execution: ExecutionConfig,
    pub analyzer: AnalyzerConfig,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            initial_capital: 100_000.0,
            max_bar_gap: None,
            timeframe: "1d".to_string(),
            bar_limit: 1_000,
            parallel: false,
            execution: ExecutionConfig::default(),
            analyzer: AnalyzerConfig::default(),
        }
    }
}

impl BacktestConfig {
    pub fn validate(&self) -> Result<(), TradeError> {
        if !(self.initial_capital.is_finite() && self.initial_capital > 0.0) {
            return Err(TradeError::invalid_config(
                "backtest",
                "initial_capital",
                "initial_capital must be positive",
            ));
        }
        if let Some(gap) = self.max_bar_gap {
            if gap <= Duration::zero() {
                return Err(TradeError::invalid_config(
                    "data",
                    "max_bar_gap_minutes",
                    "max_bar_gap_minutes must be positive",
                ));
            }
        }
        if self.timeframe.trim().is_empty() {
            return Err(TradeError::invalid_config(
                "data",
                "timeframe",
                "timeframe must not be empty",
            ));
        }
        if self.bar_limit == 0 {
            return Err(TradeError::invalid_config(
                "data",
                "bar_limit",
                "bar_limit must be at least 1",
            ));
        }
        self.execution.validate()?;
        self.analyzer.validate()
    }
}

/// A stretch of a symbol's history that could not be replayed.
#[derive(Debug, Clone, PartialEq)]
pub struct DataIssue {
    pub from: NaiveDateTime,
    pub to: NaiveDateTime,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SymbolStatus {
    Complete,
    Partial { issues: Vec<DataIssue> },
    Failed { cause: String },
}

impl SymbolStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, SymbolStatus::Failed { .. })
    }
}

impl fmt::Display for SymbolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymbolStatus::Complete => write!(f, "complete"),
            SymbolStatus::Partial { issues } => write!(f, "partial ({} issues)", issues.len()),
            SymbolStatus::Failed { cause } => write!(f, "failed: {}", cause),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SymbolResult {
    pub symbol: String,
    pub status: SymbolStatus,
    pub equity_curve: Vec<EquityPoint>,
    pub trades: Vec<Trade>,
    pub signals: Vec<Signal>,
    pub final_cash: f64,
    /// `None` for failed symbols.
    pub report: Option<PerformanceReport>,
    pub sentiment: SentimentImpact,
}

impl SymbolResult {
    fn failed(symbol: &str, cause: impl Into<String>, initial_capital: f64) -> Self {
        SymbolResult {
            symbol: symbol.to_string(),
            status: SymbolStatus::Failed {
                cause: cause.into(),
            },
            equity_curve: Vec::new(),
            trades: Vec::new(),
            signals: Vec::new(),
            final_cash: initial_capital,
            report: None,
            sentiment: SentimentImpact::default(),
        }
    }
}

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct RunResult {
    /// Summed across non-failed symbols over the unified timeline.
    pub equity_curve: Vec<EquityPoint>,
    /// All closed trades ordered by exit time.
    pub trade_log: Vec<Trade>,
    pub signals: Vec<Signal>,
    pub performance_report: PerformanceReport,
    pub per_symbol_status: Vec<(String, SymbolStatus)>,
    pub symbol_results: Vec<SymbolResult>,
}

impl RunResult {
    pub fn status_of(&self, symbol: &str) -> Option<&SymbolStatus> {
        self.per_symbol_status
            .iter()
            .find(|(s, _)| s == symbol)
            .map(|(_, status)| status)
    }

    pub fn symbol_result(&self, symbol: &str) -> Option<&SymbolResult> {
        self.symbol_results.iter().find(|r| r.symbol == symbol)
    }
}

pub struct BacktestEngine<S, E> {
    config: BacktestConfig,
    scorer: S,
    executor: E,
    correlator: SentimentCorrelator,
    state: EngineState,
}

impl<S, E> BacktestEngine<S, E>
where
    S: Scorer + Send + Sync,
    E: OrderExecutor + Clone + Send + Sync,
{
    pub fn new(
        config: BacktestConfig,
        scorer: S,
        executor: E,
        correlator: SentimentCorrelator,
    ) -> Result<Self, TradeError> {
        config.validate()?;
        Ok(BacktestEngine {
            config,
            scorer,
            executor,
            correlator,
            state: EngineState::Init,
        })
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Load every symbol through the providers, then replay.
    ///
    /// A symbol whose fetch fails is reported as `Failed` with the cause.
    pub fn run(
        &mut self,
        market: &dyn MarketDataProvider,
        sentiment: Option<&dyn SentimentProvider>,
        symbols: &[String],
    ) -> Result<RunResult, TradeError> {
        self.state = EngineState::LoadingData;
        info!(symbols = symbols.len(), stage = "load", "loading data");

        let mut loaded = Vec::with_capacity(symbols.len());
        let mut load_failures = Vec::new();
        for symbol in symbols {
            match self.load_symbol(market, sentiment, symbol) {
                Ok(data) => loaded.push(data),
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, stage = "load", "symbol failed to load");
                    load_failures.push(SymbolResult::failed(
                        symbol,
                        e.to_string(),
                        self.config.initial_capital,
                    ));
                }
            }
        }

        let mut result = self.replay_all(&loaded);
        result.extend(load_failures);
        // report in requested order
        result.sort_by_key(|r| symbols.iter().position(|s| *s == r.symbol));
        self.finish(result)
    }

    /// Replay already-loaded data.
    pub fn run_loaded(&mut self, data: &[SymbolData]) -> Result<RunResult, TradeError> {
        let results = self.replay_all(data);
        self.finish(results)
    }

    fn load_symbol(
        &self,
        market: &dyn MarketDataProvider,
        sentiment: Option<&dyn SentimentProvider>,
        symbol: &str,
    ) -> Result<SymbolData, TradeError> {
        let bars = market.get_price_data(symbol, &self.config.timeframe, self.config.bar_limit)?;
        if bars.is_empty() {
            return Err(TradeError::data_unavailable(symbol, "no bars returned"));
        }
        let bars = normalize_bars(symbol, bars);
        let mut data = SymbolData::new(symbol.to_string(), bars);

        if let Some(provider) = sentiment {
            let (Some(first), Some(last)) = (data.bars.first(), data.bars.last()) else {
                return Ok(data);
            };
            // cover the whole replay plus one staleness allowance
            let mut window = last.timestamp - first.timestamp;
            if let Some(s) = self.correlator.config().max_staleness {
                window += s;
            }
            match provider.get_sentiment_series(symbol, window) {
                Some(series) => data = data.with_sentiment(series),
                None => debug!(symbol, stage = "load", "no sentiment series"),
            }
        }
        debug!(
            symbol,
            bars = data.bar_count(),
            sentiment = data.sentiment.len(),
            stage = "load",
            "symbol loaded"
        );
        Ok(data)
    }

    fn replay_all(&mut self, data: &[SymbolData]) -> Vec<SymbolResult> {
        self.state = EngineState::Replaying;
        let this = &*self;
        if this.config.parallel && data.len() > 1 {
            std::thread::scope(|scope| {
                let handles: Vec<_> = data
                    .iter()
                    .map(|d| (d, scope.spawn(move || this.replay_symbol(d))))
                    .collect();
                handles
                    .into_iter()
                    .map(|(d, h)| {
                        h.join().unwrap_or_else(|_| {
                            warn!(symbol = %d.symbol, stage = "replay", "replay thread panicked");
                            SymbolResult::failed(
                                &d.symbol,
                                "replay panicked",
                                this.config.initial_capital,
                            )
                        })
                    })
                    .collect()
            })
        } else {
            data.iter().map(|d| this.replay_symbol(d)).collect()
        }
    }

    /// Replay one symbol from a fresh ledger. Bars are re-sorted and
    /// deduplicated first, whatever order they arrive in.
    pub fn replay_symbol(&self, data: &SymbolData) -> SymbolResult {
        let symbol = data.symbol.as_str();
        let capital = self.config.initial_capital;
        let bars = normalize_bars(symbol, data.bars.clone());
        if bars.is_empty() {
            warn!(symbol, stage = "replay", "no bars, symbol failed");
            return SymbolResult::failed(symbol, "no bars", capital);
        }
        let gap_limit = self.config.max_bar_gap.or_else(|| default_gap_limit(&bars));

        let exec = &self.config.execution;
        let mut ledger = PositionLedger::new(capital, exec.stop_loss_pct, exec.take_profit_pct);
        let mut scorer = self.scorer.clone();
        let mut executor = self.executor.clone();
        let mut usable: Vec<Bar> = Vec::with_capacity(bars.len());
        let mut issues = Vec::new();
        let mut signals = Vec::new();

        for bar in &bars {
            let timestamp = bar.timestamp;
            if !bar.is_usable() {
                warn!(
                    symbol,
                    %timestamp,
                    close = bar.close,
                    stage = "replay",
                    "unusable bar skipped"
                );
                issues.push(DataIssue {
                    from: timestamp,
                    to: timestamp,
                    reason: format!("unusable close {}", bar.close),
                });
                continue;
            }
            if let (Some(limit), Some(prev)) = (gap_limit, usable.last()) {
                let gap = timestamp - prev.timestamp;
                if gap > limit {
                    warn!(
                        symbol,
                        from = %prev.timestamp,
                        to = %timestamp,
                        gap_minutes = gap.num_minutes(),
                        stage = "replay",
                        "data gap"
                    );
                    issues.push(DataIssue {
                        from: prev.timestamp,
                        to: timestamp,
                        reason: format!("gap of {} minutes", gap.num_minutes()),
                    });
                }
            }
            usable.push(bar.clone());

            if let Err(e) = check_exits(&mut ledger, &mut executor, symbol, bar) {
                warn!(symbol, %timestamp, error = %e, stage = "stop_check", "exit rejected");
            }

            let reading = self.correlator.read(symbol, &usable, &data.sentiment);
            if let Some(signal) = scorer.score(symbol, &usable, reading.as_ref()) {
                if let Err(e) = apply_signal(&mut ledger, &mut executor, exec, &signal, bar) {
                    warn!(symbol, %timestamp, error = %e, stage = "execute", "order rejected");
                }
                signals.push(signal);
            }

            ledger.record_equity(timestamp, &HashMap::from([(symbol.to_string(), bar.close)]));
        }

        let Some(last) = usable.last() else {
            warn!(symbol, stage = "replay", "no usable bars, symbol failed");
            return SymbolResult::failed(symbol, "no usable bars", capital);
        };

        if ledger.position(symbol).is_some() {
            if let Err(e) =
                close_position(&mut ledger, &mut executor, symbol, last, ExitReason::EndOfRun)
            {
                warn!(
                    symbol,
                    timestamp = %last.timestamp,
                    error = %e,
                    stage = "finalize",
                    "liquidation rejected"
                );
            }
        }

        let impact = analyze_sentiment(symbol, &usable, &data.sentiment, &self.config.analyzer);
        let report = PerformanceReport::compute(
            capital,
            ledger.equity_curve(),
            ledger.trades(),
            &self.config.analyzer,
        )
        .with_sentiment(impact.clone());

        let status = if issues.is_empty() {
            SymbolStatus::Complete
        } else {
            SymbolStatus::Partial { issues }
        };
        info!(
            symbol,
            %status,
            trades = ledger.trades().len(),
            final_equity = report.final_equity,
            stage = "replay",
            "symbol replayed"
        );

        SymbolResult {
            symbol: symbol.to_string(),
            status,
            equity_curve: ledger.equity_curve().to_vec(),
            trades: ledger.trades().to_vec(),
            signals,
            final_cash: ledger.cash(),
            report: Some(report),
            sentiment: impact,
        }
    }

    fn finish(&mut self, results: Vec<SymbolResult>) -> Result<RunResult, TradeError> {
        self.state = EngineState::Finalizing;
        let ok: Vec<&SymbolResult> = results.iter().filter(|r| !r.status.is_failed()).collect();
        if ok.is_empty() {
            self.state = EngineState::Error;
            let causes: Vec<String> = results
                .iter()
                .map(|r| format!("{}: {}", r.symbol, r.status))
                .collect();
            return Err(TradeError::data_unavailable(
                "all",
                if causes.is_empty() {
                    "no symbols to replay".to_string()
                } else {
                    causes.join("; ")
                },
            ));
        }

        let equity_curve = aggregate_equity(&ok, self.config.initial_capital);
        let mut trade_log: Vec<Trade> = ok.iter().flat_map(|r| r.trades.iter().cloned()).collect();
        trade_log.sort_by_key(|t| t.exit_time);
        let mut signals: Vec<Signal> = ok.iter().flat_map(|r| r.signals.iter().cloned()).collect();
        signals.sort_by_key(|s| s.timestamp);

        let combined_capital = self.config.initial_capital * ok.len() as f64;
        let impacts: Vec<SentimentImpact> = ok.iter().map(|r| r.sentiment.clone()).collect();
        let performance_report = PerformanceReport::compute(
            combined_capital,
            &equity_curve,
            &trade_log,
            &self.config.analyzer,
        )
        .with_sentiment(SentimentImpact::merge(
            &impacts,
            self.config.analyzer.top_events,
        ));

        let per_symbol_status = results
            .iter()
            .map(|r| (r.symbol.clone(), r.status.clone()))
            .collect();

        self.state = EngineState::Done;
        info!(
            symbols = results.len(),
            trades = trade_log.len(),
            total_return = performance_report.total_return,
            stage = "finalize",
            "backtest complete"
        );
        Ok(RunResult {
            equity_curve,
            trade_log,
            signals,
            performance_report,
            per_symbol_status,
            symbol_results: results,
        })
    }
}

/// Gap limit when none is configured: `DEFAULT_GAP_FACTOR` times the
/// median spacing of the series, so weekends and holidays in daily data
/// pass but a missing stretch does not.
fn default_gap_limit(bars: &[Bar]) -> Option<Duration> {
    let mut spacings: Vec<Duration> = bars
        .windows(2)
        .map(|w| w[1].timestamp - w[0].timestamp)
        .collect();
    if spacings.is_empty() {
        return None;
    }
    spacings.sort();
    let median = spacings[spacings.len() / 2];
    (median > Duration::zero()).then(|| median * DEFAULT_GAP_FACTOR)
}

/// Sum of per-symbol equity on every timestamp any symbol traded.
/// A symbol contributes its latest sample at or before the timestamp, or
/// its starting capital before its first bar.
fn aggregate_equity(results: &[&SymbolResult], initial_capital: f64) -> Vec<EquityPoint> {
    let stamps: Vec<Vec<NaiveDateTime>> = results
        .iter()
        .map(|r| r.equity_curve.iter().map(|p| p.timestamp).collect())
        .collect();
    let timeline = build_unified_timeline(stamps.iter().map(Vec::as_slice));

    let mut cursors = vec![0usize; results.len()];
    let mut current = vec![initial_capital; results.len()];
    timeline
        .into_iter()
        .map(|timestamp| {
            for (i, r) in results.iter().enumerate() {
                while let Some(p) = r.equity_curve.get(cursors[i]) {
                    if p.timestamp > timestamp {
                        break;
                    }
                    current[i] = p.equity;
                    cursors[i] += 1;
                }
            }
            EquityPoint {
                timestamp,
                equity: current.iter().sum(),
            }
        })
        .collect()
}
