//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use crate::adapters::cached_provider::CachedMarketData;
use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::csv_report_adapter::CsvReportAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::simulated_executor::SimulatedExecutor;
use crate::domain::backtest::{BacktestEngine, RunResult, SymbolStatus};
use crate::domain::cache::HistoricalCache;
use crate::domain::config_validation::{RunSettings, build_run_settings};
use crate::domain::error::TradeError;
use crate::domain::sentiment::SentimentCorrelator;
use crate::domain::signal::SignalScorer;
use crate::domain::universe::validate_universe;
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::MarketDataProvider;
use crate::ports::report_port::ReportPort;
use crate::ports::sentiment_port::SentimentProvider;

#[derive(Parser, Debug)]
#[command(name = "sentitrade", about = "Sentiment-aware technical signal backtester")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a backtest over CSV bar data
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        /// Directory holding <SYMBOL>.csv and <SYMBOL>_sentiment.csv
        #[arg(short, long)]
        data_dir: Option<PathBuf>,
        /// Comma-separated symbols, replacing [backtest] symbols
        #[arg(long)]
        symbols: Option<String>,
        /// Report directory, replacing [report] output_dir
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate a configuration file without running
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Backtest {
            config,
            data_dir,
            symbols,
            output,
        } => run_backtest(&config, data_dir, symbols, output),
        Command::Validate { config } => run_validate(&config),
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|err| {
        eprintln!("error: {err}");
        ExitCode::from(&err)
    })
}

/// Command-line values layered over the file config, so overrides go
/// through the same validation as file values.
struct CliOverrides<'a> {
    base: &'a dyn ConfigPort,
    values: Vec<(&'static str, &'static str, String)>,
}

impl<'a> CliOverrides<'a> {
    fn new(base: &'a dyn ConfigPort) -> Self {
        Self {
            base,
            values: Vec::new(),
        }
    }

    fn set(mut self, section: &'static str, key: &'static str, value: Option<String>) -> Self {
        if let Some(v) = value {
            self.values.push((section, key, v));
        }
        self
    }

    fn lookup(&self, section: &str, key: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(s, k, _)| *s == section && *k == key)
            .map(|(_, _, v)| v.as_str())
    }
}

impl ConfigPort for CliOverrides<'_> {
    fn get_string(&self, section: &str, key: &str) -> Option<String> {
        match self.lookup(section, key) {
            Some(v) => Some(v.to_string()),
            None => self.base.get_string(section, key),
        }
    }

    fn get_int(&self, section: &str, key: &str, default: i64) -> i64 {
        match self.lookup(section, key) {
            Some(v) => v.trim().parse().unwrap_or(default),
            None => self.base.get_int(section, key, default),
        }
    }

    fn get_double(&self, section: &str, key: &str, default: f64) -> f64 {
        match self.lookup(section, key) {
            Some(v) => v.trim().parse().unwrap_or(default),
            None => self.base.get_double(section, key, default),
        }
    }

    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool {
        // overrides never carry booleans
        self.base.get_bool(section, key, default)
    }
}

fn run_backtest(
    config_path: &Path,
    data_dir: Option<PathBuf>,
    symbols: Option<String>,
    output: Option<PathBuf>,
) -> ExitCode {
    // Stage 1: Load config
    eprintln!("Loading config from {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };

    // Stage 2: Validate and build settings, command line first
    let layered = CliOverrides::new(&adapter)
        .set("backtest", "symbols", symbols)
        .set("data", "data_dir", data_dir.map(|p| p.display().to_string()))
        .set("report", "output_dir", output.map(|p| p.display().to_string()));
    let settings = match build_run_settings(&layered) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: {e}");
            return (&e).into();
        }
    };

    let Some(data_dir) = settings.data_dir.clone() else {
        let err = TradeError::ConfigMissing {
            section: "data".into(),
            key: "data_dir".into(),
        };
        eprintln!("error: {err} (or pass --data-dir)");
        return (&err).into();
    };
    let output_dir = settings
        .output_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("report"));

    // Stage 3: Data providers
    let cache = match HistoricalCache::new(settings.cache_capacity, settings.cache_ttl) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            eprintln!("error: {e}");
            return (&e).into();
        }
    };
    eprintln!("Reading data from {}", data_dir.display());
    let provider = CachedMarketData::new(CsvAdapter::new(data_dir), cache);

    run_backtest_pipeline(&provider, &settings, &output_dir)
}

/// Stages 4-7: universe, replay, console summary, report.
pub fn run_backtest_pipeline<P>(provider: &P, settings: &RunSettings, output_dir: &Path) -> ExitCode
where
    P: MarketDataProvider + SentimentProvider,
{
    let result = match execute_backtest(provider, settings) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("error: {e}");
            return (&e).into();
        }
    };

    print_summary(&result);

    match CsvReportAdapter::new().write(&result, output_dir) {
        Ok(_) => {
            eprintln!("\nReport written to: {}", output_dir.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: failed to write report: {e}");
            (&e).into()
        }
    }
}

pub fn execute_backtest<P>(provider: &P, settings: &RunSettings) -> Result<RunResult, TradeError>
where
    P: MarketDataProvider + SentimentProvider,
{
    // Stage 4: Validate universe
    eprintln!("Validating {} symbols...", settings.symbols.len());
    let universe = validate_universe(provider, settings.symbols.clone())?;
    for symbol in &universe.skipped {
        eprintln!("warning: skipping {} (no data)", symbol);
    }

    // Stage 5: Build engine and replay
    let scorer = SignalScorer::new(settings.scoring.clone())?;
    let correlator = SentimentCorrelator::new(settings.scoring.correlator.clone())?;
    let mut engine = BacktestEngine::new(
        settings.backtest.clone(),
        scorer,
        SimulatedExecutor::new(),
        correlator,
    )?;

    eprintln!(
        "Running backtest: {} symbols, profile {}, timeframe {}",
        universe.symbols.len(),
        settings.scoring.profile,
        settings.backtest.timeframe,
    );
    engine.run(provider, Some(provider as &dyn SentimentProvider), &universe.symbols)
}

fn print_summary(result: &RunResult) {
    let report = &result.performance_report;

    eprintln!("\n=== Aggregate Results ===");
    eprintln!("Final Equity:     {:.2}", report.final_equity);
    eprintln!("Total Return:     {:.2}%", report.total_return * 100.0);
    eprintln!("Sharpe Ratio:     {:.2}", report.sharpe_ratio);
    eprintln!("Sortino Ratio:    {:.2}", report.sortino_ratio);
    eprintln!("Max Drawdown:     {:.1}%", report.max_drawdown * 100.0);
    eprintln!("Total Trades:     {}", report.total_trades);
    eprintln!("Win Rate:         {:.1}%", report.win_rate * 100.0);
    eprintln!("Profit Factor:    {:.2}", report.profit_factor);
    if let Some(c) = report.sentiment_correlation {
        eprintln!("Sentiment Corr:   {:.3}", c);
    }
    if report.event_summary.total_events > 0 {
        eprintln!(
            "Sentiment Events: {} ({} up, {} down)",
            report.event_summary.total_events,
            report.event_summary.positive_events,
            report.event_summary.negative_events,
        );
    }

    eprintln!("\n=== Per-Symbol Summary ===");
    for sr in &result.symbol_results {
        match (&sr.status, &sr.report) {
            (SymbolStatus::Failed { cause }, _) => {
                eprintln!("  {}:  FAILED ({})", sr.symbol, cause);
            }
            (status, Some(r)) => {
                let pnl_sign = if r.total_pnl >= 0.0 { "+" } else { "" };
                eprintln!(
                    "  {}:  {} trades, {:.1}% win rate, {}{:.0} [{}]",
                    sr.symbol,
                    r.total_trades,
                    r.win_rate * 100.0,
                    pnl_sign,
                    r.total_pnl,
                    status,
                );
            }
            (status, None) => eprintln!("  {}:  {}", sr.symbol, status),
        }
    }
}

fn run_validate(config_path: &Path) -> ExitCode {
    eprintln!("Validating config: {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };

    let settings = match build_run_settings(&adapter) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: {e}");
            return (&e).into();
        }
    };

    eprintln!("\nSections: {}", adapter.sections().join(", "));
    eprintln!("Symbols:          {}", settings.symbols.join(", "));
    eprintln!("Initial Capital:  {:.2}", settings.backtest.initial_capital);
    eprintln!("Signal Profile:   {}", settings.scoring.profile);
    eprintln!(
        "Position Size:    {:.1}% of cash",
        settings.backtest.execution.max_position_fraction * 100.0
    );
    eprintln!(
        "Stop / Target:    {:.1}% / {:.1}%",
        settings.backtest.execution.stop_loss_pct * 100.0,
        settings.backtest.execution.take_profit_pct * 100.0
    );
    match &settings.data_dir {
        Some(dir) => eprintln!("Data Dir:         {}", dir.display()),
        None => eprintln!("Data Dir:         (pass --data-dir)"),
    }

    eprintln!("\nConfiguration is valid.");
    ExitCode::SUCCESS
}
