//! Configuration validation and conversion.
//!
//! Reads the INI sections `[backtest]`, `[execution]`, `[signal]`,
//! `[sentiment]`, `[data]` and `[report]` through a [`ConfigPort`] and
//! turns them into the immutable config structs the engine runs on. All
//! checks happen here, before any bar is processed.

use std::path::PathBuf;

use chrono::Duration;

use crate::domain::backtest::BacktestConfig;
use crate::domain::cache::{DEFAULT_CAPACITY, DEFAULT_TTL};
use crate::domain::error::TradeError;
use crate::domain::execution::ExecutionConfig;
use crate::domain::metrics::AnalyzerConfig;
use crate::domain::signal::ScoringConfig;
use crate::domain::universe::parse_symbols;
use crate::ports::config_port::ConfigPort;

/// Everything a `backtest` invocation needs, fully validated.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub symbols: Vec<String>,
    pub backtest: BacktestConfig,
    pub scoring: ScoringConfig,
    pub data_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub cache_capacity: usize,
    pub cache_ttl: std::time::Duration,
}

pub fn validate_config(config: &dyn ConfigPort) -> Result<(), TradeError> {
    build_run_settings(config).map(|_| ())
}

pub fn build_run_settings(config: &dyn ConfigPort) -> Result<RunSettings, TradeError> {
    let symbols = build_symbols(config)?;
    let backtest = build_backtest_config(config)?;
    let scoring = build_scoring_config(config)?;

    let cache_capacity = get_usize(config, "data", "cache_capacity", DEFAULT_CAPACITY)?;
    if cache_capacity == 0 {
        return Err(TradeError::invalid_config(
            "data",
            "cache_capacity",
            "cache_capacity must be at least 1",
        ));
    }
    let ttl_secs = get_usize(config, "data", "cache_ttl_secs", DEFAULT_TTL.as_secs() as usize)?;
    if ttl_secs == 0 {
        return Err(TradeError::invalid_config(
            "data",
            "cache_ttl_secs",
            "cache_ttl_secs must be positive",
        ));
    }

    Ok(RunSettings {
        symbols,
        backtest,
        scoring,
        data_dir: non_empty(config, "data", "data_dir").map(PathBuf::from),
        output_dir: non_empty(config, "report", "output_dir").map(PathBuf::from),
        cache_capacity,
        cache_ttl: std::time::Duration::from_secs(ttl_secs as u64),
    })
}

fn build_symbols(config: &dyn ConfigPort) -> Result<Vec<String>, TradeError> {
    match non_empty(config, "backtest", "symbols") {
        Some(s) => Ok(parse_symbols(&s)?),
        None => Err(TradeError::ConfigMissing {
            section: "backtest".to_string(),
            key: "symbols".to_string(),
        }),
    }
}

pub fn build_backtest_config(config: &dyn ConfigPort) -> Result<BacktestConfig, TradeError> {
    let gap_minutes = config.get_int("data", "max_bar_gap_minutes", 0);
    if gap_minutes < 0 {
        return Err(TradeError::invalid_config(
            "data",
            "max_bar_gap_minutes",
            "max_bar_gap_minutes must be non-negative",
        ));
    }

    let backtest = BacktestConfig {
        initial_capital: config.get_double("backtest", "initial_capital", 0.0),
        // 0 leaves the limit to the bar spacing of each symbol
        max_bar_gap: (gap_minutes > 0).then(|| Duration::minutes(gap_minutes)),
        timeframe: non_empty(config, "data", "timeframe").unwrap_or_else(|| "1d".to_string()),
        bar_limit: get_usize(config, "data", "bar_limit", 1_000)?,
        parallel: config.get_bool("backtest", "parallel", false),
        execution: build_execution_config(config)?,
        analyzer: build_analyzer_config(config)?,
    };
    backtest.validate()?;
    Ok(backtest)
}

pub fn build_execution_config(config: &dyn ConfigPort) -> Result<ExecutionConfig, TradeError> {
    let base = match non_empty(config, "execution", "profile")
        .unwrap_or_else(|| "equity".to_string())
        .to_ascii_lowercase()
        .as_str()
    {
        "equity" => ExecutionConfig::equity(),
        "crypto" => ExecutionConfig::crypto(),
        other => {
            return Err(TradeError::invalid_config(
                "execution",
                "profile",
                format!("unknown profile '{}' (expected equity or crypto)", other),
            ));
        }
    };

    let precision = config.get_int("execution", "precision", base.default_precision as i64);
    if !(0..=12).contains(&precision) {
        return Err(TradeError::invalid_config(
            "execution",
            "precision",
            "precision must be between 0 and 12",
        ));
    }

    let execution = ExecutionConfig {
        max_position_fraction: config.get_double(
            "execution",
            "max_position_fraction",
            base.max_position_fraction,
        ),
        stop_loss_pct: config.get_double("execution", "stop_loss_pct", base.stop_loss_pct),
        take_profit_pct: config.get_double("execution", "take_profit_pct", base.take_profit_pct),
        default_precision: precision as u32,
        ..base
    };
    execution.validate()?;
    Ok(execution)
}

pub fn build_scoring_config(config: &dyn ConfigPort) -> Result<ScoringConfig, TradeError> {
    let profile = non_empty(config, "signal", "profile").unwrap_or_else(|| "equity".to_string());
    let mut scoring = ScoringConfig::from_profile(&profile)?;

    scoring.action_threshold =
        config.get_double("signal", "action_threshold", scoring.action_threshold);
    scoring.force_decision = config.get_bool("signal", "force_decision", scoring.force_decision);
    scoring.volume_multiplier =
        config.get_double("signal", "volume_multiplier", scoring.volume_multiplier);
    scoring.volume_boost = config.get_double("signal", "volume_boost", scoring.volume_boost);
    scoring.normalization_window = get_usize(
        config,
        "signal",
        "normalization_window",
        scoring.normalization_window,
    )?;

    let w = &mut scoring.weights;
    w.trend = config.get_double("signal", "weight_trend", w.trend);
    w.momentum = config.get_double("signal", "weight_momentum", w.momentum);
    w.volatility = config.get_double("signal", "weight_volatility", w.volatility);
    w.volume = config.get_double("signal", "weight_volume", w.volume);
    w.sentiment = config.get_double("signal", "weight_sentiment", w.sentiment);

    let p = &mut scoring.indicators;
    p.ema_fast = get_usize(config, "signal", "ema_fast", p.ema_fast)?;
    p.ema_slow = get_usize(config, "signal", "ema_slow", p.ema_slow)?;
    p.rsi = get_usize(config, "signal", "rsi_period", p.rsi)?;
    p.bollinger = get_usize(config, "signal", "bollinger_period", p.bollinger)?;
    p.atr = get_usize(config, "signal", "atr_period", p.atr)?;
    p.adx = get_usize(config, "signal", "adx_period", p.adx)?;

    let c = &mut scoring.correlator;
    c.lookback = get_usize(config, "sentiment", "lookback", c.lookback)?;
    c.overreaction_threshold =
        config.get_double("sentiment", "overreaction_threshold", c.overreaction_threshold);
    c.min_posts = get_usize(config, "sentiment", "min_posts", c.min_posts as usize)? as u64;
    let staleness = config.get_int("sentiment", "max_staleness_minutes", 0);
    if staleness < 0 {
        return Err(TradeError::invalid_config(
            "sentiment",
            "max_staleness_minutes",
            "max_staleness_minutes must be non-negative",
        ));
    }
    if staleness > 0 {
        c.max_staleness = Some(Duration::minutes(staleness));
    }

    scoring.validate()?;
    Ok(scoring)
}

pub fn build_analyzer_config(config: &dyn ConfigPort) -> Result<AnalyzerConfig, TradeError> {
    let defaults = AnalyzerConfig::default();
    let analyzer = AnalyzerConfig {
        risk_free_rate: config.get_double("backtest", "risk_free_rate", defaults.risk_free_rate),
        zscore_window: get_usize(config, "report", "zscore_window", defaults.zscore_window)?,
        z_threshold: config.get_double("report", "z_threshold", defaults.z_threshold),
        event_horizon: get_usize(config, "report", "event_horizon", defaults.event_horizon)?,
        top_events: get_usize(config, "report", "top_events", defaults.top_events)?,
    };
    analyzer.validate()?;
    Ok(analyzer)
}

fn non_empty(config: &dyn ConfigPort, section: &str, key: &str) -> Option<String> {
    config
        .get_string(section, key)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn get_usize(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: usize,
) -> Result<usize, TradeError> {
    let value = config.get_int(section, key, default as i64);
    usize::try_from(value).map_err(|_| {
        TradeError::invalid_config(section, key, format!("{} must be non-negative", key))
    })
}
