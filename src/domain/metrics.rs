//! Performance analysis of a finished run.
//!
//! Reads the equity curve and trade log only. Sentiment impact statistics
//! are computed separately from bars plus the raw sentiment series and
//! attached to the report.

use chrono::{Duration, NaiveDateTime};

use super::error::TradeError;
use super::ohlcv::Bar;
use super::portfolio::EquityPoint;
use super::position::Trade;
use super::sentiment::{SentimentPoint, align_indices, lagged_correlation, optimal_lag};
use super::stats::{pct_returns, z_score};

const TRADING_DAYS_PER_YEAR: f64 = 252.0;

#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzerConfig {
    /// Annual rate; divided by 252 per period.
    pub risk_free_rate: f64,
    /// Trailing samples behind each sentiment z-score.
    pub zscore_window: usize,
    pub z_threshold: f64,
    /// Bars ahead used to measure an event's price move.
    pub event_horizon: usize,
    pub top_events: usize,
}

impl AnalyzerConfig {
    pub fn validate(&self) -> Result<(), TradeError> {
        if !(self.risk_free_rate.is_finite() && (0.0..1.0).contains(&self.risk_free_rate)) {
            return Err(TradeError::invalid_config(
                "backtest",
                "risk_free_rate",
                "risk_free_rate must be between 0 and 1",
            ));
        }
        if self.zscore_window < 2 {
            return Err(TradeError::invalid_config(
                "report",
                "zscore_window",
                "zscore_window must be at least 2",
            ));
        }
        if !(self.z_threshold.is_finite() && self.z_threshold > 0.0) {
            return Err(TradeError::invalid_config(
                "report",
                "z_threshold",
                "z_threshold must be positive",
            ));
        }
        if self.event_horizon == 0 {
            return Err(TradeError::invalid_config(
                "report",
                "event_horizon",
                "event_horizon must be at least 1",
            ));
        }
        Ok(())
    }
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        AnalyzerConfig {
            risk_free_rate: 0.0,
            zscore_window: 20,
            z_threshold: 2.0,
            event_horizon: 5,
            top_events: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SentimentEvent {
    pub symbol: String,
    pub timestamp: NaiveDateTime,
    pub pre_move_sentiment: f64,
    pub z_score: f64,
    pub price_move: f64,
    pub post_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EventSummary {
    pub total_events: usize,
    pub positive_events: usize,
    pub negative_events: usize,
    pub avg_positive_move: f64,
    pub avg_negative_move: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SentimentImpact {
    pub correlation: Option<f64>,
    pub optimal_lag: Option<usize>,
    /// Top events by |price_move|, largest first.
    pub top_events: Vec<SentimentEvent>,
    pub summary: EventSummary,
}

impl SentimentImpact {
    /// Combine per-symbol impacts. Correlation and lag are only meaningful
    /// for a single series, so they survive only when exactly one impact is
    /// given.
    pub fn merge(impacts: &[SentimentImpact], top: usize) -> SentimentImpact {
        if let [single] = impacts {
            return single.clone();
        }
        let mut summary = EventSummary::default();
        let mut pos_sum = 0.0;
        let mut neg_sum = 0.0;
        let mut events = Vec::new();
        for impact in impacts {
            let s = &impact.summary;
            summary.total_events += s.total_events;
            summary.positive_events += s.positive_events;
            summary.negative_events += s.negative_events;
            pos_sum += s.avg_positive_move * s.positive_events as f64;
            neg_sum += s.avg_negative_move * s.negative_events as f64;
            events.extend(impact.top_events.iter().cloned());
        }
        if summary.positive_events > 0 {
            summary.avg_positive_move = pos_sum / summary.positive_events as f64;
        }
        if summary.negative_events > 0 {
            summary.avg_negative_move = neg_sum / summary.negative_events as f64;
        }
        events.sort_by(|a, b| b.price_move.abs().total_cmp(&a.price_move.abs()));
        events.truncate(top);
        SentimentImpact {
            correlation: None,
            optimal_lag: None,
            top_events: events,
            summary,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceReport {
    pub initial_capital: f64,
    pub final_equity: f64,
    pub total_return: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    /// Non-positive fraction in [-1, 0].
    pub max_drawdown: f64,
    pub max_drawdown_duration: usize,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub avg_trade_pnl: f64,
    pub avg_duration: Duration,
    pub profit_factor: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub sentiment_correlation: Option<f64>,
    pub optimal_sentiment_lag: Option<usize>,
    pub significant_events: Vec<SentimentEvent>,
    pub event_summary: EventSummary,
}

impl PerformanceReport {
    pub fn compute(
        initial_capital: f64,
        equity_curve: &[EquityPoint],
        trades: &[Trade],
        config: &AnalyzerConfig,
    ) -> Self {
        let final_equity = equity_curve
            .last()
            .map(|p| p.equity)
            .unwrap_or(initial_capital);

        let total_return = if initial_capital > 0.0 {
            (final_equity - initial_capital) / initial_capital
        } else {
            0.0
        };

        let (max_drawdown, max_drawdown_duration) = compute_drawdown(equity_curve);

        let (sharpe_ratio, sortino_ratio) = if trades.is_empty() {
            (0.0, 0.0)
        } else {
            compute_risk_adjusted(equity_curve, config.risk_free_rate / TRADING_DAYS_PER_YEAR)
        };

        let mut winning_trades = 0usize;
        let mut losing_trades = 0usize;
        let mut total_wins = 0.0_f64;
        let mut total_losses = 0.0_f64;
        let mut largest_win = 0.0_f64;
        let mut largest_loss = 0.0_f64;
        let mut total_duration = Duration::zero();

        for trade in trades {
            let pnl = trade.pnl;
            if pnl > 0.0 {
                winning_trades += 1;
                total_wins += pnl;
                largest_win = largest_win.max(pnl);
            } else if pnl < 0.0 {
                losing_trades += 1;
                total_losses += pnl.abs();
                largest_loss = largest_loss.max(pnl.abs());
            }
            total_duration += trade.duration();
        }

        let total_trades = trades.len();
        let total_pnl: f64 = trades.iter().map(|t| t.pnl).sum();
        let (win_rate, avg_trade_pnl, avg_duration) = if total_trades > 0 {
            (
                winning_trades as f64 / total_trades as f64,
                total_pnl / total_trades as f64,
                total_duration / total_trades as i32,
            )
        } else {
            (0.0, 0.0, Duration::zero())
        };

        let profit_factor = if total_losses > 0.0 {
            total_wins / total_losses
        } else if total_wins > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        PerformanceReport {
            initial_capital,
            final_equity,
            total_return,
            sharpe_ratio,
            sortino_ratio,
            max_drawdown,
            max_drawdown_duration,
            total_trades,
            winning_trades,
            losing_trades,
            win_rate,
            total_pnl,
            avg_trade_pnl,
            avg_duration,
            profit_factor,
            largest_win,
            largest_loss,
            sentiment_correlation: None,
            optimal_sentiment_lag: None,
            significant_events: Vec::new(),
            event_summary: EventSummary::default(),
        }
    }

    pub fn with_sentiment(mut self, impact: SentimentImpact) -> Self {
        self.sentiment_correlation = impact.correlation;
        self.optimal_sentiment_lag = impact.optimal_lag;
        self.significant_events = impact.top_events;
        self.event_summary = impact.summary;
        self
    }
}

/// Returns (max drawdown as a non-positive fraction, longest run of bars
/// spent below a prior peak).
fn compute_drawdown(equity_curve: &[EquityPoint]) -> (f64, usize) {
    let Some(first) = equity_curve.first() else {
        return (0.0, 0);
    };

    let mut peak = first.equity;
    let mut max_dd = 0.0_f64;
    let mut max_dd_duration = 0usize;
    let mut current_dd_duration = 0usize;

    for point in equity_curve {
        if point.equity >= peak {
            peak = point.equity;
            current_dd_duration = 0;
        } else if peak > 0.0 {
            let dd = ((peak - point.equity) / peak).min(1.0);
            max_dd = max_dd.max(dd);
            current_dd_duration += 1;
            max_dd_duration = max_dd_duration.max(current_dd_duration);
        }
    }

    (-max_dd, max_dd_duration)
}

fn compute_risk_adjusted(equity_curve: &[EquityPoint], periodic_rf: f64) -> (f64, f64) {
    if equity_curve.len() < 2 {
        return (0.0, 0.0);
    }

    let returns: Vec<f64> = equity_curve
        .windows(2)
        .map(|w| {
            let prev = w[0].equity;
            let curr = w[1].equity;
            if prev > 0.0 { (curr - prev) / prev } else { 0.0 }
        })
        .collect();

    let n = returns.len() as f64;
    let mean: f64 = returns.iter().sum::<f64>() / n;
    let variance: f64 = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let stddev = variance.sqrt();
    let excess_return = mean - periodic_rf;

    let sharpe = if stddev > 0.0 {
        (excess_return / stddev) * TRADING_DAYS_PER_YEAR.sqrt()
    } else {
        0.0
    };

    let downside_sq: f64 = returns
        .iter()
        .filter(|&&r| r < periodic_rf)
        .map(|&r| (r - periodic_rf).powi(2))
        .sum();
    let downside_stddev = (downside_sq / n).sqrt();

    let sortino = if downside_stddev > 0.0 {
        (excess_return / downside_stddev) * TRADING_DAYS_PER_YEAR.sqrt()
    } else {
        0.0
    };

    (sharpe, sortino)
}

/// Sentiment/price statistics over a whole run.
///
/// `sentiment` must be sorted by timestamp. Each bar carries the latest
/// sample at or before it.
pub fn analyze_sentiment(
    symbol: &str,
    bars: &[Bar],
    sentiment: &[SentimentPoint],
    config: &AnalyzerConfig,
) -> SentimentImpact {
    let indices = align_indices(bars, sentiment, None);
    let scores: Vec<Option<f64>> = indices
        .iter()
        .map(|i| i.map(|i| sentiment[i].score))
        .collect();
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let returns = pct_returns(&closes);

    let correlation = lagged_correlation(&scores, &returns, 0).map(|(c, _)| c);
    let optimal_lag = optimal_lag(&scores, &returns).map(|(lag, _)| lag);

    let mut events = Vec::new();
    let w = config.zscore_window;
    for i in w..bars.len() {
        let (Some(score), Some(idx)) = (scores[i], indices[i]) else {
            continue;
        };
        let history: Option<Vec<f64>> = scores[i - w..i].iter().copied().collect();
        let Some(history) = history else {
            continue;
        };
        let Some(z) = z_score(score, &history) else {
            continue;
        };
        if z.abs() <= config.z_threshold {
            continue;
        }
        let Some(end) = bars.get(i + config.event_horizon) else {
            continue;
        };
        let start = bars[i].close;
        if start <= 0.0 {
            continue;
        }
        events.push(SentimentEvent {
            symbol: symbol.to_string(),
            timestamp: bars[i].timestamp,
            pre_move_sentiment: score,
            z_score: z,
            price_move: (end.close - start) / start,
            post_count: sentiment[idx].post_count,
        });
    }

    let positive: Vec<f64> = events
        .iter()
        .map(|e| e.price_move)
        .filter(|&m| m > 0.0)
        .collect();
    let negative: Vec<f64> = events
        .iter()
        .map(|e| e.price_move)
        .filter(|&m| m < 0.0)
        .collect();
    let avg = |xs: &[f64]| {
        if xs.is_empty() {
            0.0
        } else {
            xs.iter().sum::<f64>() / xs.len() as f64
        }
    };
    let summary = EventSummary {
        total_events: events.len(),
        positive_events: positive.len(),
        negative_events: negative.len(),
        avg_positive_move: avg(&positive),
        avg_negative_move: avg(&negative),
    };

    events.sort_by(|a, b| b.price_move.abs().total_cmp(&a.price_move.abs()));
    events.truncate(config.top_events);

    SentimentImpact {
        correlation,
        optimal_lag,
        top_events: events,
        summary,
    }
}
