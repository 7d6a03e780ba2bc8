//! Sentiment/price correlation and overreaction detection.
//!
//! Sentiment samples arrive on their own clock. They are aligned to bar
//! timestamps by carrying the latest sample at or before each bar forward,
//! up to `max_staleness`. The correlator then computes a Pearson
//! correlation between aligned scores and bar returns over the trailing
//! `lookback` bars.

use chrono::{Duration, NaiveDateTime};
use tracing::debug;

use super::error::TradeError;
use super::ohlcv::Bar;
use super::stats::{pct_returns, pearson};

pub const DEFAULT_LOOKBACK: usize = 12;
pub const DEFAULT_OVERREACTION_THRESHOLD: f64 = 0.7;
pub const DEFAULT_MIN_POSTS: u64 = 20;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SentimentPoint {
    pub timestamp: NaiveDateTime,
    /// Polarity in [-1, 1].
    pub score: f64,
    pub post_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn sign(self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Contrarian side for a sentiment/price correlation.
///
/// Positive correlation means the crowd is chasing the move, so fade it.
pub fn side_for(correlation: f64) -> Side {
    if correlation > 0.0 { Side::Sell } else { Side::Buy }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CorrelatorConfig {
    pub lookback: usize,
    pub overreaction_threshold: f64,
    pub min_posts: u64,
    /// Oldest sentiment sample that may be carried forward onto a bar.
    /// `None` carries forever.
    pub max_staleness: Option<Duration>,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        CorrelatorConfig {
            lookback: DEFAULT_LOOKBACK,
            overreaction_threshold: DEFAULT_OVERREACTION_THRESHOLD,
            min_posts: DEFAULT_MIN_POSTS,
            max_staleness: None,
        }
    }
}

impl CorrelatorConfig {
    pub fn validate(&self) -> Result<(), TradeError> {
        if self.lookback < 2 {
            return Err(TradeError::invalid_config(
                "sentiment",
                "lookback",
                "must be at least 2",
            ));
        }
        let t = self.overreaction_threshold;
        if !t.is_finite() || t <= 0.0 || t > 1.0 {
            return Err(TradeError::invalid_config(
                "sentiment",
                "overreaction_threshold",
                format!("must be in (0, 1], got {}", t),
            ));
        }
        if let Some(s) = self.max_staleness {
            if s <= Duration::zero() {
                return Err(TradeError::invalid_config(
                    "sentiment",
                    "max_staleness_minutes",
                    "must be positive",
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentimentReading {
    pub correlation: f64,
    pub overreaction: bool,
    pub side: Side,
    /// Number of (score, return) pairs behind the correlation.
    pub sample_size: usize,
    pub post_count: u64,
}

/// Index of the sentiment sample carried onto each bar.
///
/// `sentiment` must be sorted by timestamp.
pub fn align_indices(
    bars: &[Bar],
    sentiment: &[SentimentPoint],
    max_staleness: Option<Duration>,
) -> Vec<Option<usize>> {
    let mut out = Vec::with_capacity(bars.len());
    let mut next = 0;
    let mut current: Option<usize> = None;
    for bar in bars {
        while next < sentiment.len() && sentiment[next].timestamp <= bar.timestamp {
            current = Some(next);
            next += 1;
        }
        let carried = current.filter(|&i| match max_staleness {
            Some(limit) => bar.timestamp - sentiment[i].timestamp <= limit,
            None => true,
        });
        out.push(carried);
    }
    out
}

/// Correlation of `scores[i]` against `returns[i + lag]`, skipping pairs
/// where either side is missing.
pub fn lagged_correlation(
    scores: &[Option<f64>],
    returns: &[Option<f64>],
    lag: usize,
) -> Option<(f64, usize)> {
    let mut xs = Vec::new();
    let mut ys = Vec::new();
    for (i, s) in scores.iter().enumerate() {
        if let (Some(s), Some(Some(r))) = (s, returns.get(i + lag)) {
            xs.push(*s);
            ys.push(*r);
        }
    }
    pearson(&xs, &ys).map(|c| (c, xs.len()))
}

/// Lag in `0..min(10, n/2)` with the largest absolute correlation.
pub fn optimal_lag(scores: &[Option<f64>], returns: &[Option<f64>]) -> Option<(usize, f64)> {
    let max_lag = 10.min(scores.len() / 2);
    let mut best: Option<(usize, f64)> = None;
    for lag in 0..max_lag {
        if let Some((c, _)) = lagged_correlation(scores, returns, lag) {
            if best.is_none_or(|(_, b)| c.abs() > b.abs()) {
                best = Some((lag, c));
            }
        }
    }
    best
}

#[derive(Debug, Clone)]
pub struct SentimentCorrelator {
    config: CorrelatorConfig,
}

impl SentimentCorrelator {
    pub fn new(config: CorrelatorConfig) -> Result<Self, TradeError> {
        config.validate()?;
        Ok(SentimentCorrelator { config })
    }

    pub fn config(&self) -> &CorrelatorConfig {
        &self.config
    }

    /// Correlation reading for the last bar of `bars`.
    ///
    /// Returns `None` ("no sentiment signal") when the trailing window is
    /// short, any bar in it has no carried sentiment, the window's posts
    /// fall below `min_posts`, or either input has zero variance.
    pub fn read(
        &self,
        symbol: &str,
        bars: &[Bar],
        sentiment: &[SentimentPoint],
    ) -> Option<SentimentReading> {
        let n = self.config.lookback;
        if bars.len() < n + 1 || sentiment.is_empty() {
            return None;
        }
        let window = &bars[bars.len() - n - 1..];
        let start = sentiment
            .partition_point(|s| s.timestamp <= window[0].timestamp)
            .saturating_sub(1);
        let sentiment = &sentiment[start..];
        let indices = align_indices(window, sentiment, self.config.max_staleness);

        // first bar only anchors the first return
        let used: Vec<usize> = indices[1..].iter().copied().collect::<Option<Vec<_>>>()?;
        let mut distinct = used.clone();
        distinct.dedup();
        let post_count: u64 = distinct.iter().map(|&i| sentiment[i].post_count).sum();
        if post_count < self.config.min_posts {
            debug!(
                symbol,
                post_count,
                min_posts = self.config.min_posts,
                stage = "sentiment",
                "insufficient posts, no sentiment signal"
            );
            return None;
        }

        let closes: Vec<f64> = window.iter().map(|b| b.close).collect();
        let returns: Vec<f64> = pct_returns(&closes)
            .into_iter()
            .skip(1)
            .collect::<Option<Vec<_>>>()?;
        let scores: Vec<f64> = used.iter().map(|&i| sentiment[i].score).collect();

        let correlation = pearson(&scores, &returns)?;
        let overreaction = correlation.abs() >= self.config.overreaction_threshold;
        let side = side_for(correlation);
        if overreaction {
            debug!(
                symbol,
                correlation,
                side = %side,
                stage = "sentiment",
                "overreaction detected"
            );
        }
        Some(SentimentReading {
            correlation,
            overreaction,
            side,
            sample_size: scores.len(),
            post_count,
        })
    }
}
