//! CSV file market data and sentiment adapter.
//!
//! Layout under `base_path`:
//! - `<SYMBOL>.csv` or `<SYMBOL>_<timeframe>.csv`: timestamp,open,high,low,close,volume
//! - `<SYMBOL>_sentiment.csv`: timestamp,score,post_count
//!
//! `/` in a symbol maps to `_` in file names (`BTC/USD` reads `BTC_USD.csv`).
//! Timestamps may be `YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS` or RFC 3339-style
//! `YYYY-MM-DDTHH:MM:SS`.

use std::fs;
use std::path::PathBuf;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use tracing::{debug, warn};

use crate::domain::error::TradeError;
use crate::domain::ohlcv::{Bar, normalize_bars};
use crate::domain::sentiment::SentimentPoint;
use crate::domain::social::{SocialMetrics, activity_score};
use crate::ports::data_port::MarketDataProvider;
use crate::ports::sentiment_port::SentimentProvider;

pub struct CsvAdapter {
    base_path: PathBuf,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn file_stem(symbol: &str) -> String {
        symbol.replace('/', "_")
    }

    fn price_path(&self, symbol: &str, timeframe: &str) -> PathBuf {
        let stem = Self::file_stem(symbol);
        let specific = self.base_path.join(format!("{}_{}.csv", stem, timeframe));
        if specific.is_file() {
            specific
        } else {
            self.base_path.join(format!("{}.csv", stem))
        }
    }

    fn sentiment_path(&self, symbol: &str) -> PathBuf {
        self.base_path
            .join(format!("{}_sentiment.csv", Self::file_stem(symbol)))
    }

    fn read_bars(&self, symbol: &str, timeframe: &str) -> Result<Vec<Bar>, TradeError> {
        let path = self.price_path(symbol, timeframe);
        let content = fs::read_to_string(&path).map_err(|e| {
            TradeError::data_unavailable(symbol, format!("failed to read {}: {}", path.display(), e))
        })?;

        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        let mut bars = Vec::new();
        for result in rdr.records() {
            let record = result?;
            let field = |i: usize, name: &str| {
                record
                    .get(i)
                    .map(str::trim)
                    .ok_or_else(|| TradeError::data_unavailable(symbol, format!("missing {} column", name)))
            };
            let number = |i: usize, name: &str| -> Result<f64, TradeError> {
                field(i, name)?.parse().map_err(|e| {
                    TradeError::data_unavailable(symbol, format!("invalid {} value: {}", name, e))
                })
            };

            bars.push(Bar {
                timestamp: parse_timestamp(field(0, "timestamp")?)
                    .ok_or_else(|| TradeError::data_unavailable(symbol, "invalid timestamp"))?,
                open: number(1, "open")?,
                high: number(2, "high")?,
                low: number(3, "low")?,
                close: number(4, "close")?,
                volume: number(5, "volume")?,
            });
        }
        Ok(normalize_bars(symbol, bars))
    }

    fn read_sentiment(&self, symbol: &str) -> Option<Vec<SentimentPoint>> {
        let path = self.sentiment_path(symbol);
        let content = fs::read_to_string(&path).ok()?;
        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        let mut points = Vec::new();
        for (line, result) in rdr.records().enumerate() {
            let parsed = result.ok().and_then(|r| {
                Some(SentimentPoint {
                    timestamp: parse_timestamp(r.get(0)?.trim())?,
                    score: r.get(1)?.trim().parse().ok()?,
                    post_count: r.get(2)?.trim().parse().ok()?,
                })
            });
            match parsed {
                Some(p) if p.score.is_finite() => points.push(p),
                _ => warn!(symbol, line = line + 2, stage = "load", "skipping bad sentiment row"),
            }
        }
        points.sort_by_key(|p| p.timestamp);
        if points.is_empty() { None } else { Some(points) }
    }
}

pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

impl MarketDataProvider for CsvAdapter {
    fn get_price_data(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Bar>, TradeError> {
        let mut bars = self.read_bars(symbol, timeframe)?;
        if bars.len() > limit {
            bars.drain(..bars.len() - limit);
        }
        debug!(symbol, timeframe, bars = bars.len(), "loaded bars from csv");
        Ok(bars)
    }

    fn get_current_price(&self, symbol: &str) -> Result<f64, TradeError> {
        self.read_bars(symbol, "")?
            .last()
            .map(|b| b.close)
            .ok_or_else(|| TradeError::data_unavailable(symbol, "no bars"))
    }

    fn validate_symbol(&self, symbol: &str) -> bool {
        self.price_path(symbol, "").is_file()
    }
}

impl SentimentProvider for CsvAdapter {
    fn get_sentiment_series(&self, symbol: &str, window: Duration) -> Option<Vec<SentimentPoint>> {
        let points = self.read_sentiment(symbol)?;
        let cutoff = points.last()?.timestamp - window;
        let recent: Vec<SentimentPoint> =
            points.into_iter().filter(|p| p.timestamp >= cutoff).collect();
        if recent.is_empty() { None } else { Some(recent) }
    }

    /// Activity from the two most recent samples: post volume, sentiment
    /// strength and how both moved.
    fn get_social_activity_score(&self, symbol: &str) -> (bool, f64) {
        let Some(points) = self.read_sentiment(symbol) else {
            return (false, 0.0);
        };
        let Some(last) = points.last() else {
            return (false, 0.0);
        };
        let prev = points.len().checked_sub(2).map(|i| &points[i]);
        let metrics = SocialMetrics {
            watchers: 0,
            posts: last.post_count,
            sentiment: last.score,
            watchers_change: 0.0,
            posts_change: prev
                .map(|p| last.post_count as f64 - p.post_count as f64)
                .unwrap_or(0.0),
            sentiment_change: prev.map(|p| last.score - p.score).unwrap_or(0.0),
        };
        let activity = activity_score(&metrics);
        (activity.is_active, activity.score)
    }
}
