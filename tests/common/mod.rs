#![allow(dead_code)]

use chrono::{Duration, NaiveDate, NaiveDateTime};
use sentitrade::adapters::simulated_executor::SimulatedExecutor;
use sentitrade::domain::error::TradeError;
pub use sentitrade::domain::ohlcv::Bar;
use sentitrade::domain::sentiment::{SentimentPoint, SentimentReading, Side};
use sentitrade::domain::signal::{Action, ComponentScores, Scorer, Signal};
use sentitrade::ports::data_port::MarketDataProvider;
use sentitrade::ports::order_port::{OrderExecutor, OrderRecord};
use sentitrade::ports::sentiment_port::SentimentProvider;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub fn ts(day: usize) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        + Duration::days(day as i64)
}

pub fn make_bar(day: usize, close: f64) -> Bar {
    Bar {
        timestamp: ts(day),
        open: close,
        high: close,
        low: close,
        close,
        volume: 1000.0,
    }
}

pub fn make_bars(closes: &[f64]) -> Vec<Bar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| make_bar(i, c))
        .collect()
}

/// Smooth oscillating series with a drift, enough to move every indicator.
pub fn wave(n: usize, base: f64) -> Vec<f64> {
    (0..n)
        .map(|i| {
            let t = i as f64;
            base + 0.05 * t + 4.0 * (t / 5.0).sin() + 1.5 * (t / 2.3).cos()
        })
        .collect()
}

/// In-memory market data, keyed by symbol.
#[derive(Default)]
pub struct MockMarket {
    pub bars: HashMap<String, Vec<Bar>>,
    pub errors: HashMap<String, String>,
    pub sentiment: HashMap<String, Vec<SentimentPoint>>,
    pub activity: HashMap<String, (bool, f64)>,
    pub fetches: AtomicUsize,
}

impl MockMarket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bars(mut self, symbol: &str, bars: Vec<Bar>) -> Self {
        self.bars.insert(symbol.to_string(), bars);
        self
    }

    pub fn with_error(mut self, symbol: &str, reason: &str) -> Self {
        self.errors.insert(symbol.to_string(), reason.to_string());
        self
    }

    pub fn with_sentiment(mut self, symbol: &str, points: Vec<SentimentPoint>) -> Self {
        self.sentiment.insert(symbol.to_string(), points);
        self
    }

    pub fn with_activity(mut self, symbol: &str, active: bool, score: f64) -> Self {
        self.activity.insert(symbol.to_string(), (active, score));
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl MarketDataProvider for MockMarket {
    fn get_price_data(
        &self,
        symbol: &str,
        _timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Bar>, TradeError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = self.errors.get(symbol) {
            return Err(TradeError::data_unavailable(symbol, reason.clone()));
        }
        let bars = self
            .bars
            .get(symbol)
            .ok_or_else(|| TradeError::data_unavailable(symbol, "unknown symbol"))?;
        Ok(bars[bars.len().saturating_sub(limit)..].to_vec())
    }

    fn get_current_price(&self, symbol: &str) -> Result<f64, TradeError> {
        self.bars
            .get(symbol)
            .and_then(|b| b.last())
            .map(|b| b.close)
            .ok_or_else(|| TradeError::data_unavailable(symbol, "no quote"))
    }

    fn validate_symbol(&self, symbol: &str) -> bool {
        self.bars.contains_key(symbol) || self.errors.contains_key(symbol)
    }
}

impl SentimentProvider for MockMarket {
    fn get_sentiment_series(&self, symbol: &str, _window: Duration) -> Option<Vec<SentimentPoint>> {
        self.sentiment.get(symbol).cloned()
    }

    fn get_social_activity_score(&self, symbol: &str) -> (bool, f64) {
        self.activity.get(symbol).copied().unwrap_or((false, 0.0))
    }
}

/// Market whose price fetch blocks longer than any sensible call timeout.
pub struct SlowMarket {
    pub delay: std::time::Duration,
}

impl MarketDataProvider for SlowMarket {
    fn get_price_data(&self, _: &str, _: &str, _: usize) -> Result<Vec<Bar>, TradeError> {
        std::thread::sleep(self.delay);
        Ok(make_bars(&[100.0; 5]))
    }

    fn get_current_price(&self, _: &str) -> Result<f64, TradeError> {
        std::thread::sleep(self.delay);
        Ok(100.0)
    }

    fn validate_symbol(&self, _: &str) -> bool {
        true
    }
}

/// Broker that answers only after `delay`, counting the fills it made.
pub struct SlowExecutor {
    pub delay: std::time::Duration,
    pub fills: Arc<AtomicUsize>,
    inner: SimulatedExecutor,
}

impl SlowExecutor {
    pub fn new(delay: std::time::Duration, fills: Arc<AtomicUsize>) -> Self {
        Self {
            delay,
            fills,
            inner: SimulatedExecutor::new(),
        }
    }
}

impl OrderExecutor for SlowExecutor {
    fn execute_trade(
        &mut self,
        symbol: &str,
        side: Side,
        quantity: f64,
        price: f64,
        timestamp: NaiveDateTime,
    ) -> Result<OrderRecord, TradeError> {
        std::thread::sleep(self.delay);
        let record = self.inner.execute_trade(symbol, side, quantity, price, timestamp)?;
        self.fills.fetch_add(1, Ordering::SeqCst);
        Ok(record)
    }
}

/// Emits the scripted action for the bar at index `bars.len() - 1`.
#[derive(Clone)]
pub struct ScriptedScorer(pub Vec<Action>);

impl Scorer for ScriptedScorer {
    fn score(
        &mut self,
        symbol: &str,
        bars: &[Bar],
        _sentiment: Option<&SentimentReading>,
    ) -> Option<Signal> {
        let last = bars.last()?;
        let action = *self.0.get(bars.len() - 1)?;
        Some(signal(symbol, last.timestamp, action))
    }
}

/// Emits the scripted actions in call order, then holds.
#[derive(Clone)]
pub struct SequenceScorer {
    pub actions: Vec<Action>,
    pub calls: usize,
}

impl SequenceScorer {
    pub fn new(actions: Vec<Action>) -> Self {
        Self { actions, calls: 0 }
    }
}

impl Scorer for SequenceScorer {
    fn score(
        &mut self,
        symbol: &str,
        bars: &[Bar],
        _sentiment: Option<&SentimentReading>,
    ) -> Option<Signal> {
        let last = bars.last()?;
        let action = self.actions.get(self.calls).copied().unwrap_or(Action::Hold);
        self.calls += 1;
        Some(signal(symbol, last.timestamp, action))
    }
}

pub fn signal(symbol: &str, timestamp: NaiveDateTime, action: Action) -> Signal {
    Signal {
        symbol: symbol.to_string(),
        timestamp,
        action,
        strength: 0.0,
        components: ComponentScores::default(),
        reasons: vec![],
    }
}

/// One sentiment sample per bar whose score is `factor` times that bar's
/// return, so the score/return correlation is exactly `sign(factor)`.
pub fn sentiment_tracking_returns(bars: &[Bar], factor: f64, posts: u64) -> Vec<SentimentPoint> {
    bars.iter()
        .enumerate()
        .skip(1)
        .map(|(i, b)| SentimentPoint {
            timestamp: b.timestamp,
            score: factor * (b.close / bars[i - 1].close - 1.0),
            post_count: posts,
        })
        .collect()
}

pub const VALID_INI: &str = "\
[backtest]
initial_capital = 10000
symbols = AAPL

[execution]
max_position_fraction = 0.1
stop_loss_pct = 0.05
take_profit_pct = 0.10

[signal]
profile = equity
";
