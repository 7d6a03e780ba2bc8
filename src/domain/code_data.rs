//! Per-symbol replay input and the unified multi-symbol timeline.

use crate::domain::ohlcv::Bar;
use crate::domain::sentiment::SentimentPoint;
use chrono::NaiveDateTime;
use std::collections::BTreeSet;

#[derive(Debug, Clone)]
pub struct SymbolData {
    pub symbol: String,
    pub bars: Vec<Bar>,
    /// Sorted by timestamp. Empty when no sentiment source is configured.
    pub sentiment: Vec<SentimentPoint>,
}

impl SymbolData {
    pub fn new(symbol: String, bars: Vec<Bar>) -> Self {
        Self {
            symbol,
            bars,
            sentiment: Vec::new(),
        }
    }

    pub fn with_sentiment(mut self, mut sentiment: Vec<SentimentPoint>) -> Self {
        sentiment.sort_by_key(|s| s.timestamp);
        self.sentiment = sentiment;
        self
    }

    pub fn bar_count(&self) -> usize {
        self.bars.len()
    }
}

/// Sorted union of timestamps across all series.
pub fn build_unified_timeline<'a, I>(series: I) -> Vec<NaiveDateTime>
where
    I: IntoIterator<Item = &'a [NaiveDateTime]>,
{
    let unique: BTreeSet<NaiveDateTime> = series
        .into_iter()
        .flat_map(|s| s.iter().copied())
        .collect();
    unique.into_iter().collect()
}
