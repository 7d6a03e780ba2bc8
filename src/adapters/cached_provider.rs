//! Read-through cache in front of a market data provider.

use std::sync::Arc;

use chrono::Duration;
use tracing::debug;

use crate::domain::cache::{CacheKey, HistoricalCache};
use crate::domain::error::TradeError;
use crate::domain::ohlcv::Bar;
use crate::domain::sentiment::SentimentPoint;
use crate::ports::data_port::MarketDataProvider;
use crate::ports::sentiment_port::SentimentProvider;

/// Wraps `P`, serving repeated `get_price_data` calls for the same
/// (symbol, timeframe, limit) from a shared [`HistoricalCache`].
///
/// Failed fetches are not cached. Current prices and sentiment always go
/// to the inner provider.
pub struct CachedMarketData<P> {
    inner: P,
    cache: Arc<HistoricalCache>,
}

impl<P> CachedMarketData<P> {
    pub fn new(inner: P, cache: Arc<HistoricalCache>) -> Self {
        Self { inner, cache }
    }

    pub fn cache(&self) -> &Arc<HistoricalCache> {
        &self.cache
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

impl<P: MarketDataProvider> MarketDataProvider for CachedMarketData<P> {
    fn get_price_data(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Bar>, TradeError> {
        let key = CacheKey::new(symbol, timeframe, limit);
        if let Some(bars) = self.cache.get(&key) {
            debug!(symbol, timeframe, "cache hit");
            return Ok(bars.to_vec());
        }
        let bars = self.inner.get_price_data(symbol, timeframe, limit)?;
        self.cache.insert(key, bars.clone());
        Ok(bars)
    }

    fn get_current_price(&self, symbol: &str) -> Result<f64, TradeError> {
        self.inner.get_current_price(symbol)
    }

    fn validate_symbol(&self, symbol: &str) -> bool {
        self.inner.validate_symbol(symbol)
    }
}

impl<P: SentimentProvider> SentimentProvider for CachedMarketData<P> {
    fn get_sentiment_series(&self, symbol: &str, window: Duration) -> Option<Vec<SentimentPoint>> {
        self.inner.get_sentiment_series(symbol, window)
    }

    fn get_social_activity_score(&self, symbol: &str) -> (bool, f64) {
        self.inner.get_social_activity_score(symbol)
    }
}
