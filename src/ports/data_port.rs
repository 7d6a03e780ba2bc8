//! Market data port.

use crate::domain::error::TradeError;
use crate::domain::ohlcv::Bar;

pub trait MarketDataProvider {
    /// Up to `limit` most recent bars for `timeframe` (e.g. "1m", "1h",
    /// "1d"), oldest first.
    fn get_price_data(&self, symbol: &str, timeframe: &str, limit: usize)
    -> Result<Vec<Bar>, TradeError>;

    fn get_current_price(&self, symbol: &str) -> Result<f64, TradeError>;

    fn validate_symbol(&self, symbol: &str) -> bool;
}
