//! Social sentiment port.

use chrono::Duration;

use crate::domain::sentiment::SentimentPoint;

pub trait SentimentProvider {
    /// Samples covering the trailing `window`, oldest first. `None` when
    /// the source has nothing for the symbol.
    fn get_sentiment_series(&self, symbol: &str, window: Duration) -> Option<Vec<SentimentPoint>>;

    /// `(is_active, score)` from the symbol's current social activity.
    fn get_social_activity_score(&self, symbol: &str) -> (bool, f64);
}
