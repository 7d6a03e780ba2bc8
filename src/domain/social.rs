//! Social activity scoring.
//!
//! Half of the score comes from the current level of attention (watchers,
//! posts, sentiment strength), half from how fast it is changing. Each term
//! saturates at 1 before weighting, so the score lies in [0, 1].

pub const ACTIVITY_THRESHOLD: f64 = 0.3;

const WATCHERS_SCALE: f64 = 500.0;
const POSTS_SCALE: f64 = 25.0;

#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SocialMetrics {
    pub watchers: u64,
    pub posts: u64,
    /// Net bullish ratio in [-1, 1].
    pub sentiment: f64,
    pub watchers_change: f64,
    pub posts_change: f64,
    pub sentiment_change: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActivityScore {
    pub score: f64,
    pub is_active: bool,
}

pub fn activity_score(m: &SocialMetrics) -> ActivityScore {
    let watchers = m.watchers as f64;
    let posts = m.posts as f64;
    let mut score = 0.0;

    if watchers > 0.0 {
        score += (watchers / WATCHERS_SCALE).min(1.0) * 0.2;
    }
    if posts > 0.0 {
        score += (posts / POSTS_SCALE).min(1.0) * 0.15;
    }
    if m.sentiment.is_finite() {
        score += m.sentiment.abs().min(1.0) * 0.15;
    }

    if watchers > 0.0 && m.watchers_change > 0.0 {
        score += (m.watchers_change / watchers).min(1.0) * 0.2;
    }
    if posts > 0.0 && m.posts_change > 0.0 {
        score += (m.posts_change / posts).min(1.0) * 0.15;
    }
    if m.sentiment_change.is_finite() {
        score += m.sentiment_change.abs().min(1.0) * 0.15;
    }

    ActivityScore {
        score,
        is_active: score > ACTIVITY_THRESHOLD,
    }
}
