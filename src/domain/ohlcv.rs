//! OHLCV bar representation and input normalization.

use chrono::NaiveDateTime;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Bar {
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// (high + low + close) / 3
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }

    /// max(high - low, |high - prev_close|, |low - prev_close|)
    pub fn true_range(&self, prev_close: f64) -> f64 {
        let hl = self.high - self.low;
        let hc = (self.high - prev_close).abs();
        let lc = (self.low - prev_close).abs();
        hl.max(hc).max(lc)
    }

    /// A bar is usable when its close is a finite positive price.
    pub fn is_usable(&self) -> bool {
        self.close.is_finite() && self.close > 0.0
    }
}

/// Sort bars by timestamp and drop duplicate timestamps.
///
/// For duplicated timestamps the row seen last in the input wins, matching
/// how a provider's later correction supersedes an earlier print.
pub fn normalize_bars(symbol: &str, mut bars: Vec<Bar>) -> Vec<Bar> {
    let before = bars.len();
    // stable sort keeps input order among equal timestamps
    bars.sort_by_key(|b| b.timestamp);

    let mut out: Vec<Bar> = Vec::with_capacity(bars.len());
    for bar in bars {
        match out.last_mut() {
            Some(last) if last.timestamp == bar.timestamp => *last = bar,
            _ => out.push(bar),
        }
    }

    if out.len() != before {
        warn!(
            symbol,
            dropped = before - out.len(),
            stage = "normalize",
            "dropped duplicate bars"
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn sample_bar() -> Bar {
        Bar {
            timestamp: ts(15),
            open: 100.0,
            high: 110.0,
            low: 90.0,
            close: 105.0,
            volume: 50_000.0,
        }
    }

    fn close_bar(day: u32, close: f64) -> Bar {
        Bar {
            timestamp: ts(day),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn typical_price() {
        let bar = sample_bar();
        let expected = (110.0 + 90.0 + 105.0) / 3.0;
        assert!((bar.typical_price() - expected).abs() < f64::EPSILON);
    }

    #[test]
    fn true_range_hl_dominates() {
        let bar = sample_bar();
        assert!((bar.true_range(100.0) - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn true_range_gap_up() {
        let bar = sample_bar();
        // |110-70| = 40
        assert!((bar.true_range(70.0) - 40.0).abs() < f64::EPSILON);
    }

    #[test]
    fn true_range_gap_down() {
        let bar = sample_bar();
        // |90-130| = 40
        assert!((bar.true_range(130.0) - 40.0).abs() < f64::EPSILON);
    }

    #[test]
    fn usable_rejects_bad_close() {
        assert!(close_bar(1, 10.0).is_usable());
        assert!(!close_bar(1, 0.0).is_usable());
        assert!(!close_bar(1, -1.0).is_usable());
        assert!(!close_bar(1, f64::NAN).is_usable());
    }

    #[test]
    fn normalize_sorts_out_of_order_input() {
        let bars = vec![close_bar(3, 3.0), close_bar(1, 1.0), close_bar(2, 2.0)];
        let out = normalize_bars("TEST", bars);
        let closes: Vec<f64> = out.iter().map(|b| b.close).collect();
        assert_eq!(closes, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn normalize_dedups_keeping_last() {
        let bars = vec![
            close_bar(1, 1.0),
            close_bar(2, 2.0),
            close_bar(2, 2.5),
            close_bar(3, 3.0),
        ];
        let out = normalize_bars("TEST", bars);
        assert_eq!(out.len(), 3);
        assert!((out[1].close - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn normalize_empty() {
        assert!(normalize_bars("TEST", vec![]).is_empty());
    }
}
