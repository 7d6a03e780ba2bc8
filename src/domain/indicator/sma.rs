//! Simple Moving Average over closes.

use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};
use crate::domain::ohlcv::Bar;

pub fn calculate_sma(bars: &[Bar], period: usize) -> IndicatorSeries {
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    IndicatorSeries {
        indicator_type: IndicatorType::Sma(period),
        values: bars
            .iter()
            .zip(sma_values(&closes, period))
            .map(|(bar, v)| IndicatorPoint {
                timestamp: bar.timestamp,
                valid: v.is_some(),
                value: IndicatorValue::Simple(v.unwrap_or(0.0)),
            })
            .collect(),
    }
}

/// Rolling mean with a running sum. `None` until `period` inputs are seen.
pub(crate) fn sma_values(input: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(input.len());
    if period == 0 {
        out.resize(input.len(), None);
        return out;
    }
    let mut sum = 0.0;
    for (i, &x) in input.iter().enumerate() {
        sum += x;
        if i >= period {
            sum -= input[i - period];
        }
        if i + 1 >= period {
            out.push(Some(sum / period as f64));
        } else {
            out.push(None);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::test_support::make_bars;

    #[test]
    fn sma_basic() {
        let bars = make_bars(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let series = calculate_sma(&bars, 3);
        assert!(!series.values[1].valid);
        assert!((series.simple_at(2).unwrap() - 2.0).abs() < f64::EPSILON);
        assert!((series.simple_at(4).unwrap() - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn sma_period_equals_len() {
        let bars = make_bars(&[2.0, 4.0]);
        let series = calculate_sma(&bars, 2);
        assert_eq!(series.latest_simple(), Some(3.0));
    }

    #[test]
    fn sma_period_0() {
        let bars = make_bars(&[1.0]);
        assert!(calculate_sma(&bars, 0).latest().is_none());
    }
}
