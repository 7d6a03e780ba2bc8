//! Stochastic oscillator.
//!
//! %K = 100 * (close - lowest_low) / (highest_high - lowest_low) over k bars,
//! 50 when the range is zero. %D = SMA(%K, d).

use crate::domain::indicator::sma::sma_values;
use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};
use crate::domain::ohlcv::Bar;

pub fn calculate_stochastic(bars: &[Bar], k_period: usize, d_period: usize) -> IndicatorSeries {
    let indicator_type = IndicatorType::Stochastic { k_period, d_period };
    let zero = IndicatorValue::Stochastic { k: 50.0, d: 50.0 };
    if k_period == 0 || d_period == 0 || bars.len() < k_period {
        return IndicatorSeries::undefined(indicator_type, bars, zero);
    }

    let k_start = k_period - 1;
    let k_line: Vec<f64> = (k_start..bars.len())
        .map(|i| {
            let window = &bars[i + 1 - k_period..=i];
            let hh = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
            let ll = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);
            let range = hh - ll;
            if range == 0.0 {
                50.0
            } else {
                100.0 * (bars[i].close - ll) / range
            }
        })
        .collect();
    let d_line = sma_values(&k_line, d_period);

    let values = bars
        .iter()
        .enumerate()
        .map(|(i, bar)| {
            let kd = i
                .checked_sub(k_start)
                .and_then(|j| d_line[j].map(|d| (k_line[j], d)));
            match kd {
                Some((k, d)) => IndicatorPoint {
                    timestamp: bar.timestamp,
                    valid: true,
                    value: IndicatorValue::Stochastic { k, d },
                },
                None => IndicatorPoint {
                    timestamp: bar.timestamp,
                    valid: false,
                    value: zero.clone(),
                },
            }
        })
        .collect();

    IndicatorSeries {
        indicator_type,
        values,
    }
}
