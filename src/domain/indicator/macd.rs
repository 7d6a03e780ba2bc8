//! MACD (Moving Average Convergence Divergence).
//!
//! MACD Line = EMA(fast) - EMA(slow)
//! Signal Line = EMA(signal) of MACD Line
//! Histogram = MACD Line - Signal Line
//!
//! Warmup: slow - 1 + signal - 1 bars.

use crate::domain::indicator::ema::ema_values;
use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};
use crate::domain::ohlcv::Bar;

pub const DEFAULT_FAST: usize = 12;
pub const DEFAULT_SLOW: usize = 26;
pub const DEFAULT_SIGNAL: usize = 9;

const ZERO: IndicatorValue = IndicatorValue::Macd {
    line: 0.0,
    signal: 0.0,
    histogram: 0.0,
};

pub fn calculate_macd(
    bars: &[Bar],
    fast: usize,
    slow: usize,
    signal_period: usize,
) -> IndicatorSeries {
    let indicator_type = IndicatorType::Macd {
        fast,
        slow,
        signal: signal_period,
    };
    if fast == 0 || slow == 0 || signal_period == 0 || fast >= slow {
        return IndicatorSeries::undefined(indicator_type, bars, ZERO);
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let ema_fast = ema_values(&closes, fast);
    let ema_slow = ema_values(&closes, slow);

    // MACD line only exists once the slow EMA does.
    let macd_start = slow - 1;
    let macd_line: Vec<f64> = ema_fast
        .iter()
        .zip(&ema_slow)
        .skip(macd_start)
        .map(|(f, s)| f.unwrap_or(0.0) - s.unwrap_or(0.0))
        .collect();
    let signal_line = ema_values(&macd_line, signal_period);

    let mut values = Vec::with_capacity(bars.len());
    for (i, bar) in bars.iter().enumerate() {
        let point = match i.checked_sub(macd_start) {
            Some(j) => match signal_line[j] {
                Some(signal) => IndicatorPoint {
                    timestamp: bar.timestamp,
                    valid: true,
                    value: IndicatorValue::Macd {
                        line: macd_line[j],
                        signal,
                        histogram: macd_line[j] - signal,
                    },
                },
                None => IndicatorPoint {
                    timestamp: bar.timestamp,
                    valid: false,
                    value: ZERO,
                },
            },
            None => IndicatorPoint {
                timestamp: bar.timestamp,
                valid: false,
                value: ZERO,
            },
        };
        values.push(point);
    }

    IndicatorSeries {
        indicator_type,
        values,
    }
}

pub fn calculate_macd_default(bars: &[Bar]) -> IndicatorSeries {
    calculate_macd(bars, DEFAULT_FAST, DEFAULT_SLOW, DEFAULT_SIGNAL)
}
