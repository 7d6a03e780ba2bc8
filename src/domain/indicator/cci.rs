//! CCI (Commodity Channel Index).
//!
//! CCI = (TP - SMA(TP)) / (0.015 * mean_deviation), where TP is the
//! typical price. Zero mean deviation yields 0.

use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};
use crate::domain::ohlcv::Bar;

const LAMBERT: f64 = 0.015;

pub fn calculate_cci(bars: &[Bar], period: usize) -> IndicatorSeries {
    let tp: Vec<f64> = bars.iter().map(Bar::typical_price).collect();

    let values = bars
        .iter()
        .enumerate()
        .map(|(i, bar)| {
            if period == 0 || i + 1 < period {
                return IndicatorPoint {
                    timestamp: bar.timestamp,
                    valid: false,
                    value: IndicatorValue::Simple(0.0),
                };
            }
            let window = &tp[i + 1 - period..=i];
            let mean = window.iter().sum::<f64>() / period as f64;
            let mean_dev = window.iter().map(|x| (x - mean).abs()).sum::<f64>() / period as f64;
            let cci = if mean_dev == 0.0 {
                0.0
            } else {
                (tp[i] - mean) / (LAMBERT * mean_dev)
            };
            IndicatorPoint {
                timestamp: bar.timestamp,
                valid: true,
                value: IndicatorValue::Simple(cci),
            }
        })
        .collect();

    IndicatorSeries {
        indicator_type: IndicatorType::Cci(period),
        values,
    }
}
