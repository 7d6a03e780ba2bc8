//! ADX (Average Directional Index) with Wilder smoothing.
//!
//! +DM = high[i]-high[i-1] when it exceeds low[i-1]-low[i] and is positive,
//! -DM symmetrically. TR, +DM and -DM are Wilder-smoothed over n, giving
//! +DI/-DI = 100 * sDM / sTR and DX = 100 * |+DI - -DI| / (+DI + -DI).
//! ADX seeds with the mean of the first n DX values and is Wilder-smoothed
//! after that. First valid point is index 2n-1.

use crate::domain::indicator::atr::true_ranges;
use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};
use crate::domain::ohlcv::Bar;

const ZERO: IndicatorValue = IndicatorValue::Adx {
    adx: 0.0,
    plus_di: 0.0,
    minus_di: 0.0,
};

fn ratio(num: f64, den: f64) -> f64 {
    if den == 0.0 { 0.0 } else { 100.0 * num / den }
}

pub fn calculate_adx(bars: &[Bar], period: usize) -> IndicatorSeries {
    if period == 0 || bars.len() < 2 * period {
        return IndicatorSeries::undefined(IndicatorType::Adx(period), bars, ZERO);
    }

    let tr = true_ranges(bars);
    let n = period as f64;

    let mut values: Vec<IndicatorPoint> = Vec::with_capacity(bars.len());
    let (mut s_tr, mut s_plus, mut s_minus) = (0.0, 0.0, 0.0);
    let mut dx_sum = 0.0;
    let mut adx = 0.0;

    for (i, bar) in bars.iter().enumerate() {
        if i == 0 {
            values.push(IndicatorPoint {
                timestamp: bar.timestamp,
                valid: false,
                value: ZERO,
            });
            continue;
        }

        let up = bar.high - bars[i - 1].high;
        let down = bars[i - 1].low - bar.low;
        let plus_dm = if up > down && up > 0.0 { up } else { 0.0 };
        let minus_dm = if down > up && down > 0.0 { down } else { 0.0 };

        if i <= period {
            s_tr += tr[i];
            s_plus += plus_dm;
            s_minus += minus_dm;
        } else {
            s_tr = s_tr - s_tr / n + tr[i];
            s_plus = s_plus - s_plus / n + plus_dm;
            s_minus = s_minus - s_minus / n + minus_dm;
        }

        if i < period {
            values.push(IndicatorPoint {
                timestamp: bar.timestamp,
                valid: false,
                value: ZERO,
            });
            continue;
        }

        let plus_di = ratio(s_plus, s_tr);
        let minus_di = ratio(s_minus, s_tr);
        let dx = ratio((plus_di - minus_di).abs(), plus_di + minus_di);

        // DX values start at index `period`; ADX needs n of them.
        let dx_count = i - period + 1;
        let valid = if dx_count < period {
            dx_sum += dx;
            false
        } else if dx_count == period {
            adx = (dx_sum + dx) / n;
            true
        } else {
            adx = (adx * (n - 1.0) + dx) / n;
            true
        };

        values.push(IndicatorPoint {
            timestamp: bar.timestamp,
            valid,
            value: if valid {
                IndicatorValue::Adx {
                    adx,
                    plus_di,
                    minus_di,
                }
            } else {
                ZERO
            },
        });
    }

    IndicatorSeries {
        indicator_type: IndicatorType::Adx(period),
        values,
    }
}
