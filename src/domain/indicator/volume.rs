//! Volume ratio: current volume over its simple moving average.

use crate::domain::ohlcv::Bar;

/// `volume[last] / mean(volume[last-period+1..=last])`.
///
/// `None` when fewer than `period` bars are available, and 0 when the
/// average volume is zero.
pub fn volume_ratio(bars: &[Bar], period: usize) -> Option<f64> {
    if period == 0 || bars.len() < period {
        return None;
    }
    let window = &bars[bars.len() - period..];
    let avg = window.iter().map(|b| b.volume).sum::<f64>() / period as f64;
    let current = window.last()?.volume;
    if avg == 0.0 {
        Some(0.0)
    } else {
        Some(current / avg)
    }
}
