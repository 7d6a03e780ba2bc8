//! Small statistics helpers shared by the correlator and the analyzer.
//!
//! Standard deviations are population (divide by N), matching the
//! Bollinger and Sharpe calculations.

pub fn mean(xs: &[f64]) -> Option<f64> {
    if xs.is_empty() {
        None
    } else {
        Some(xs.iter().sum::<f64>() / xs.len() as f64)
    }
}

pub fn std_dev(xs: &[f64]) -> Option<f64> {
    let m = mean(xs)?;
    let var = xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / xs.len() as f64;
    Some(var.sqrt())
}

/// Pearson correlation of two equal-length samples.
///
/// `None` for mismatched or short inputs, when either side has zero
/// variance, or when any input is not finite.
pub fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    if xs.len() != ys.len() || xs.len() < 2 {
        return None;
    }
    if xs.iter().chain(ys).any(|v| !v.is_finite()) {
        return None;
    }
    let mx = mean(xs)?;
    let my = mean(ys)?;
    let mut cov = 0.0;
    let mut vx = 0.0;
    let mut vy = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        let dx = x - mx;
        let dy = y - my;
        cov += dx * dy;
        vx += dx * dx;
        vy += dy * dy;
    }
    if vx == 0.0 || vy == 0.0 {
        return None;
    }
    Some((cov / (vx.sqrt() * vy.sqrt())).clamp(-1.0, 1.0))
}

/// z-score of `value` against `history`. `None` when the history has no
/// spread.
pub fn z_score(value: f64, history: &[f64]) -> Option<f64> {
    let m = mean(history)?;
    let sd = std_dev(history)?;
    if sd == 0.0 || !sd.is_finite() {
        None
    } else {
        Some((value - m) / sd)
    }
}

/// Simple returns `p[i] / p[i-1] - 1`; the first element has no return.
pub fn pct_returns(prices: &[f64]) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(prices.len());
    for (i, &p) in prices.iter().enumerate() {
        if i == 0 || prices[i - 1] == 0.0 {
            out.push(None);
        } else {
            out.push(Some(p / prices[i - 1] - 1.0));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn pearson_perfect_positive_and_negative() {
        let xs = [1.0, 2.0, 3.0, 4.0];
        assert_relative_eq!(pearson(&xs, &[2.0, 4.0, 6.0, 8.0]).unwrap(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(pearson(&xs, &[8.0, 6.0, 4.0, 2.0]).unwrap(), -1.0, epsilon = 1e-12);
    }

    #[test]
    fn pearson_zero_variance_is_none() {
        assert!(pearson(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]).is_none());
    }

    #[test]
    fn pearson_rejects_nan_and_mismatch() {
        assert!(pearson(&[1.0, f64::NAN], &[1.0, 2.0]).is_none());
        assert!(pearson(&[1.0, 2.0], &[1.0]).is_none());
    }

    #[test]
    fn std_dev_population() {
        // mean 5, squared deviations sum 32, N = 8
        let xs = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_relative_eq!(std_dev(&xs).unwrap(), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn z_score_flat_history_is_none() {
        assert!(z_score(3.0, &[1.0, 1.0, 1.0]).is_none());
        let z = z_score(9.0, &[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert_relative_eq!(z, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn pct_returns_first_is_none() {
        let r = pct_returns(&[100.0, 110.0, 99.0]);
        assert!(r[0].is_none());
        assert_relative_eq!(r[1].unwrap(), 0.1, epsilon = 1e-12);
        assert_relative_eq!(r[2].unwrap(), -0.1, epsilon = 1e-12);
    }
}
