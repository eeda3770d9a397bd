// =============================================================================
// Stochastic Oscillator
// =============================================================================
//
// %K = 100 * (close - lowest_low(period_k)) / (highest_high(period_k) - lowest_low(period_k))
// %K (slow)  = SMA(%K raw, smooth_k)
// %D         = SMA(%K slow, period_d)
//
// Default parameters: (14, 3, 3) — a 14-bar lookback, 3-bar %K smoothing,
// 3-bar %D smoothing.
//
// Interpretation:
//   %K/%D > 80  => overbought
//   %K/%D < 20  => oversold
// =============================================================================

use crate::bar::Bar;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StochasticResult {
    pub k: f64,
    pub d: f64,
}

/// Compute the most recent Stochastic reading using the standard (14, 3, 3)
/// parameters.
pub fn calculate(candles: &[Bar]) -> Option<StochasticResult> {
    calculate_stochastic(candles, 14, 3, 3)
}

/// Compute the most recent Stochastic reading for arbitrary parameters.
///
/// Returns `None` when there isn't enough data to produce `smooth_k +
/// period_d - 1` raw %K values, or when a lookback window's high equals its
/// low (division-by-zero guard).
pub fn calculate_stochastic(
    candles: &[Bar],
    period_k: usize,
    smooth_k: usize,
    period_d: usize,
) -> Option<StochasticResult> {
    if period_k == 0 || smooth_k == 0 || period_d == 0 {
        return None;
    }
    if candles.len() < period_k {
        return None;
    }

    let raw_count = candles.len() - period_k + 1;
    let mut raw_k = Vec::with_capacity(raw_count);
    for end in period_k..=candles.len() {
        let window = &candles[end - period_k..end];
        let highest = window.iter().fold(f64::MIN, |acc, c| acc.max(c.high));
        let lowest = window.iter().fold(f64::MAX, |acc, c| acc.min(c.low));
        let range = highest - lowest;
        if range == 0.0 {
            raw_k.push(50.0); // no range to resolve direction against
        } else {
            let close = window.last().unwrap().close;
            raw_k.push(100.0 * (close - lowest) / range);
        }
    }

    if raw_k.len() < smooth_k {
        return None;
    }
    let slow_k = sma_series(&raw_k, smooth_k);

    if slow_k.len() < period_d {
        return None;
    }
    let d_series = sma_series(&slow_k, period_d);

    let k = *slow_k.last()?;
    let d = *d_series.last()?;
    if !k.is_finite() || !d.is_finite() {
        return None;
    }

    Some(StochasticResult { k, d })
}

fn sma_series(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }
    (0..=values.len() - period)
        .map(|start| values[start..start + period].iter().sum::<f64>() / period as f64)
        .collect()
}
