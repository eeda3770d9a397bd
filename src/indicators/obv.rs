// =============================================================================
// On-Balance Volume (OBV)
// =============================================================================
//
// OBV is a running total of volume that adds volume on up-closes and
// subtracts it on down-closes:
//   OBV_0 = 0
//   OBV_t = OBV_{t-1} + volume_t   if close_t > close_{t-1}
//         = OBV_{t-1} - volume_t   if close_t < close_{t-1}
//         = OBV_{t-1}              if close_t == close_{t-1}
//
// OBV is a cumulative line, not a bounded oscillator — callers care about its
// slope and divergence against price, not its absolute level.
// =============================================================================

use crate::bar::Bar;

/// Compute the full OBV series for a slice of bars, one value per bar.
///
/// Returns an empty `Vec` when `candles` is empty.
pub fn calculate_series(candles: &[Bar]) -> Vec<f64> {
    if candles.is_empty() {
        return Vec::new();
    }

    let mut result = Vec::with_capacity(candles.len());
    let mut obv = 0.0;
    result.push(obv);

    for i in 1..candles.len() {
        let close = candles[i].close;
        let prev_close = candles[i - 1].close;
        if close > prev_close {
            obv += candles[i].volume;
        } else if close < prev_close {
            obv -= candles[i].volume;
        }
        result.push(obv);
    }

    result
}

/// Return the most recent OBV value.
pub fn calculate(candles: &[Bar]) -> Option<f64> {
    calculate_series(candles).last().copied()
}

/// Check whether OBV is trending in the same direction as price over the
/// trailing `lookback` bars, used to detect bullish/bearish divergence.
///
/// Returns `Some(true)` when price and OBV moved the same direction,
/// `Some(false)` when they diverged, `None` when there isn't enough data.
pub fn confirms_price_trend(candles: &[Bar], lookback: usize) -> Option<bool> {
    if lookback == 0 || candles.len() < lookback + 1 {
        return None;
    }
    let obv = calculate_series(candles);
    let start = candles.len() - lookback - 1;

    let price_delta = candles.last()?.close - candles[start].close;
    let obv_delta = obv.last()? - obv[start];

    Some(price_delta.signum() == obv_delta.signum())
}
