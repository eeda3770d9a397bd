// =============================================================================
// Volume-Weighted Average Price (VWAP)
// =============================================================================
//
// VWAP = sum(typical_price_i * volume_i) / sum(volume_i)
//
// Computed over the full supplied window — callers are responsible for
// slicing the session (e.g. since the last daily rollover) they want VWAP
// anchored to.
// =============================================================================

use crate::bar::Bar;

/// Compute VWAP over the full slice of bars.
///
/// Returns `None` when `candles` is empty or total volume is zero.
pub fn calculate(candles: &[Bar]) -> Option<f64> {
    if candles.is_empty() {
        return None;
    }

    let mut pv_sum = 0.0;
    let mut vol_sum = 0.0;
    for c in candles {
        pv_sum += c.typical_price() * c.volume;
        vol_sum += c.volume;
    }

    if vol_sum == 0.0 || !pv_sum.is_finite() {
        return None;
    }

    let vwap = pv_sum / vol_sum;
    if vwap.is_finite() {
        Some(vwap)
    } else {
        None
    }
}

/// Percentage distance of the last close from VWAP: positive means price is
/// trading above VWAP.
pub fn deviation_pct(candles: &[Bar]) -> Option<f64> {
    let vwap = calculate(candles)?;
    let last_close = candles.last()?.close;
    if vwap == 0.0 {
        return None;
    }
    Some(((last_close - vwap) / vwap) * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(high: f64, low: f64, close: f64, volume: f64) -> Bar {
        Bar::new(0, close, high, low, close, volume, 0)
    }

    #[test]
    fn vwap_empty_input() {
        assert!(calculate(&[]).is_none());
    }

    #[test]
    fn vwap_zero_volume_returns_none() {
        let candles = vec![candle(101.0, 99.0, 100.0, 0.0); 5];
        assert!(calculate(&candles).is_none());
    }

    #[test]
    fn vwap_single_bar_equals_typical_price() {
        let candles = vec![candle(102.0, 98.0, 100.0, 10.0)];
        let expected = (102.0 + 98.0 + 100.0) / 3.0;
        assert!((calculate(&candles).unwrap() - expected).abs() < 1e-10);
    }

    #[test]
    fn vwap_weights_by_volume() {
        let candles = vec![
            candle(100.0, 100.0, 100.0, 1.0),
            candle(200.0, 200.0, 200.0, 99.0),
        ];
        let vwap = calculate(&candles).unwrap();
        assert!(vwap > 199.0, "expected VWAP dominated by high-volume bar, got {vwap}");
    }

    #[test]
    fn vwap_deviation_pct_sign() {
        let candles = vec![
            candle(100.0, 100.0, 100.0, 10.0),
            candle(110.0, 110.0, 110.0, 10.0),
        ];
        let dev = deviation_pct(&candles).unwrap();
        assert!(dev > 0.0, "last close above VWAP should be positive, got {dev}");
    }
}
