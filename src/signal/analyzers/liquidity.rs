// =============================================================================
// Liquidity analyzer — volume spike vs trailing mean, OBV alignment
// =============================================================================

use super::clamp01;
use crate::bar::Bar;
use crate::indicators::obv;

const LOOKBACK: usize = 20;
/// Volume at or above this multiple of the trailing mean is a full spike.
const SPIKE_FULL: f64 = 2.0;

/// `(longScore, shortScore)`. Returns `(0.0, 0.0)` when the lookback window
/// has zero price range — identical candles carry no liquidity signal
/// (§4.1 edge case).
pub fn analyze(bars: &[Bar]) -> (f64, f64) {
    if bars.len() < LOOKBACK + 1 {
        return (0.0, 0.0);
    }

    let window = &bars[bars.len() - LOOKBACK..];
    let highest = window.iter().fold(f64::MIN, |acc, b| acc.max(b.high));
    let lowest = window.iter().fold(f64::MAX, |acc, b| acc.min(b.low));
    if highest == lowest {
        return (0.0, 0.0);
    }

    let mean_vol: f64 = window.iter().map(|b| b.volume).sum::<f64>() / window.len() as f64;
    if mean_vol <= 0.0 {
        return (0.0, 0.0);
    }

    let last = bars.last().unwrap();
    let spike_ratio = last.volume / mean_vol;
    let spike_score = clamp01(spike_ratio / SPIKE_FULL);

    let rising = last.close > window.first().unwrap().close;
    let obv_confirms = obv::confirms_price_trend(bars, LOOKBACK);

    match obv_confirms {
        Some(true) if rising => (spike_score, 0.0),
        Some(true) => (0.0, spike_score),
        _ => (spike_score * 0.3, spike_score * 0.3),
    }
}
