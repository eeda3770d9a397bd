// =============================================================================
// Smart-Money analyzer — VWAP position, volume delta, order-block retest
// =============================================================================

use super::clamp01;
use crate::bar::Bar;
use crate::indicators::{obv, vwap};

const LOOKBACK: usize = 20;
/// An order-block candidate must carry at least this multiple of the
/// window's mean volume to qualify as a high-volume reversal bar.
const ORDER_BLOCK_VOLUME_MULTIPLE: f64 = 2.0;

/// `(longScore, shortScore)` from VWAP position, OBV-derived volume delta,
/// and a simple order-block retest heuristic.
pub fn analyze(bars: &[Bar]) -> (f64, f64) {
    if bars.len() < LOOKBACK + 1 {
        return (0.0, 0.0);
    }

    let mut long = 0.0;
    let mut short = 0.0;

    if let Some(vwap_val) = vwap::calculate(bars) {
        let last_close = bars.last().unwrap().close;
        if last_close > vwap_val {
            long += 0.4;
        } else if last_close < vwap_val {
            short += 0.4;
        }
    }

    let obv_series = obv::calculate_series(bars);
    if obv_series.len() >= 2 {
        let delta = obv_series[obv_series.len() - 1] - obv_series[obv_series.len() - 2];
        if delta > 0.0 {
            long += 0.3;
        } else if delta < 0.0 {
            short += 0.3;
        }
    }

    if let Some(bullish_retest) = order_block_retest(bars) {
        if bullish_retest {
            long += 0.3;
        } else {
            short += 0.3;
        }
    }

    (clamp01(long), clamp01(short))
}

/// Finds the most recent high-volume reversal bar in the lookback window and
/// checks whether the current price is retesting its body range.
///
/// Returns `Some(true)` for a bullish block (reversal up, price retesting
/// from above), `Some(false)` for bearish, `None` if no qualifying block
/// exists or price isn't retesting one.
fn order_block_retest(bars: &[Bar]) -> Option<bool> {
    let window = &bars[bars.len() - LOOKBACK..bars.len() - 1];
    let mean_vol: f64 = window.iter().map(|b| b.volume).sum::<f64>() / window.len() as f64;
    if mean_vol <= 0.0 {
        return None;
    }

    let last_close = bars.last()?.close;

    // Search most-recent-first so the nearest qualifying block wins.
    for b in window.iter().rev() {
        if b.volume < mean_vol * ORDER_BLOCK_VOLUME_MULTIPLE {
            continue;
        }
        let body_low = b.open.min(b.close);
        let body_high = b.open.max(b.close);
        if last_close < body_low || last_close > body_high {
            continue;
        }
        return Some(b.close > b.open);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open: f64, high: f64, low: f64, close: f64, volume: f64) -> Bar {
        Bar::new(0, open, high, low, close, volume, 0)
    }

    #[test]
    fn insufficient_data_returns_zero() {
        let bars = vec![candle(100.0, 101.0, 99.0, 100.0, 10.0); 5];
        assert_eq!(analyze(&bars), (0.0, 0.0));
    }

    #[test]
    fn price_above_vwap_favors_long() {
        let mut bars: Vec<Bar> = (0..20).map(|_| candle(100.0, 101.0, 99.0, 100.0, 10.0)).collect();
        bars.push(candle(100.0, 115.0, 100.0, 114.0, 10.0));
        let (long, short) = analyze(&bars);
        assert!(long > short, "expected long favored above VWAP, got {long} vs {short}");
    }

    #[test]
    fn scores_bounded() {
        let bars: Vec<Bar> = (0..30)
            .map(|i| {
                let base = 100.0 + (i as f64 * 0.3).sin() * 5.0;
                candle(base, base + 1.0, base - 1.0, base, 10.0 + i as f64)
            })
            .collect();
        let (long, short) = analyze(&bars);
        assert!((0.0..=1.0).contains(&long));
        assert!((0.0..=1.0).contains(&short));
    }
}
