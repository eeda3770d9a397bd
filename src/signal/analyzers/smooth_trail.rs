// =============================================================================
// Smooth-Trail analyzer — nearest support/resistance proximity + bounce
// =============================================================================

use super::clamp01;
use crate::bar::Bar;

const LOOKBACK: usize = 20;
/// Proximity band: a level further than this fraction of price away
/// contributes nothing.
const PROXIMITY_BAND: f64 = 0.05;
const BOUNCE_BOOST: f64 = 0.25;

/// `(longScore, shortScore)` from proximity to a rolling local support/
/// resistance level, boosted when the latest bar reverses off that level.
pub fn analyze(bars: &[Bar]) -> (f64, f64) {
    if bars.len() < LOOKBACK + 1 {
        return (0.0, 0.0);
    }

    let window = &bars[bars.len() - LOOKBACK..];
    let support = window.iter().fold(f64::MAX, |acc, b| acc.min(b.low));
    let resistance = window.iter().fold(f64::MIN, |acc, b| acc.max(b.high));
    let last = bars.last().unwrap();

    if last.close <= 0.0 {
        return (0.0, 0.0);
    }

    let dist_support = (last.close - support) / last.close;
    let dist_resistance = (resistance - last.close) / last.close;

    let mut long = clamp01(1.0 - (dist_support.max(0.0) / PROXIMITY_BAND));
    let mut short = clamp01(1.0 - (dist_resistance.max(0.0) / PROXIMITY_BAND));

    // Bounce confirmation: the latest bar touched the level and reversed.
    if last.low <= support * 1.001 && last.close > last.open {
        long = clamp01(long + BOUNCE_BOOST);
    }
    if last.high >= resistance * 0.999 && last.close < last.open {
        short = clamp01(short + BOUNCE_BOOST);
    }

    (long, short)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar::new(0, open, high, low, close, 10.0, 0)
    }

    #[test]
    fn insufficient_data_returns_zero() {
        let bars = vec![candle(100.0, 101.0, 99.0, 100.0); 5];
        assert_eq!(analyze(&bars), (0.0, 0.0));
    }

    #[test]
    fn near_support_favors_long() {
        let mut bars: Vec<Bar> = (0..20).map(|_| candle(105.0, 106.0, 100.0, 103.0)).collect();
        // Reversal bar at the support level.
        bars.push(candle(100.1, 101.0, 100.0, 100.9));
        let (long, short) = analyze(&bars);
        assert!(long > short, "expected long favored near support, got {long} vs {short}");
    }

    #[test]
    fn near_resistance_favors_short() {
        let mut bars: Vec<Bar> = (0..20).map(|_| candle(100.0, 110.0, 99.0, 103.0)).collect();
        bars.push(candle(109.9, 110.0, 108.0, 109.0));
        let (long, short) = analyze(&bars);
        assert!(short > long, "expected short favored near resistance, got {long} vs {short}");
    }

    #[test]
    fn scores_bounded() {
        let bars: Vec<Bar> = (0..30)
            .map(|i| {
                let base = 100.0 + (i as f64 * 0.3).sin() * 5.0;
                candle(base, base + 1.0, base - 1.0, base)
            })
            .collect();
        let (long, short) = analyze(&bars);
        assert!((0.0..=1.0).contains(&long));
        assert!((0.0..=1.0).contains(&short));
    }
}
