// =============================================================================
// Trend analyzer — EMA stack alignment, ADX strength, MACD agreement
// =============================================================================

use super::clamp01;
use crate::bar::Bar;
use crate::indicators::{adx, ema, macd};

const EMA_PERIODS: [usize; 5] = [12, 20, 26, 50, 200];
const ADX_STRONG: f64 = 25.0;

/// `(longScore, shortScore)`. Requires at least 200 closed bars; callers
/// enforce that precondition before calling any analyzer.
pub fn analyze(bars: &[Bar]) -> (f64, f64) {
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();

    let stack: Vec<Option<f64>> = EMA_PERIODS
        .iter()
        .map(|&p| ema::calculate_ema(&closes, p).last().copied())
        .collect();

    let mut long = 0.0;
    let mut short = 0.0;

    if let Some(values) = stack.iter().cloned().collect::<Option<Vec<f64>>>() {
        // `values` is ordered [ema12, ema20, ema26, ema50, ema200].
        let bullish = values.windows(2).all(|w| w[0] > w[1]);
        let bearish = values.windows(2).all(|w| w[0] < w[1]);

        if bullish {
            long += 0.4;
        } else if bearish {
            short += 0.4;
        }

        if let Some(adx_val) = adx::calculate_adx(bars, 14) {
            if adx_val >= ADX_STRONG {
                if bullish {
                    long += 0.3;
                } else if bearish {
                    short += 0.3;
                }
            }
        }
    }

    if let Some(result) = macd::calculate(&closes) {
        if result.histogram > 0.0 {
            long += 0.3;
        } else if result.histogram < 0.0 {
            short += 0.3;
        }
    }

    (clamp01(long), clamp01(short))
}
