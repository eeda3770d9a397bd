// =============================================================================
// Moving Average Convergence Divergence (MACD)
// =============================================================================
//
// MACD line   = EMA(closes, fast) - EMA(closes, slow)
// Signal line = EMA(MACD line, signal)
// Histogram   = MACD line - Signal line
//
// Default parameters: fast=12, slow=26, signal=9.
// =============================================================================

use super::ema::calculate_ema;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdResult {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// Compute the most recent MACD reading using the standard 12/26/9 parameters.
pub fn calculate(closes: &[f64]) -> Option<MacdResult> {
    calculate_macd(closes, 12, 26, 9)
}

/// Compute the most recent MACD reading for arbitrary fast/slow/signal periods.
///
/// Returns `None` when:
/// - `fast >= slow` (MACD is meaningless if the "fast" EMA isn't faster).
/// - There isn't enough data to produce `signal` MACD values (needed to seed
///   the signal-line EMA).
/// - Any intermediate EMA series is empty or non-finite.
pub fn calculate_macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> Option<MacdResult> {
    if fast == 0 || slow == 0 || signal == 0 || fast >= slow {
        return None;
    }

    let ema_fast = calculate_ema(closes, fast);
    let ema_slow = calculate_ema(closes, slow);
    if ema_fast.is_empty() || ema_slow.is_empty() {
        return None;
    }

    // Align the two series: ema_slow starts `slow - fast` closes later than
    // ema_fast, so drop the leading excess from the faster series.
    let offset = ema_fast.len().checked_sub(ema_slow.len())?;
    let macd_line: Vec<f64> = ema_fast[offset..]
        .iter()
        .zip(ema_slow.iter())
        .map(|(f, s)| f - s)
        .collect();

    if macd_line.len() < signal {
        return None;
    }

    let signal_line = calculate_ema(&macd_line, signal);
    let signal_val = *signal_line.last()?;
    let macd_val = *macd_line.last()?;

    if !macd_val.is_finite() || !signal_val.is_finite() {
        return None;
    }

    Some(MacdResult {
        macd: macd_val,
        signal: signal_val,
        histogram: macd_val - signal_val,
    })
}
