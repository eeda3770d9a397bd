// =============================================================================
// SignalGenerator — multi-indicator scoring pipeline (§4.1)
// =============================================================================

use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::bar::Bar;
use crate::indicators::{atr, macd, rsi};
use crate::types::Direction;

use super::analyzers::{liquidity, smart_money, smooth_trail, trend, Weights};
use super::{ConfluenceFlags, MarketRegime, Signal, SignalContext, SignalGeneratorError, SignalStatus};

/// Minimum closed bars required to run analysis (§4.1, P9).
pub const MIN_BARS: usize = 200;
const MIN_SCORE: f64 = 0.65;
const MIN_CONFLUENCE_FLAGS: u32 = 2;
const MIN_SR_DISTANCE: f64 = 0.01;
const MIN_RISK_REWARD: f64 = 1.0;
const GAP_ATR_MULTIPLE: f64 = 10.0;
const SR_LOOKBACK: usize = 20;
const VOLUME_SPIKE_MULTIPLE: f64 = 1.5;

pub struct SignalGenerator {
    /// Exchange tick size used to round persisted levels. A production
    /// deployment resolves this per-symbol via `ExchangeClient::exchange_info`;
    /// defaulted here since the generator is a pure function over bars.
    pub tick_size: f64,
}

impl Default for SignalGenerator {
    fn default() -> Self {
        Self { tick_size: 0.01 }
    }
}

impl SignalGenerator {
    /// Analyze `(symbol, timeframe)` bars and optionally a higher-timeframe
    /// slice used for the multi-timeframe agreement filter. Bars must be
    /// sorted ascending by `open_time`.
    #[instrument(skip(self, bars, htf_bars), fields(symbol, timeframe, bar_count = bars.len()))]
    pub fn analyze(
        &self,
        symbol: &str,
        timeframe: &str,
        bars: &[Bar],
        htf_bars: Option<&[Bar]>,
        now: DateTime<Utc>,
    ) -> Result<Option<Signal>, SignalGeneratorError> {
        if bars.len() < MIN_BARS {
            return Err(SignalGeneratorError::InsufficientData {
                required: MIN_BARS,
                have: bars.len(),
            });
        }
        if !bars.windows(2).all(|w| w[0].open_time < w[1].open_time) {
            return Err(SignalGeneratorError::MalformedBars("bars not sorted ascending".into()));
        }

        let timeframe_ms = timeframe_to_millis(timeframe)
            .ok_or_else(|| SignalGeneratorError::MalformedBars(format!("unknown timeframe {timeframe}")))?;
        let now_ms = now.timestamp_millis();
        if let Some(last) = bars.last() {
            if last.open_time > now_ms + 2 * timeframe_ms {
                return Err(SignalGeneratorError::MalformedBars("bar open_time is in the future".into()));
            }
        }

        if let Some(atr_val) = atr::calculate_atr(bars, 14) {
            for w in bars.windows(2) {
                let gap = (w[1].open - w[0].close).abs();
                if gap > atr_val * GAP_ATR_MULTIPLE {
                    return Err(SignalGeneratorError::DataAnomaly(format!(
                        "price gap {gap} exceeds {GAP_ATR_MULTIPLE}x ATR"
                    )));
                }
            }
        }

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();

        let (trend_long, trend_short) = trend::analyze(bars);
        let (smooth_long, smooth_short) = smooth_trail::analyze(bars);
        let (liq_long, liq_short) = liquidity::analyze(bars);
        let (sm_long, sm_short) = smart_money::analyze(bars);

        let score_long = Weights::TREND * trend_long
            + Weights::SMOOTH_TRAIL * smooth_long
            + Weights::LIQUIDITY * liq_long
            + Weights::SMART_MONEY * sm_long;
        let score_short = Weights::TREND * trend_short
            + Weights::SMOOTH_TRAIL * smooth_short
            + Weights::LIQUIDITY * liq_short
            + Weights::SMART_MONEY * sm_short;

        let direction = if score_long >= score_short { Direction::Long } else { Direction::Short };
        let score = score_long.max(score_short);

        debug!(score_long, score_short, ?direction, "analyzer scoring complete");

        // Filter 1: minimum score.
        if score < MIN_SCORE {
            return Ok(None);
        }

        let confluence = ConfluenceFlags {
            trend: matches_direction(trend_long, trend_short, direction),
            smooth_trail: matches_direction(smooth_long, smooth_short, direction),
            liquidity: matches_direction(liq_long, liq_short, direction),
            smart_money: matches_direction(sm_long, sm_short, direction),
            volume: is_volume_spike(bars),
        };

        // Filter 2: at least 2 confluence flags.
        if confluence.count() < MIN_CONFLUENCE_FLAGS {
            return Ok(None);
        }

        // Filter 3: multi-timeframe agreement.
        if let Some(htf) = htf_bars {
            if htf.len() >= MIN_BARS {
                let (htf_long, htf_short) = trend::analyze(htf);
                let contradicts = match direction {
                    Direction::Long => htf_short > htf_long + 0.1,
                    Direction::Short => htf_long > htf_short + 0.1,
                };
                if contradicts {
                    return Ok(None);
                }
            }
        }

        let (support, resistance) = support_resistance(bars);
        let last_close = closes[closes.len() - 1];

        // Filter 4: S/R distance — reject trades "glued" to the level.
        let sr_distance = match direction {
            Direction::Long => (last_close - support) / last_close,
            Direction::Short => (resistance - last_close) / last_close,
        };
        if sr_distance < MIN_SR_DISTANCE {
            return Ok(None);
        }

        // Filter 5: momentum — RSI band + MACD histogram agreement.
        let rsi_series = rsi::calculate_rsi(&closes, 14);
        let rsi_val = rsi_series.last().copied();
        let macd_result = macd::calculate(&closes);
        let momentum_ok = match (rsi_val, macd_result) {
            (Some(r), Some(m)) => {
                (30.0..=70.0).contains(&r)
                    && match direction {
                        Direction::Long => m.histogram > 0.0,
                        Direction::Short => m.histogram < 0.0,
                    }
            }
            _ => false,
        };
        if !momentum_ok {
            return Ok(None);
        }

        let atr_pct = atr::calculate_atr_pct(bars, 14).unwrap_or(2.5);
        let k_sl = (atr_pct / 100.0).clamp(0.02, 0.03);

        let entry = resolve_entry(last_close, support, resistance, direction, self.tick_size);
        let (stop_loss, tp1, tp2, tp3) = build_levels(entry, support, resistance, direction, k_sl, self.tick_size);

        // Filter 6: computed risk/reward.
        let risk_reward = match direction {
            Direction::Long => (tp1 - entry) / (entry - stop_loss),
            Direction::Short => (entry - tp1) / (stop_loss - entry),
        };
        if !risk_reward.is_finite() || risk_reward < MIN_RISK_REWARD {
            return Ok(None);
        }

        let regime = classify_regime(bars);
        let group_id = Uuid::new_v4();

        let signal = Signal {
            id: Uuid::new_v4(),
            group_id,
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            direction,
            score,
            entry,
            stop_loss,
            tp1,
            tp2,
            tp3,
            confluence,
            context: SignalContext {
                regime,
                risk_reward,
                indicators: serde_json::json!({
                    "rsi14": rsi_val,
                    "macd_histogram": macd_result.map(|m| m.histogram),
                    "atr_pct": atr_pct,
                    "support": support,
                    "resistance": resistance,
                }),
            },
            status: SignalStatus::Active,
            created_at: now,
        };

        if !signal.levels_valid() {
            warn!(symbol, "generated signal failed levels_valid invariant, dropping");
            return Ok(None);
        }

        Ok(Some(signal))
    }
}

fn matches_direction(long: f64, short: f64, direction: Direction) -> bool {
    match direction {
        Direction::Long => long > short && long > 0.0,
        Direction::Short => short > long && short > 0.0,
    }
}

fn is_volume_spike(bars: &[Bar]) -> bool {
    if bars.len() < 21 {
        return false;
    }
    let window = &bars[bars.len() - 21..bars.len() - 1];
    let mean_vol: f64 = window.iter().map(|b| b.volume).sum::<f64>() / window.len() as f64;
    if mean_vol <= 0.0 {
        return false;
    }
    bars.last().unwrap().volume > mean_vol * VOLUME_SPIKE_MULTIPLE
}

fn support_resistance(bars: &[Bar]) -> (f64, f64) {
    let window = &bars[bars.len() - SR_LOOKBACK.min(bars.len())..];
    let support = window.iter().fold(f64::MAX, |acc, b| acc.min(b.low));
    let resistance = window.iter().fold(f64::MIN, |acc, b| acc.max(b.high));
    (support, resistance)
}

fn resolve_entry(last_close: f64, support: f64, resistance: f64, direction: Direction, tick: f64) -> f64 {
    let level = match direction {
        Direction::Long => support,
        Direction::Short => resistance,
    };
    let entry = if last_close > 0.0 && (last_close - level).abs() / last_close <= 0.005 {
        level
    } else {
        last_close
    };
    round_to_tick(entry, tick)
}

fn build_levels(
    entry: f64,
    support: f64,
    resistance: f64,
    direction: Direction,
    k_sl: f64,
    tick: f64,
) -> (f64, f64, f64, f64) {
    match direction {
        Direction::Long => {
            let stop_loss = (entry * (1.0 - k_sl)).min(support * 0.995);
            (
                round_to_tick(stop_loss, tick),
                round_to_tick(entry * 1.05, tick),
                round_to_tick(entry * 1.10, tick),
                round_to_tick(entry * 1.15, tick),
            )
        }
        Direction::Short => {
            let stop_loss = (entry * (1.0 + k_sl)).max(resistance * 1.005);
            (
                round_to_tick(stop_loss, tick),
                round_to_tick(entry * 0.95, tick),
                round_to_tick(entry * 0.90, tick),
                round_to_tick(entry * 0.85, tick),
            )
        }
    }
}

fn round_to_tick(price: f64, tick: f64) -> f64 {
    if tick <= 0.0 {
        return price;
    }
    (price / tick).round() * tick
}

fn classify_regime(bars: &[Bar]) -> MarketRegime {
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let adx_val = crate::indicators::adx::calculate_adx(bars, 14).unwrap_or(0.0);
    let bbw = crate::indicators::bollinger::calculate_bollinger(&closes, 20, 2.0)
        .map(|r| r.width)
        .unwrap_or(0.0);

    if adx_val >= 25.0 {
        MarketRegime::Trending
    } else if bbw < 2.0 {
        MarketRegime::Squeeze
    } else if bbw > 8.0 {
        MarketRegime::Volatile
    } else if adx_val < 15.0 {
        MarketRegime::Ranging
    } else {
        MarketRegime::Dead
    }
}

fn timeframe_to_millis(timeframe: &str) -> Option<i64> {
    let (num_str, unit) = timeframe.split_at(timeframe.len().saturating_sub(1));
    let num: i64 = num_str.parse().ok()?;
    let unit_ms = match unit {
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        _ => return None,
    };
    Some(num * unit_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trending_bars(n: usize, start: f64, step: f64) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                let t = i as i64 * 3_600_000;
                let close = start + i as f64 * step;
                Bar::new(t, close - 0.2, close + 1.0, close - 1.0, close, 100.0 + i as f64, t + 3_599_999)
            })
            .collect()
    }

    #[test]
    fn insufficient_bars_returns_error() {
        let gen = SignalGenerator::default();
        let bars = trending_bars(100, 100.0, 0.5);
        let result = gen.analyze("BTCUSDT", "1h", &bars, None, Utc::now());
        assert!(matches!(result, Err(SignalGeneratorError::InsufficientData { .. })));
    }

    #[test]
    fn exactly_199_bars_is_insufficient() {
        let gen = SignalGenerator::default();
        let bars = trending_bars(199, 100.0, 0.5);
        let result = gen.analyze("BTCUSDT", "1h", &bars, None, Utc::now());
        assert!(matches!(result, Err(SignalGeneratorError::InsufficientData { .. })));
    }

    #[test]
    fn unsorted_bars_rejected() {
        let gen = SignalGenerator::default();
        let mut bars = trending_bars(210, 100.0, 0.5);
        bars.swap(0, 1);
        let result = gen.analyze("BTCUSDT", "1h", &bars, None, Utc::now());
        assert!(matches!(result, Err(SignalGeneratorError::MalformedBars(_))));
    }

    #[test]
    fn flat_identical_candles_produce_no_signal() {
        let gen = SignalGenerator::default();
        let bars = vec![Bar::new(0, 100.0, 100.0, 100.0, 100.0, 10.0, 3_599_999); 210];
        let result = gen.analyze("BTCUSDT", "1h", &bars, None, Utc::now());
        assert_eq!(result.unwrap(), None);
    }

    #[test]
    fn future_bar_rejected_as_malformed() {
        let gen = SignalGenerator::default();
        let mut bars = trending_bars(210, 100.0, 0.5);
        let far_future = Utc::now().timestamp_millis() + 1_000_000_000;
        bars.last_mut().unwrap().open_time = far_future;
        let result = gen.analyze("BTCUSDT", "1h", &bars, None, Utc::now());
        assert!(matches!(result, Err(SignalGeneratorError::MalformedBars(_))));
    }

    #[test]
    fn levels_valid_when_signal_emitted() {
        let gen = SignalGenerator::default();
        let bars = trending_bars(250, 100.0, 0.6);
        if let Ok(Some(signal)) = gen.analyze("BTCUSDT", "1h", &bars, None, Utc::now()) {
            assert!(signal.levels_valid());
            assert!(signal.score >= MIN_SCORE);
        }
    }

    #[test]
    fn timeframe_parsing() {
        assert_eq!(timeframe_to_millis("1h"), Some(3_600_000));
        assert_eq!(timeframe_to_millis("4h"), Some(14_400_000));
        assert_eq!(timeframe_to_millis("1d"), Some(86_400_000));
        assert_eq!(timeframe_to_millis("bogus"), None);
    }
}
