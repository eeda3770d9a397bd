// =============================================================================
// Signal — the output of one SignalGenerator analysis run
// =============================================================================

pub mod analyzers;
pub mod generator;
pub mod store;

pub use store::SignalStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::types::Direction;

/// Lifecycle of a persisted Signal (§3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalStatus {
    Active,
    Consumed,
    Expired,
    Superseded,
}

/// Per-analyzer agreement with the signal's dominant direction.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ConfluenceFlags {
    pub trend: bool,
    pub smooth_trail: bool,
    pub liquidity: bool,
    pub smart_money: bool,
    pub volume: bool,
}

impl ConfluenceFlags {
    pub fn count(&self) -> u32 {
        [self.trend, self.smooth_trail, self.liquidity, self.smart_money, self.volume]
            .iter()
            .filter(|b| **b)
            .count() as u32
    }
}

/// Coarse market regime label, derived from the same bar window used to
/// score the signal. Feeds `marketConditionFit` (§4.2.1) in the selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketRegime {
    Trending,
    Ranging,
    Volatile,
    Squeeze,
    Dead,
}

/// Opaque-to-consumers indicator snapshot taken at creation time, plus the
/// regime label used by `marketConditionFit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalContext {
    pub regime: MarketRegime,
    pub risk_reward: f64,
    pub indicators: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    /// Shared by every Order produced when this signal is executed (§4.4).
    pub group_id: Uuid,
    pub symbol: String,
    pub timeframe: String,
    pub direction: Direction,
    pub score: f64,
    pub entry: f64,
    pub stop_loss: f64,
    pub tp1: f64,
    pub tp2: f64,
    pub tp3: f64,
    pub confluence: ConfluenceFlags,
    pub context: SignalContext,
    pub status: SignalStatus,
    pub created_at: DateTime<Utc>,
}

impl Signal {
    /// Risk/reward computed from entry/stop/tp1, direction-aware (§4.1 filter 6).
    pub fn risk_reward(&self) -> f64 {
        match self.direction {
            Direction::Long => {
                let risk = self.entry - self.stop_loss;
                if risk <= 0.0 {
                    return 0.0;
                }
                (self.tp1 - self.entry) / risk
            }
            Direction::Short => {
                let risk = self.stop_loss - self.entry;
                if risk <= 0.0 {
                    return 0.0;
                }
                (self.entry - self.tp1) / risk
            }
        }
    }

    /// Validates (I3): levels monotone in the signal direction.
    pub fn levels_valid(&self) -> bool {
        match self.direction {
            Direction::Long => {
                self.stop_loss < self.entry
                    && self.entry <= self.tp1
                    && self.tp1 < self.tp2
                    && self.tp2 < self.tp3
            }
            Direction::Short => {
                self.stop_loss > self.entry
                    && self.entry >= self.tp1
                    && self.tp1 > self.tp2
                    && self.tp2 > self.tp3
            }
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }
}

/// Non-throwing failure modes of `SignalGenerator::analyze` (§4.1).
#[derive(Debug, Clone, thiserror::Error)]
pub enum SignalGeneratorError {
    #[error("insufficient bars: need >= {required}, have {have}")]
    InsufficientData { required: usize, have: usize },
    #[error("malformed bars: {0}")]
    MalformedBars(String),
    #[error("data anomaly: {0}")]
    DataAnomaly(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(direction: Direction, entry: f64, sl: f64, tp1: f64, tp2: f64, tp3: f64) -> Signal {
        Signal {
            id: Uuid::new_v4(),
            group_id: Uuid::new_v4(),
            symbol: "BTCUSDT".into(),
            timeframe: "1h".into(),
            direction,
            score: 0.8,
            entry,
            stop_loss: sl,
            tp1,
            tp2,
            tp3,
            confluence: ConfluenceFlags::default(),
            context: SignalContext {
                regime: MarketRegime::Trending,
                risk_reward: 1.5,
                indicators: Value::Null,
            },
            status: SignalStatus::Active,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn levels_valid_long() {
        let s = signal(Direction::Long, 100.0, 97.0, 105.0, 110.0, 115.0);
        assert!(s.levels_valid());
    }

    #[test]
    fn levels_valid_short() {
        let s = signal(Direction::Short, 100.0, 103.0, 95.0, 90.0, 85.0);
        assert!(s.levels_valid());
    }

    #[test]
    fn levels_invalid_when_stop_past_entry() {
        let s = signal(Direction::Long, 100.0, 101.0, 105.0, 110.0, 115.0);
        assert!(!s.levels_valid());
    }

    #[test]
    fn risk_reward_long() {
        let s = signal(Direction::Long, 100.0, 98.0, 105.0, 110.0, 115.0);
        assert!((s.risk_reward() - 2.5).abs() < 1e-10);
    }

    #[test]
    fn confluence_count() {
        let mut c = ConfluenceFlags::default();
        assert_eq!(c.count(), 0);
        c.trend = true;
        c.liquidity = true;
        assert_eq!(c.count(), 2);
    }
}
