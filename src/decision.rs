// =============================================================================
// Decision — typed go/no-go verdict from the Risk Manager (§4.3, §7.1)
// =============================================================================

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Cycle-level reject taxonomy (§4.3 table, ordered; first failure wins).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum RejectKind {
    #[error("signal levels violate the monotonicity invariant")]
    MalformedSignal,
    #[error("portfolio already at max concurrent positions")]
    PortfolioFull,
    #[error("daily realized loss breaker tripped")]
    DailyLossTripped,
    #[error("24h realized volatility exceeds policy limit")]
    VolatilityTooHigh,
    #[error("correlated open position blocks re-entry")]
    CorrelationTooHigh,
    #[error("symbol 24h volume below minimum liquidity")]
    IlliquidSymbol,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Decision {
    Accept,
    Reject { kind: RejectKind, reason: String },
}

impl Decision {
    pub fn reject(kind: RejectKind, reason: impl Into<String>) -> Self {
        Self::Reject { kind, reason: reason.into() }
    }

    pub fn is_accept(&self) -> bool {
        matches!(self, Self::Accept)
    }
}

/// One row of the cycle-level decision audit trail (§6.8 `GET
/// /api/v1/decisions`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub signal_id: Uuid,
    pub symbol: String,
    pub decision: Decision,
    pub at: DateTime<Utc>,
}

const MAX_DECISION_RECORDS: usize = 100;

/// Ring-buffer audit log of recent risk-manager verdicts, capped at
/// [`MAX_DECISION_RECORDS`].
#[derive(Default)]
pub struct DecisionLog {
    records: RwLock<Vec<DecisionRecord>>,
}

impl DecisionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, record: DecisionRecord) {
        let mut records = self.records.write();
        records.push(record);
        while records.len() > MAX_DECISION_RECORDS {
            records.remove(0);
        }
    }

    pub fn recent(&self) -> Vec<DecisionRecord> {
        self.records.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_caps_at_max_records() {
        let log = DecisionLog::new();
        for _ in 0..(MAX_DECISION_RECORDS + 10) {
            log.push(DecisionRecord {
                signal_id: Uuid::new_v4(),
                symbol: "BTCUSDT".into(),
                decision: Decision::Accept,
                at: Utc::now(),
            });
        }
        assert_eq!(log.recent().len(), MAX_DECISION_RECORDS);
    }

    #[test]
    fn recent_preserves_insertion_order() {
        let log = DecisionLog::new();
        log.push(DecisionRecord {
            signal_id: Uuid::new_v4(),
            symbol: "BTCUSDT".into(),
            decision: Decision::Accept,
            at: Utc::now(),
        });
        log.push(DecisionRecord {
            signal_id: Uuid::new_v4(),
            symbol: "ETHUSDT".into(),
            decision: Decision::reject(RejectKind::PortfolioFull, "full"),
            at: Utc::now(),
        });
        let recent = log.recent();
        assert_eq!(recent[0].symbol, "BTCUSDT");
        assert_eq!(recent[1].symbol, "ETHUSDT");
    }
}
