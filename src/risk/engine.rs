// =============================================================================
// Risk Manager — cycle-level gate + circuit breaker ledger (§4.3, §4.3.1)
// =============================================================================
//
// Circuit breakers (ledger, grounded on the teacher's RiskEngine):
//   1. Daily Loss        — trips when cumulative daily PnL loss exceeds a
//                          percentage of starting capital.
//   2. Consecutive Losses — trips after N consecutive losing trades.
//   3. Max Drawdown       — trips when intra-day drawdown from peak equity
//                          exceeds the threshold.
//   4. Trade Limit        — trips when daily trade count reaches the cap.
//
// The ledger resets on UTC date rollover. Separately, `validate_cycle`
// implements the six ordered per-cycle checks from §4.3 that gate an
// individual signal rather than the account as a whole.
// =============================================================================

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::decision::{Decision, RejectKind};
use crate::signal::Signal;
use crate::types::Direction;

/// Snapshot of a single circuit breaker for dashboard display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerInfo {
    pub name: String,
    pub current: f64,
    pub limit: f64,
    pub tripped: bool,
}

/// Full snapshot of the risk engine's internal state (§2.1 control surface).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskState {
    pub risk_mode: String,
    #[serde(default)]
    pub daily_pnl: f64,
    #[serde(default)]
    pub daily_pnl_pct: f64,
    #[serde(default)]
    pub remaining_daily_loss_pct: f64,
    #[serde(default)]
    pub consecutive_losses: u32,
    #[serde(default)]
    pub daily_trades_count: u32,
    #[serde(default)]
    pub daily_wins: u32,
    #[serde(default)]
    pub daily_losses: u32,
    #[serde(default)]
    pub max_drawdown_today: f64,
    #[serde(default)]
    pub peak_equity_today: f64,
    #[serde(default)]
    pub circuit_breakers: Vec<CircuitBreakerInfo>,
    #[serde(default)]
    pub current_date: String,
}

struct Inner {
    risk_mode: String,
    daily_pnl: f64,
    consecutive_losses: u32,
    daily_trades_count: u32,
    daily_wins: u32,
    daily_losses: u32,
    max_drawdown_today: f64,
    peak_equity_today: f64,
    current_date: String,
    killed: bool,
}

/// An open position relevant to the correlation check (§4.3).
#[derive(Debug, Clone, Copy)]
pub struct CorrelatedPosition {
    pub side: Direction,
    pub age: chrono::Duration,
    pub unrealized_pnl: f64,
}

/// Everything `validate_cycle` needs about the portfolio and the signal's
/// symbol, gathered by the scheduler before calling in (§4.3).
pub struct PortfolioSnapshot<'a> {
    pub open_position_count: usize,
    pub max_concurrent_positions: usize,
    pub daily_realized_loss_fraction: f64,
    pub max_daily_loss_global: f64,
    pub symbol_volatility_24h: f64,
    pub max_volatility: f64,
    pub symbol_volume_24h: f64,
    pub min_volume_24h: f64,
    /// Open positions sharing the signal's symbol, for the correlation rule.
    pub same_symbol_positions: &'a [CorrelatedPosition],
}

/// Configuration limits supplied at construction time, plus the mutable
/// daily ledger behind a lock.
pub struct RiskEngine {
    state: RwLock<Inner>,
    capital: f64,
    max_daily_loss_pct: f64,
    max_consecutive_losses: u32,
    max_drawdown_pct: f64,
    max_daily_trades: u32,
}

impl RiskEngine {
    pub fn new(
        capital: f64,
        max_daily_loss_pct: f64,
        max_consecutive_losses: u32,
        max_drawdown_pct: f64,
        max_daily_trades: u32,
    ) -> Self {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        info!(
            capital,
            max_daily_loss_pct, max_consecutive_losses, max_drawdown_pct, max_daily_trades, "RiskEngine initialised"
        );

        Self {
            state: RwLock::new(Inner {
                risk_mode: "Normal".to_string(),
                daily_pnl: 0.0,
                consecutive_losses: 0,
                daily_trades_count: 0,
                daily_wins: 0,
                daily_losses: 0,
                max_drawdown_today: 0.0,
                peak_equity_today: capital,
                current_date: today,
                killed: false,
            }),
            capital,
            max_daily_loss_pct,
            max_consecutive_losses,
            max_drawdown_pct,
            max_daily_trades,
        }
    }

    // -------------------------------------------------------------------
    // Cycle-level gate (§4.3)
    // -------------------------------------------------------------------

    /// Six ordered checks; first failure wins. Also honors the breaker
    /// ledger's kill switch and daily-loss trip as an immediate reject.
    pub fn validate_cycle(&self, signal: &Signal, portfolio: &PortfolioSnapshot) -> Decision {
        if !signal.levels_valid() {
            return Decision::reject(RejectKind::MalformedSignal, "signal levels violate monotonicity invariant");
        }

        let (can_trade, reason) = self.can_trade();
        if !can_trade {
            return Decision::reject(
                RejectKind::DailyLossTripped,
                reason.unwrap_or_else(|| "risk breaker tripped".to_string()),
            );
        }

        if portfolio.open_position_count >= portfolio.max_concurrent_positions {
            return Decision::reject(
                RejectKind::PortfolioFull,
                format!(
                    "{} open positions >= max {}",
                    portfolio.open_position_count, portfolio.max_concurrent_positions
                ),
            );
        }

        if portfolio.daily_realized_loss_fraction >= portfolio.max_daily_loss_global {
            return Decision::reject(
                RejectKind::DailyLossTripped,
                format!(
                    "daily realized loss {:.2}% >= limit {:.2}%",
                    portfolio.daily_realized_loss_fraction * 100.0,
                    portfolio.max_daily_loss_global * 100.0
                ),
            );
        }

        if portfolio.symbol_volatility_24h > portfolio.max_volatility {
            return Decision::reject(
                RejectKind::VolatilityTooHigh,
                format!(
                    "24h volatility {:.4} > limit {:.4}",
                    portfolio.symbol_volatility_24h, portfolio.max_volatility
                ),
            );
        }

        if signal.score < 0.90 {
            let blocked = portfolio.same_symbol_positions.iter().any(|p| {
                p.side == signal.direction && p.age < chrono::Duration::hours(4) && p.unrealized_pnl <= 0.0
            });
            if blocked {
                return Decision::reject(
                    RejectKind::CorrelationTooHigh,
                    "recent same-direction position on this symbol is underwater",
                );
            }
        } else {
            debug!(score = signal.score, "correlation check bypassed by quality override");
        }

        if portfolio.symbol_volume_24h < portfolio.min_volume_24h {
            return Decision::reject(
                RejectKind::IlliquidSymbol,
                format!(
                    "24h volume {:.2} < minimum {:.2}",
                    portfolio.symbol_volume_24h, portfolio.min_volume_24h
                ),
            );
        }

        Decision::Accept
    }

    // -------------------------------------------------------------------
    // Circuit breaker ledger (§4.3.1)
    // -------------------------------------------------------------------

    pub fn record_trade_result(&self, pnl: f64) {
        self.maybe_reset_daily();
        let mut s = self.state.write();

        s.daily_pnl += pnl;
        s.daily_trades_count += 1;

        if pnl >= 0.0 {
            s.daily_wins += 1;
            s.consecutive_losses = 0;
        } else {
            s.daily_losses += 1;
            s.consecutive_losses += 1;
        }

        let current_equity = self.capital + s.daily_pnl;
        if current_equity > s.peak_equity_today {
            s.peak_equity_today = current_equity;
        }
        let drawdown = if s.peak_equity_today > 0.0 {
            (s.peak_equity_today - current_equity) / s.peak_equity_today
        } else {
            0.0
        };
        if drawdown > s.max_drawdown_today {
            s.max_drawdown_today = drawdown;
        }

        s.risk_mode = self.compute_risk_mode(&s);

        debug!(
            pnl,
            daily_pnl = s.daily_pnl,
            consecutive_losses = s.consecutive_losses,
            daily_trades = s.daily_trades_count,
            drawdown = s.max_drawdown_today,
            risk_mode = %s.risk_mode,
            "trade result recorded"
        );
    }

    pub fn can_trade(&self) -> (bool, Option<String>) {
        self.maybe_reset_daily();
        let s = self.state.read();

        if s.killed {
            return (false, Some("kill switch activated".to_string()));
        }

        let daily_loss_pct = if self.capital > 0.0 { (-s.daily_pnl) / self.capital } else { 0.0 };
        if daily_loss_pct >= self.max_daily_loss_pct {
            let msg = format!(
                "Daily Loss breaker tripped: {:.2}% lost (limit {:.2}%)",
                daily_loss_pct * 100.0,
                self.max_daily_loss_pct * 100.0
            );
            warn!("{}", msg);
            return (false, Some(msg));
        }

        if s.consecutive_losses >= self.max_consecutive_losses {
            let msg = format!(
                "Consecutive Losses breaker tripped: {} consecutive losses (limit {})",
                s.consecutive_losses, self.max_consecutive_losses
            );
            warn!("{}", msg);
            return (false, Some(msg));
        }

        if s.max_drawdown_today >= self.max_drawdown_pct {
            let msg = format!(
                "Max Drawdown breaker tripped: {:.2}% drawdown (limit {:.2}%)",
                s.max_drawdown_today * 100.0,
                self.max_drawdown_pct * 100.0
            );
            warn!("{}", msg);
            return (false, Some(msg));
        }

        if s.daily_trades_count >= self.max_daily_trades {
            let msg = format!(
                "Trade Limit breaker tripped: {} trades today (limit {})",
                s.daily_trades_count, self.max_daily_trades
            );
            warn!("{}", msg);
            return (false, Some(msg));
        }

        (true, None)
    }

    pub fn get_state(&self) -> RiskState {
        self.maybe_reset_daily();
        let s = self.state.read();

        let daily_pnl_pct = if self.capital > 0.0 { (s.daily_pnl / self.capital) * 100.0 } else { 0.0 };
        let remaining_daily_loss_pct =
            (self.max_daily_loss_pct * 100.0) - ((-s.daily_pnl / self.capital.max(1.0)) * 100.0);

        let breakers = self.build_circuit_breaker_info(&s);

        RiskState {
            risk_mode: s.risk_mode.clone(),
            daily_pnl: s.daily_pnl,
            daily_pnl_pct,
            remaining_daily_loss_pct: remaining_daily_loss_pct.max(0.0),
            consecutive_losses: s.consecutive_losses,
            daily_trades_count: s.daily_trades_count,
            daily_wins: s.daily_wins,
            daily_losses: s.daily_losses,
            max_drawdown_today: s.max_drawdown_today,
            peak_equity_today: s.peak_equity_today,
            circuit_breakers: breakers,
            current_date: s.current_date.clone(),
        }
    }

    pub fn reset_daily(&self) {
        let mut s = self.state.write();
        let today = Utc::now().format("%Y-%m-%d").to_string();
        Self::do_reset(&mut s, &today, self.capital);
        info!(date = %today, "daily risk counters reset (manual)");
    }

    pub fn kill(&self) {
        let mut s = self.state.write();
        s.killed = true;
        s.risk_mode = "Killed".to_string();
        warn!("kill switch activated — all trading halted");
    }

    fn maybe_reset_daily(&self) {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        {
            let s = self.state.read();
            if s.current_date == today {
                return;
            }
        }
        let mut s = self.state.write();
        if s.current_date != today {
            info!(old_date = %s.current_date, new_date = %today, "date rolled — resetting daily risk counters");
            Self::do_reset(&mut s, &today, self.capital);
        }
    }

    fn do_reset(s: &mut Inner, date: &str, capital: f64) {
        s.daily_pnl = 0.0;
        s.consecutive_losses = 0;
        s.daily_trades_count = 0;
        s.daily_wins = 0;
        s.daily_losses = 0;
        s.max_drawdown_today = 0.0;
        s.peak_equity_today = capital;
        s.current_date = date.to_string();
        s.risk_mode = if s.killed { "Killed".to_string() } else { "Normal".to_string() };
    }

    fn compute_risk_mode(&self, s: &Inner) -> String {
        if s.killed {
            return "Killed".to_string();
        }

        let daily_loss_pct = if self.capital > 0.0 { (-s.daily_pnl) / self.capital } else { 0.0 };

        if daily_loss_pct >= self.max_daily_loss_pct
            || s.consecutive_losses >= self.max_consecutive_losses
            || s.max_drawdown_today >= self.max_drawdown_pct
            || s.daily_trades_count >= self.max_daily_trades
        {
            "BreakerTripped".to_string()
        } else if daily_loss_pct >= self.max_daily_loss_pct * 0.75
            || s.consecutive_losses as f64 >= self.max_consecutive_losses as f64 * 0.75
        {
            "Cautious".to_string()
        } else {
            "Normal".to_string()
        }
    }

    fn build_circuit_breaker_info(&self, s: &Inner) -> Vec<CircuitBreakerInfo> {
        let daily_loss_pct = if self.capital > 0.0 { ((-s.daily_pnl) / self.capital) * 100.0 } else { 0.0 };

        vec![
            CircuitBreakerInfo {
                name: "Daily Loss".to_string(),
                current: daily_loss_pct.max(0.0),
                limit: self.max_daily_loss_pct * 100.0,
                tripped: daily_loss_pct >= self.max_daily_loss_pct * 100.0,
            },
            CircuitBreakerInfo {
                name: "Consecutive Losses".to_string(),
                current: s.consecutive_losses as f64,
                limit: self.max_consecutive_losses as f64,
                tripped: s.consecutive_losses >= self.max_consecutive_losses,
            },
            CircuitBreakerInfo {
                name: "Max Drawdown".to_string(),
                current: s.max_drawdown_today * 100.0,
                limit: self.max_drawdown_pct * 100.0,
                tripped: s.max_drawdown_today >= self.max_drawdown_pct,
            },
            CircuitBreakerInfo {
                name: "Trade Limit".to_string(),
                current: s.daily_trades_count as f64,
                limit: self.max_daily_trades as f64,
                tripped: s.daily_trades_count >= self.max_daily_trades,
            },
        ]
    }
}

impl std::fmt::Debug for RiskEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RiskEngine")
            .field("capital", &self.capital)
            .field("max_daily_loss_pct", &self.max_daily_loss_pct)
            .field("max_consecutive_losses", &self.max_consecutive_losses)
            .field("max_drawdown_pct", &self.max_drawdown_pct)
            .field("max_daily_trades", &self.max_daily_trades)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{ConfluenceFlags, MarketRegime, SignalContext, SignalStatus};
    use uuid::Uuid;

    fn signal(score: f64) -> Signal {
        Signal {
            id: Uuid::new_v4(),
            group_id: Uuid::new_v4(),
            symbol: "BTCUSDT".into(),
            timeframe: "1h".into(),
            direction: Direction::Long,
            score,
            entry: 100.0,
            stop_loss: 97.0,
            tp1: 105.0,
            tp2: 110.0,
            tp3: 115.0,
            confluence: ConfluenceFlags::default(),
            context: SignalContext { regime: MarketRegime::Trending, risk_reward: 1.6, indicators: serde_json::Value::Null },
            status: SignalStatus::Active,
            created_at: Utc::now(),
        }
    }

    fn ok_portfolio(positions: &[CorrelatedPosition]) -> PortfolioSnapshot {
        PortfolioSnapshot {
            open_position_count: 0,
            max_concurrent_positions: 5,
            daily_realized_loss_fraction: 0.0,
            max_daily_loss_global: 0.05,
            symbol_volatility_24h: 0.05,
            max_volatility: 0.15,
            symbol_volume_24h: 1_000_000.0,
            min_volume_24h: 100_000.0,
            same_symbol_positions: positions,
        }
    }

    #[test]
    fn accepts_clean_signal() {
        let engine = RiskEngine::new(10_000.0, 0.05, 5, 0.1, 50);
        let decision = engine.validate_cycle(&signal(0.8), &ok_portfolio(&[]));
        assert!(decision.is_accept());
    }

    #[test]
    fn rejects_malformed_levels() {
        let engine = RiskEngine::new(10_000.0, 0.05, 5, 0.1, 50);
        let mut s = signal(0.8);
        s.stop_loss = 200.0; // violates I3 for a LONG
        let decision = engine.validate_cycle(&s, &ok_portfolio(&[]));
        assert!(matches!(decision, Decision::Reject { kind: RejectKind::MalformedSignal, .. }));
    }

    #[test]
    fn rejects_portfolio_full() {
        let engine = RiskEngine::new(10_000.0, 0.05, 5, 0.1, 50);
        let mut portfolio = ok_portfolio(&[]);
        portfolio.open_position_count = 5;
        let decision = engine.validate_cycle(&signal(0.8), &portfolio);
        assert!(matches!(decision, Decision::Reject { kind: RejectKind::PortfolioFull, .. }));
    }

    #[test]
    fn correlation_blocks_losing_same_direction_reentry() {
        let engine = RiskEngine::new(10_000.0, 0.05, 5, 0.1, 50);
        let positions = [CorrelatedPosition { side: Direction::Long, age: chrono::Duration::hours(1), unrealized_pnl: -5.0 }];
        let decision = engine.validate_cycle(&signal(0.7), &ok_portfolio(&positions));
        assert!(matches!(decision, Decision::Reject { kind: RejectKind::CorrelationTooHigh, .. }));
    }

    #[test]
    fn quality_override_bypasses_correlation() {
        let engine = RiskEngine::new(10_000.0, 0.05, 5, 0.1, 50);
        let positions = [CorrelatedPosition { side: Direction::Long, age: chrono::Duration::hours(1), unrealized_pnl: -5.0 }];
        let decision = engine.validate_cycle(&signal(0.95), &ok_portfolio(&positions));
        assert!(decision.is_accept());
    }

    #[test]
    fn kill_switch_blocks_trading() {
        let engine = RiskEngine::new(10_000.0, 0.05, 5, 0.1, 50);
        engine.kill();
        let (can_trade, _) = engine.can_trade();
        assert!(!can_trade);
    }

    #[test]
    fn consecutive_losses_trip_breaker() {
        let engine = RiskEngine::new(10_000.0, 0.05, 2, 0.5, 50);
        engine.record_trade_result(-10.0);
        engine.record_trade_result(-10.0);
        let (can_trade, reason) = engine.can_trade();
        assert!(!can_trade);
        assert!(reason.unwrap().contains("Consecutive"));
    }
}
