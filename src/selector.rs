// =============================================================================
// Best-Signal Selector — at most one signal per cycle from the fresh pool
// (§4.2, §4.2.1)
// =============================================================================

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

use crate::signal::{MarketRegime, Signal, SignalStatus, SignalStore};

const MIN_SCORE: f64 = 0.65;
const WIN_RATE_DEFAULT: f64 = 0.50;
const RISK_REWARD_NORMALIZE_CAP: f64 = 5.0;

pub struct SelectorConfig {
    pub cooldown: chrono::Duration,
    pub max_concurrent_positions: usize,
    pub max_daily_signals: usize,
    /// §6.7 `maxSignalAge` — also bounds how far back the pool query looks.
    pub max_signal_age: chrono::Duration,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            cooldown: chrono::Duration::minutes(5),
            max_concurrent_positions: 5,
            max_daily_signals: 20,
            max_signal_age: chrono::Duration::hours(24),
        }
    }
}

/// Supplies the win-rate/portfolio facts the selector needs but doesn't own
/// (§9.1: "recentWinRateFor... computed from the closed-Order ledger").
pub trait SelectorContext: Send + Sync {
    fn recent_win_rate(&self, symbol: &str) -> f64;

    fn open_position_symbols(&self) -> Vec<String>;

    fn open_positions_count(&self) -> usize;

    fn today_signals_executed(&self) -> usize;

    fn last_execution_at(&self) -> Option<DateTime<Utc>>;
}

pub struct BestSignalSelector {
    store: Arc<dyn SignalStore>,
    config: SelectorConfig,
}

impl BestSignalSelector {
    pub fn new(store: Arc<dyn SignalStore>, config: SelectorConfig) -> Self {
        Self { store, config }
    }

    /// `select(now) -> Signal?` (§4.2). Marks the winner `consumed`
    /// atomically; a signal that is ranked but not selected remains `active`.
    pub fn select(&self, now: DateTime<Utc>, ctx: &dyn SelectorContext) -> Option<Signal> {
        if ctx.open_positions_count() >= self.config.max_concurrent_positions {
            debug!("selector: portfolio full, skipping cycle");
            return None;
        }
        if ctx.today_signals_executed() >= self.config.max_daily_signals {
            debug!("selector: daily signal cap reached, skipping cycle");
            return None;
        }
        if let Some(last) = ctx.last_execution_at() {
            if now - last < self.config.cooldown {
                debug!("selector: cooldown gate active, skipping cycle");
                return None;
            }
        }

        let open_symbols = ctx.open_position_symbols();
        let pool: Vec<Signal> = self
            .store
            .list_active_signals(now - self.config.max_signal_age)
            .into_iter()
            .filter(|s| s.score >= MIN_SCORE && !open_symbols.contains(&s.symbol))
            .collect();

        if pool.is_empty() {
            return None;
        }

        let winner = pool
            .into_iter()
            .max_by(|a, b| {
                let qa = quality_score(a, ctx.recent_win_rate(&a.symbol));
                let qb = quality_score(b, ctx.recent_win_rate(&b.symbol));
                qa.partial_cmp(&qb)
                    .unwrap()
                    .then(a.score.partial_cmp(&b.score).unwrap())
                    .then(a.created_at.cmp(&b.created_at))
            })
            .expect("pool is non-empty");

        if !self.store.update_signal_status(winner.id, SignalStatus::Active, SignalStatus::Consumed) {
            // Lost a race to another scheduler tick; there is no second
            // winner to fall back to within the same cycle (P6).
            return None;
        }

        info!(signal_id = %winner.id, symbol = %winner.symbol, score = winner.score, "signal selected");
        Some(winner)
    }
}

fn quality_score(signal: &Signal, win_rate: f64) -> f64 {
    let rr_normalized = (signal.context.risk_reward / RISK_REWARD_NORMALIZE_CAP).min(1.0);
    0.40 * signal.score + 0.30 * win_rate + 0.20 * market_condition_fit(signal) + 0.10 * rr_normalized
}

/// (§4.2.1) Rewards a signal whose regime label agrees with its own
/// confluence profile; any other pairing is neutral.
fn market_condition_fit(signal: &Signal) -> f64 {
    match signal.context.regime {
        MarketRegime::Trending if signal.confluence.trend => 1.0,
        MarketRegime::Ranging if signal.confluence.smooth_trail => 1.0,
        _ => 0.5,
    }
}

pub fn win_rate_from_ledger(wins: u32, losses: u32) -> f64 {
    let total = wins + losses;
    if total < 5 {
        WIN_RATE_DEFAULT
    } else {
        wins as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{ConfluenceFlags, SignalContext};
    use crate::signal::store::InMemorySignalStore;
    use crate::types::Direction;
    use uuid::Uuid;

    struct FakeCtx {
        win_rate: f64,
        open_symbols: Vec<String>,
        open_count: usize,
        today_signals: usize,
        last_exec: Option<DateTime<Utc>>,
    }

    impl SelectorContext for FakeCtx {
        fn recent_win_rate(&self, _symbol: &str) -> f64 {
            self.win_rate
        }
        fn open_position_symbols(&self) -> Vec<String> {
            self.open_symbols.clone()
        }
        fn open_positions_count(&self) -> usize {
            self.open_count
        }
        fn today_signals_executed(&self) -> usize {
            self.today_signals
        }
        fn last_execution_at(&self) -> Option<DateTime<Utc>> {
            self.last_exec
        }
    }

    fn default_ctx() -> FakeCtx {
        FakeCtx { win_rate: 0.5, open_symbols: vec![], open_count: 0, today_signals: 0, last_exec: None }
    }

    fn signal(symbol: &str, score: f64) -> Signal {
        Signal {
            id: Uuid::new_v4(),
            group_id: Uuid::new_v4(),
            symbol: symbol.into(),
            timeframe: "1h".into(),
            direction: Direction::Long,
            score,
            entry: 100.0,
            stop_loss: 97.0,
            tp1: 105.0,
            tp2: 110.0,
            tp3: 115.0,
            confluence: ConfluenceFlags::default(),
            context: SignalContext { regime: MarketRegime::Trending, risk_reward: 2.0, indicators: serde_json::Value::Null },
            status: SignalStatus::Active,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn picks_highest_quality_signal() {
        let store = Arc::new(InMemorySignalStore::new());
        store.insert_signal(signal("BTCUSDT", 0.70));
        store.insert_signal(signal("ETHUSDT", 0.95));
        let selector = BestSignalSelector::new(store, SelectorConfig::default());

        let winner = selector.select(Utc::now(), &default_ctx()).unwrap();
        assert_eq!(winner.symbol, "ETHUSDT");
    }

    #[test]
    fn boundary_score_is_eligible() {
        let store = Arc::new(InMemorySignalStore::new());
        store.insert_signal(signal("BTCUSDT", 0.65));
        let selector = BestSignalSelector::new(store, SelectorConfig::default());
        assert!(selector.select(Utc::now(), &default_ctx()).is_some());
    }

    #[test]
    fn open_symbol_excluded_even_at_top_score() {
        let store = Arc::new(InMemorySignalStore::new());
        store.insert_signal(signal("BTCUSDT", 1.0));
        let selector = BestSignalSelector::new(store, SelectorConfig::default());
        let mut ctx = default_ctx();
        ctx.open_symbols = vec!["BTCUSDT".to_string()];
        assert!(selector.select(Utc::now(), &ctx).is_none());
    }

    #[test]
    fn portfolio_full_short_circuits() {
        let store = Arc::new(InMemorySignalStore::new());
        store.insert_signal(signal("BTCUSDT", 0.9));
        let selector = BestSignalSelector::new(store, SelectorConfig::default());
        let mut ctx = default_ctx();
        ctx.open_count = 5;
        assert!(selector.select(Utc::now(), &ctx).is_none());
    }

    #[test]
    fn cooldown_gate_blocks_selection() {
        let store = Arc::new(InMemorySignalStore::new());
        store.insert_signal(signal("BTCUSDT", 0.9));
        let selector = BestSignalSelector::new(store, SelectorConfig::default());
        let mut ctx = default_ctx();
        ctx.last_exec = Some(Utc::now() - chrono::Duration::minutes(1));
        assert!(selector.select(Utc::now(), &ctx).is_none());
    }

    #[test]
    fn selected_signal_becomes_consumed() {
        let store = Arc::new(InMemorySignalStore::new());
        let s = signal("BTCUSDT", 0.9);
        let id = s.id;
        store.insert_signal(s);
        let selector = BestSignalSelector::new(store.clone(), SelectorConfig::default());
        selector.select(Utc::now(), &default_ctx());
        assert_eq!(store.get(id).unwrap().status, SignalStatus::Consumed);
    }

    #[test]
    fn win_rate_defaults_below_five_samples() {
        assert_eq!(win_rate_from_ledger(3, 1), WIN_RATE_DEFAULT);
        assert_eq!(win_rate_from_ledger(8, 2), 0.8);
    }
}
