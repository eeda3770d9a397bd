// =============================================================================
// Scheduler — drives SignalGenerator → Selector → RiskManager → Executor
// (§5 concurrency model)
// =============================================================================
//
// A cycle that overruns its deadline is logged and the next tick is skipped,
// never stacked: `MissedTickBehavior::Skip` plus a `tokio::time::timeout`
// around the cycle body together enforce this.
// =============================================================================

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::bar::BarStore;
use crate::decision::DecisionLog;
use crate::executor::MultiAccountExecutor;
use crate::notifier::Notifier;
use crate::position::PositionStore;
use crate::risk::engine::{CorrelatedPosition, PortfolioSnapshot, RiskEngine};
use crate::selector::{BestSignalSelector, SelectorContext};
use crate::signal::generator::SignalGenerator;
use crate::signal::store::SignalStore;
use crate::types::TradingMode;

/// Bounds the risk/selector facts a scheduler gathers from the rest of the
/// system each cycle, per symbol.
pub trait MarketFacts: Send + Sync {
    fn volatility_24h(&self, symbol: &str) -> f64;
    fn volume_24h(&self, symbol: &str) -> f64;
    fn daily_realized_loss_fraction(&self) -> f64;
}

pub struct SchedulerConfig {
    pub symbols: Vec<String>,
    pub timeframe: String,
    pub cycle_interval: Duration,
    pub cycle_deadline: Duration,
    pub max_concurrent_positions: usize,
    pub max_daily_loss_global: f64,
    pub max_volatility: f64,
    pub min_volume_24h: f64,
    /// §6.7 `maxSignalAge` — governs the per-cycle expiry sweep.
    pub max_signal_age: chrono::Duration,
}

pub struct Scheduler {
    config: SchedulerConfig,
    bar_store: Arc<dyn BarStore>,
    generator: SignalGenerator,
    signal_store: Arc<dyn SignalStore>,
    selector: BestSignalSelector,
    selector_ctx: Arc<dyn SelectorContext>,
    risk: Arc<RiskEngine>,
    position_store: Arc<dyn PositionStore>,
    executor: Arc<MultiAccountExecutor>,
    executor_ctx: Arc<dyn crate::executor::ExecutorContext>,
    market_facts: Arc<dyn MarketFacts>,
    notifier: Arc<dyn Notifier>,
    trading_mode: Arc<RwLock<TradingMode>>,
    decision_log: Arc<DecisionLog>,
    /// Shared with the `SelectorContext` implementation so the selector's
    /// daily-cap gate sees the same count the scheduler increments.
    today_signals_executed: Arc<AtomicUsize>,
    /// Shared with the `SelectorContext` implementation so the cooldown gate
    /// sees the moment of the last fan-out, not a position-monitor lag.
    last_execution_at: Arc<RwLock<Option<DateTime<Utc>>>>,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: SchedulerConfig,
        bar_store: Arc<dyn BarStore>,
        generator: SignalGenerator,
        signal_store: Arc<dyn SignalStore>,
        selector: BestSignalSelector,
        selector_ctx: Arc<dyn SelectorContext>,
        risk: Arc<RiskEngine>,
        position_store: Arc<dyn PositionStore>,
        executor: Arc<MultiAccountExecutor>,
        executor_ctx: Arc<dyn crate::executor::ExecutorContext>,
        market_facts: Arc<dyn MarketFacts>,
        notifier: Arc<dyn Notifier>,
        trading_mode: Arc<RwLock<TradingMode>>,
        decision_log: Arc<DecisionLog>,
        // Shared counter also held by the `SelectorContext` implementation.
        today_signals_executed: Arc<AtomicUsize>,
        // Shared cell also held by the `SelectorContext` implementation.
        last_execution_at: Arc<RwLock<Option<DateTime<Utc>>>>,
    ) -> Self {
        Self {
            config,
            bar_store,
            generator,
            signal_store,
            selector,
            selector_ctx,
            risk,
            position_store,
            executor,
            executor_ctx,
            market_facts,
            notifier,
            trading_mode,
            decision_log,
            today_signals_executed,
            last_execution_at,
        }
    }

    /// Spawns the cycle loop on the current tokio runtime. Returns a handle
    /// the caller can abort on shutdown.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.cycle_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                match tokio::time::timeout(self.config.cycle_deadline, self.run_cycle()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => warn!(error = %err, "cycle completed with error"),
                    Err(_) => error!("cycle exceeded deadline — skipped, not stacked"),
                }
            }
        })
    }

    async fn run_cycle(&self) -> anyhow::Result<()> {
        let mode = *self.trading_mode.read();
        if mode != TradingMode::Live {
            return Ok(());
        }

        let now = Utc::now();
        let expired = self.signal_store.expire_stale(now - self.config.max_signal_age);
        if expired > 0 {
            debug!(expired, "expiry sweep retired stale active signals");
        }

        for symbol in &self.config.symbols {
            if let Err(err) = self.run_symbol(symbol).await {
                warn!(symbol, error = %err, "signal generation failed for symbol");
            }
        }

        if let Some(signal) = self.selector.select(now, self.selector_ctx.as_ref()) {
            self.validate_and_execute(signal).await;
        }

        Ok(())
    }

    async fn run_symbol(&self, symbol: &str) -> anyhow::Result<()> {
        let bars = self.bar_store.read_bars(symbol, &self.config.timeframe, crate::signal::generator::MIN_BARS * 2);
        match self.generator.analyze(symbol, &self.config.timeframe, &bars, None, Utc::now()) {
            Ok(Some(signal)) => {
                info!(symbol, score = signal.score, direction = ?signal.direction, "signal generated");
                // A newer signal on the same symbol retires any prior active
                // one rather than letting both compete in the pool (§3.1).
                self.signal_store.supersede_active(symbol);
                self.signal_store.insert_signal(signal);
            }
            Ok(None) => {}
            Err(err) => warn!(symbol, error = %err, "generator rejected bar window"),
        }
        Ok(())
    }

    async fn validate_and_execute(&self, signal: crate::signal::Signal) {
        let open_positions = self.position_store.list_all();
        let same_symbol: Vec<CorrelatedPosition> = open_positions
            .iter()
            .filter(|p| p.is_open && p.symbol == signal.symbol)
            .map(|p| CorrelatedPosition {
                side: p.side,
                age: Utc::now() - p.opened_at,
                unrealized_pnl: p.unrealized_pnl,
            })
            .collect();

        let portfolio = PortfolioSnapshot {
            open_position_count: open_positions.iter().filter(|p| p.is_open).count(),
            max_concurrent_positions: self.config.max_concurrent_positions,
            daily_realized_loss_fraction: self.market_facts.daily_realized_loss_fraction(),
            max_daily_loss_global: self.config.max_daily_loss_global,
            symbol_volatility_24h: self.market_facts.volatility_24h(&signal.symbol),
            max_volatility: self.config.max_volatility,
            symbol_volume_24h: self.market_facts.volume_24h(&signal.symbol),
            min_volume_24h: self.config.min_volume_24h,
            same_symbol_positions: &same_symbol,
        };

        let decision = self.risk.validate_cycle(&signal, &portfolio);
        self.decision_log.push(crate::decision::DecisionRecord {
            signal_id: signal.id,
            symbol: signal.symbol.clone(),
            decision: decision.clone(),
            at: Utc::now(),
        });

        match decision {
            crate::decision::Decision::Accept => {
                let volatility = portfolio.symbol_volatility_24h;
                self.executor.execute_on_all(&signal, volatility, self.executor_ctx.as_ref()).await;
                self.today_signals_executed.fetch_add(1, Ordering::Relaxed);
                *self.last_execution_at.write() = Some(Utc::now());
            }
            crate::decision::Decision::Reject { kind, reason } => {
                info!(signal_id = %signal.id, ?kind, %reason, "cycle rejected by risk manager");
                // Cycle-level rejection returns the signal to `active` so it
                // may be retried on a later cycle before it ages out (§4.3).
                self.signal_store.update_signal_status(
                    signal.id,
                    crate::signal::SignalStatus::Consumed,
                    crate::signal::SignalStatus::Active,
                );
            }
        }
    }

    pub fn today_signals_executed(&self) -> usize {
        self.today_signals_executed.load(Ordering::Relaxed)
    }
}
