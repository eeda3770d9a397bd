// =============================================================================
// Central Application State
// =============================================================================
//
// The single source of truth shared across the scheduler and the control
// surface. Every store and engine lives behind an `Arc` so that both the
// background cycle loop and the API handlers can read (and occasionally
// mutate) the same objects without copying.
//
// Thread safety:
//   - `AtomicU64` for lock-free version/sequence tracking.
//   - `parking_lot::RwLock` for the mutable config and small scalar flags.
//   - The stores themselves (`SignalStore`, `OrderStore`, ...) own their own
//     interior mutability; `AppState` only holds `Arc<dyn Trait>` handles.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::account::AccountStore;
use crate::decision::{DecisionLog, DecisionRecord};
use crate::order::{Order, OrderStore};
use crate::position::{Position, PositionStore};
use crate::risk::engine::RiskEngine;
use crate::runtime_config::RuntimeConfig;
use crate::signal::store::SignalStore;
use crate::signal::Signal;

/// Central application state shared across all async tasks via `Arc<AppState>`.
pub struct AppState {
    // ── Version tracking ────────────────────────────────────────────────
    /// Monotonically increasing version counter. Incremented on every
    /// meaningful state mutation. The WebSocket feed uses this to detect
    /// changes and push updates.
    pub state_version: AtomicU64,

    /// WebSocket message sequence number (incremented per message sent).
    pub ws_sequence_number: AtomicU64,

    // ── Configuration ───────────────────────────────────────────────────
    pub runtime_config: Arc<RwLock<RuntimeConfig>>,

    // ── Stores ──────────────────────────────────────────────────────────
    pub signal_store: Arc<dyn SignalStore>,
    pub account_store: Arc<dyn AccountStore>,
    pub order_store: Arc<dyn OrderStore>,
    pub position_store: Arc<dyn PositionStore>,

    // ── Risk ────────────────────────────────────────────────────────────
    pub risk_engine: Arc<RiskEngine>,

    // ── Decision audit trail (§6.8 `GET /api/v1/decisions`) ────────────
    pub decision_log: Arc<DecisionLog>,

    // ── Operational status ──────────────────────────────────────────────
    pub ws_user_connected: RwLock<bool>,
    pub last_ws_user_event: RwLock<std::time::Instant>,

    // ── Timing ──────────────────────────────────────────────────────────
    pub start_time: std::time::Instant,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: RuntimeConfig,
        signal_store: Arc<dyn SignalStore>,
        account_store: Arc<dyn AccountStore>,
        order_store: Arc<dyn OrderStore>,
        position_store: Arc<dyn PositionStore>,
        risk_engine: Arc<RiskEngine>,
        decision_log: Arc<DecisionLog>,
    ) -> Self {
        Self {
            state_version: AtomicU64::new(1),
            ws_sequence_number: AtomicU64::new(0),
            runtime_config: Arc::new(RwLock::new(config)),
            signal_store,
            account_store,
            order_store,
            position_store,
            risk_engine,
            decision_log,
            ws_user_connected: RwLock::new(false),
            last_ws_user_event: RwLock::new(std::time::Instant::now()),
            start_time: std::time::Instant::now(),
        }
    }

    // ── Version Management ──────────────────────────────────────────────

    /// Atomically increment the state version. Call this after every
    /// meaningful mutation to signal WebSocket clients that fresh data is
    /// available.
    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    /// Read the current state version without modifying it.
    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // ── Snapshot Builder ────────────────────────────────────────────────

    /// Build a complete, serialisable snapshot of the entire engine state.
    ///
    /// This is the payload sent via the REST `GET /api/v1/state` endpoint
    /// and the WebSocket push feed.
    pub fn build_snapshot(&self) -> StateSnapshot {
        let now = chrono::Utc::now();
        let config = self.runtime_config.read();
        let version = self.current_state_version();

        let ws_user_event_age_ms = self.last_ws_user_event.read().elapsed().as_millis() as u64;
        let risk_state = self.risk_engine.get_state();

        let truth = TruthHeader {
            ws_user_connected: *self.ws_user_connected.read(),
            last_ws_user_event_age_ms: ws_user_event_age_ms,
            state_version: version,
            ws_sequence_number: self.ws_sequence_number.load(Ordering::Relaxed),
            trading_mode: config.trading_mode.to_string(),
            account_mode: config.account_mode.to_string(),
            risk_mode: risk_state.risk_mode.clone(),
            server_time: now.timestamp_millis(),
        };

        let runtime_config_summary = RuntimeConfigSummary {
            trading_mode: config.trading_mode.to_string(),
            account_mode: config.account_mode.to_string(),
            symbols: config.symbols.clone(),
            max_concurrent_positions: config.max_concurrent_positions,
            max_daily_signals: config.max_daily_signals,
            max_volatility: config.max_volatility,
            min_volume_24h: config.min_volume_24h,
        };

        StateSnapshot {
            state_version: version,
            server_time: now.timestamp_millis(),
            truth,
            positions: self
                .position_store
                .list_all()
                .into_iter()
                .filter(|p| p.is_open)
                .collect(),
            recent_signals: self
                .signal_store
                .list_active_signals(now - chrono::Duration::hours(24)),
            recent_decisions: self.decision_log.recent(),
            risk: RiskSnapshot {
                risk_mode: risk_state.risk_mode.clone(),
                daily_pnl: risk_state.daily_pnl,
                daily_pnl_pct: risk_state.daily_pnl_pct,
                remaining_daily_loss_pct: risk_state.remaining_daily_loss_pct,
                circuit_breakers: risk_state.circuit_breakers.clone(),
            },
            runtime_config: runtime_config_summary,
        }
    }

    /// All orders carrying `groupId` across every account — the summary an
    /// API consumer stitches back into a `Summary` view for a given cycle.
    pub fn orders_for_group(&self, group_id: uuid::Uuid) -> Vec<Order> {
        self.order_store.list_by_group(group_id)
    }
}

// =============================================================================
// Serialisable snapshot types
// =============================================================================

/// Full engine state snapshot sent to the control surface.
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub state_version: u64,
    pub server_time: i64,
    pub truth: TruthHeader,
    pub positions: Vec<Position>,
    pub recent_signals: Vec<Signal>,
    pub recent_decisions: Vec<DecisionRecord>,
    pub risk: RiskSnapshot,
    pub runtime_config: RuntimeConfigSummary,
}

/// Operational truth header — the control surface's primary status banner.
#[derive(Debug, Clone, Serialize)]
pub struct TruthHeader {
    pub ws_user_connected: bool,
    pub last_ws_user_event_age_ms: u64,
    pub state_version: u64,
    pub ws_sequence_number: u64,
    pub trading_mode: String,
    pub account_mode: String,
    pub risk_mode: String,
    pub server_time: i64,
}

/// Risk engine snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct RiskSnapshot {
    pub risk_mode: String,
    pub daily_pnl: f64,
    pub daily_pnl_pct: f64,
    pub remaining_daily_loss_pct: f64,
    pub circuit_breakers: Vec<crate::risk::engine::CircuitBreakerInfo>,
}

/// Summary of the recognized-key config table for the control surface.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeConfigSummary {
    pub trading_mode: String,
    pub account_mode: String,
    pub symbols: Vec<String>,
    pub max_concurrent_positions: usize,
    pub max_daily_signals: usize,
    pub max_volatility: f64,
    pub min_volume_24h: f64,
}
