// =============================================================================
// Signal Core — Main Entry Point
// =============================================================================
//
// The engine starts in Demo + Paused mode for safety. Operators must
// explicitly switch to Live mode via the control surface.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod account;
mod api;
mod app_state;
mod bar;
mod context;
mod decision;
mod exchange;
mod executor;
mod indicators;
mod notifier;
mod order;
mod position;
mod risk;
mod runtime_config;
mod scheduler;
mod selector;
mod signal;
mod types;

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::account::{Account, AccountPolicy, AccountState, InMemoryAccountStore};
use crate::app_state::AppState;
use crate::bar::InMemoryBarStore;
use crate::context::LedgerContext;
use crate::decision::DecisionLog;
use crate::exchange::binance::BinanceClient;
use crate::executor::MultiAccountExecutor;
use crate::notifier::LoggingNotifier;
use crate::order::InMemoryOrderStore;
use crate::position::{InMemoryPositionStore, PositionMonitor};
use crate::risk::engine::RiskEngine;
use crate::runtime_config::RuntimeConfig;
use crate::scheduler::{Scheduler, SchedulerConfig};
use crate::selector::{BestSignalSelector, SelectorConfig};
use crate::signal::generator::SignalGenerator;
use crate::signal::store::InMemorySignalStore;
use crate::types::{AccountMode, MarketType, SizingMode, TradingMode};

/// Default timeframe the generator/selector pipeline analyzes. A production
/// deployment could make this per-symbol configurable; the recognized-key
/// table (§6.7) does not expose one, so it stays a constant.
const TIMEFRAME: &str = "1h";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("signal-core starting up");

    let mut config = RuntimeConfig::load("runtime_config.json").unwrap_or_else(|e| {
        warn!(error = %e, "failed to load runtime config, using defaults");
        RuntimeConfig::default()
    });

    // SAFETY: force Demo + Paused on every startup regardless of what was
    // persisted — Live trading must always be a deliberate post-boot action.
    config.trading_mode = TradingMode::Paused;
    config.account_mode = AccountMode::Demo;

    if let Ok(syms) = std::env::var("SIGNAL_CORE_SYMBOLS") {
        let parsed: Vec<String> = syms.split(',').map(|s| s.trim().to_uppercase()).filter(|s| !s.is_empty()).collect();
        if !parsed.is_empty() {
            config.symbols = parsed;
        }
    }

    info!(symbols = ?config.symbols, "configured trading pairs");
    info!(trading_mode = %config.trading_mode, account_mode = %config.account_mode, "engine starting in safe mode (Demo + Paused)");

    // ── 2. Build stores and engines ──────────────────────────────────────
    let bar_store: Arc<dyn bar::BarStore> = Arc::new(InMemoryBarStore::new(bar::MIN_RETENTION));
    let signal_store: Arc<dyn signal::store::SignalStore> = Arc::new(InMemorySignalStore::new());
    let account_store_concrete = Arc::new(InMemoryAccountStore::new());
    let account_store: Arc<dyn account::AccountStore> = account_store_concrete.clone();
    let order_store: Arc<dyn order::OrderStore> = Arc::new(InMemoryOrderStore::new());
    let position_store: Arc<dyn position::PositionStore> = Arc::new(InMemoryPositionStore::new());
    let notifier: Arc<dyn notifier::Notifier> = Arc::new(LoggingNotifier);
    let decision_log = Arc::new(DecisionLog::new());

    let risk_engine = Arc::new(RiskEngine::new(
        config.starting_capital,
        config.max_daily_loss_pct,
        config.max_consecutive_losses,
        config.max_drawdown_pct,
        config.max_daily_trades,
    ));

    register_env_slot_accounts(&config, account_store_concrete.as_ref());

    let executor = Arc::new(MultiAccountExecutor::new(
        account_store.clone(),
        order_store.clone(),
        notifier.clone(),
        config.executor_deadline(),
        config.exchange_call_timeout(),
    ));

    let today_signals_executed = Arc::new(AtomicUsize::new(0));
    let last_execution_at = Arc::new(RwLock::new(None));
    let ledger_ctx = Arc::new(LedgerContext::new(
        account_store.clone(),
        order_store.clone(),
        position_store.clone(),
        bar_store.clone(),
        risk_engine.clone(),
        TIMEFRAME,
        today_signals_executed.clone(),
        last_execution_at.clone(),
    ));

    let trading_mode = Arc::new(RwLock::new(config.trading_mode));

    // ── 3. Build shared API/control-surface state ────────────────────────
    let state = Arc::new(AppState::new(
        config.clone(),
        signal_store.clone(),
        account_store.clone(),
        order_store.clone(),
        position_store.clone(),
        risk_engine.clone(),
        decision_log.clone(),
    ));

    // ── 4. Scheduler ──────────────────────────────────────────────────────
    let scheduler_config = SchedulerConfig {
        symbols: config.symbols.clone(),
        timeframe: TIMEFRAME.to_string(),
        cycle_interval: config.cycle_interval(),
        cycle_deadline: config.cycle_deadline(),
        max_concurrent_positions: config.max_concurrent_positions,
        max_daily_loss_global: config.max_daily_loss_pct / 100.0,
        max_volatility: config.max_volatility,
        min_volume_24h: config.min_volume_24h,
        max_signal_age: config.max_signal_age(),
    };

    let selector = BestSignalSelector::new(
        signal_store.clone(),
        SelectorConfig {
            cooldown: config.cycle_cooldown(),
            max_concurrent_positions: config.max_concurrent_positions,
            max_daily_signals: config.max_daily_signals,
            max_signal_age: config.max_signal_age(),
        },
    );

    let scheduler = Arc::new(Scheduler::new(
        scheduler_config,
        bar_store.clone(),
        SignalGenerator::default(),
        signal_store.clone(),
        selector,
        ledger_ctx.clone(),
        risk_engine.clone(),
        position_store.clone(),
        executor.clone(),
        ledger_ctx.clone(),
        ledger_ctx.clone(),
        notifier.clone(),
        trading_mode,
        decision_log.clone(),
        today_signals_executed,
        last_execution_at,
    ));

    scheduler.spawn();
    info!("scheduler running");

    // ── 5. Position monitor (exchange reconciliation) ────────────────────
    let monitor = Arc::new(PositionMonitor::new(
        account_store.clone(),
        position_store.clone(),
        order_store.clone(),
        config.exchange_call_timeout(),
    ));
    tokio::spawn({
        let monitor = monitor.clone();
        async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                monitor.sync_once().await;
            }
        }
    });

    // ── 6. API server ─────────────────────────────────────────────────────
    let bind_addr = std::env::var("SIGNAL_CORE_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".into());
    let api_state = state.clone();
    tokio::spawn(async move {
        let app = api::rest::router(api_state);
        let listener = tokio::net::TcpListener::bind(&bind_addr).await.expect("failed to bind API server");
        info!(addr = %bind_addr, "API server listening");
        axum::serve(listener, app).await.expect("API server failed");
    });

    info!("all subsystems running, press Ctrl+C to stop");

    // ── 7. Graceful shutdown ──────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — stopping gracefully");

    if let Err(e) = state.runtime_config.read().save("runtime_config.json") {
        error!(error = %e, "failed to save runtime config on shutdown");
    }

    info!("signal-core shut down complete");
    Ok(())
}

/// Resolves `{prefix}{NAME}_API_KEY` / `{prefix}{NAME}_API_SECRET` pairs from
/// the environment into registered accounts (§4.4 step 1a, §6.4). A slot
/// missing its secret half is skipped with a warning rather than aborting
/// startup — one bad slot should not take down every other account.
fn register_env_slot_accounts(config: &RuntimeConfig, store: &InMemoryAccountStore) {
    let prefix = &config.credential_slot_prefix;
    let key_suffix = "_API_KEY";

    let mut registered = 0usize;
    for (var, value) in std::env::vars() {
        let Some(rest) = var.strip_prefix(prefix.as_str()) else { continue };
        let Some(name) = rest.strip_suffix(key_suffix) else { continue };
        if name.is_empty() {
            continue;
        }

        let secret_var = format!("{prefix}{name}_API_SECRET");
        let Ok(secret) = std::env::var(&secret_var) else {
            warn!(slot = name, "credential slot missing {secret_var}, skipping");
            continue;
        };

        let account_id = name.to_lowercase();
        let client: Arc<dyn exchange::ExchangeClient> = Arc::new(BinanceClient::new(value, secret));
        store.register(
            Account {
                id: account_id.clone(),
                display_name: name.to_string(),
                market_type: MarketType::Spot,
                mode: AccountMode::Demo,
                policy: AccountPolicy {
                    max_position_size_usd: 1000.0,
                    leverage: 1,
                    max_daily_trades: config.max_daily_trades,
                    max_risk_per_trade: 0.02,
                    max_daily_loss: config.max_daily_loss_pct / 100.0,
                    stop_on_daily_loss: true,
                    sizing_mode: SizingMode::Fixed,
                    sizing_value: 100.0,
                    auto_trade_enabled: true,
                    is_active: true,
                    is_verified: true,
                },
                state: AccountState::default(),
            },
            client,
        );
        registered += 1;
        info!(account_id, "registered account from credential slot");
    }

    if registered == 0 {
        warn!("no credential slot accounts registered — engine has no execution destinations");
    }
}
