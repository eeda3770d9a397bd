// =============================================================================
// Runtime Configuration — Hot-reloadable engine settings with atomic save
// =============================================================================
//
// Central configuration hub. Every tunable parameter named in the recognized-
// key table lives here so the engine can be reconfigured at runtime without a
// restart.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry `#[serde(default)]` so that adding new fields never
// breaks loading an older config file.
//
// =============================================================================

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::{AccountMode, TradingMode};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_symbols() -> Vec<String> {
    vec![
        "BTCUSDT".to_string(),
        "ETHUSDT".to_string(),
        "BNBUSDT".to_string(),
        "XRPUSDT".to_string(),
        "SOLUSDT".to_string(),
    ]
}

fn default_min_signal_store_score() -> f64 {
    0.65
}

fn default_min_selector_score() -> f64 {
    0.65
}

fn default_max_signal_age_secs() -> u64 {
    24 * 3600
}

fn default_cycle_interval_secs() -> u64 {
    60
}

fn default_cycle_cooldown_secs() -> u64 {
    5 * 60
}

fn default_max_concurrent_positions() -> usize {
    5
}

fn default_max_daily_signals() -> usize {
    10
}

fn default_max_volatility() -> f64 {
    0.15
}

fn default_min_volume_24h() -> f64 {
    1_000_000.0
}

fn default_cycle_deadline_secs() -> u64 {
    60
}

fn default_executor_deadline_secs() -> u64 {
    30
}

fn default_exchange_call_timeout_secs() -> u64 {
    10
}

fn default_credential_slot_prefix() -> String {
    "CREDENTIAL_SLOT_".to_string()
}

fn default_starting_capital() -> f64 {
    10_000.0
}

fn default_max_daily_loss_pct() -> f64 {
    3.0
}

fn default_max_consecutive_losses() -> u32 {
    5
}

fn default_max_drawdown_pct() -> f64 {
    5.0
}

fn default_max_daily_trades() -> u32 {
    50
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration, exactly covering the recognized-key
/// table plus the ambient operational knobs (trading mode, account mode,
/// watched symbols). Per-account policy envelopes live on `Account` itself
/// (see `account::AccountPolicy`), not here — this document is global.
///
/// Every field has a serde default so that older JSON files missing new
/// fields will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Operational modes ---------------------------------------------------
    /// Current trading mode: Live, Paused, or Killed.
    #[serde(default)]
    pub trading_mode: TradingMode,

    /// Whether running against real funds or simulated: Demo or Live.
    #[serde(default)]
    pub account_mode: AccountMode,

    /// Symbols the engine is watching and generating signals for.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    // --- Recognized keys (§6.7) ----------------------------------------------
    /// Floor to persist a signal produced by the generator.
    #[serde(default = "default_min_signal_store_score")]
    pub min_signal_store_score: f64,

    /// Floor to consider a stored signal in the selector's pool.
    #[serde(default = "default_min_selector_score")]
    pub min_selector_score: f64,

    /// Age after which an `active` signal expires, in seconds.
    #[serde(default = "default_max_signal_age_secs")]
    pub max_signal_age_secs: u64,

    /// Scheduler tick period, in seconds.
    #[serde(default = "default_cycle_interval_secs")]
    pub cycle_interval_secs: u64,

    /// Minimum spacing the selector enforces between two executions, in
    /// seconds.
    #[serde(default = "default_cycle_cooldown_secs")]
    pub cycle_cooldown_secs: u64,

    /// Portfolio-wide cap on simultaneously open positions.
    #[serde(default = "default_max_concurrent_positions")]
    pub max_concurrent_positions: usize,

    /// Maximum number of signals the selector may advance to execution per
    /// day.
    #[serde(default = "default_max_daily_signals")]
    pub max_daily_signals: usize,

    /// 24h realized volatility above which a symbol is rejected at the risk
    /// gate.
    #[serde(default = "default_max_volatility")]
    pub max_volatility: f64,

    /// 24h quote volume below which a symbol is considered illiquid.
    #[serde(default = "default_min_volume_24h")]
    pub min_volume_24h: f64,

    /// Wall-clock budget for one full scheduler cycle, in seconds.
    #[serde(default = "default_cycle_deadline_secs")]
    pub cycle_deadline_secs: u64,

    /// Wall-clock budget for the executor's multi-account fan-out, in
    /// seconds.
    #[serde(default = "default_executor_deadline_secs")]
    pub executor_deadline_secs: u64,

    /// Per-call timeout applied to every exchange client method, in
    /// seconds.
    #[serde(default = "default_exchange_call_timeout_secs")]
    pub exchange_call_timeout_secs: u64,

    /// Environment variable prefix used to resolve environment-slot account
    /// credentials (e.g. `CREDENTIAL_SLOT_MAIN_API_KEY`).
    #[serde(default = "default_credential_slot_prefix")]
    pub credential_slot_prefix: String,

    // --- Circuit breaker ledger (§4.3.1) -------------------------------------
    /// Baseline capital the global circuit breaker ledger measures PnL
    /// against.
    #[serde(default = "default_starting_capital")]
    pub starting_capital: f64,

    /// Daily realized loss, as a percentage of `starting_capital`, that
    /// trips the daily-loss breaker.
    #[serde(default = "default_max_daily_loss_pct")]
    pub max_daily_loss_pct: f64,

    /// Consecutive losing trades that trip the consecutive-loss breaker.
    #[serde(default = "default_max_consecutive_losses")]
    pub max_consecutive_losses: u32,

    /// Peak-to-trough drawdown, as a percentage of `starting_capital`, that
    /// trips the drawdown breaker.
    #[serde(default = "default_max_drawdown_pct")]
    pub max_drawdown_pct: f64,

    /// Maximum trades per day across the portfolio before the trade-limit
    /// breaker trips.
    #[serde(default = "default_max_daily_trades")]
    pub max_daily_trades: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            trading_mode: TradingMode::Paused,
            account_mode: AccountMode::Demo,
            symbols: default_symbols(),
            min_signal_store_score: default_min_signal_store_score(),
            min_selector_score: default_min_selector_score(),
            max_signal_age_secs: default_max_signal_age_secs(),
            cycle_interval_secs: default_cycle_interval_secs(),
            cycle_cooldown_secs: default_cycle_cooldown_secs(),
            max_concurrent_positions: default_max_concurrent_positions(),
            max_daily_signals: default_max_daily_signals(),
            max_volatility: default_max_volatility(),
            min_volume_24h: default_min_volume_24h(),
            cycle_deadline_secs: default_cycle_deadline_secs(),
            executor_deadline_secs: default_executor_deadline_secs(),
            exchange_call_timeout_secs: default_exchange_call_timeout_secs(),
            credential_slot_prefix: default_credential_slot_prefix(),
            starting_capital: default_starting_capital(),
            max_daily_loss_pct: default_max_daily_loss_pct(),
            max_consecutive_losses: default_max_consecutive_losses(),
            max_drawdown_pct: default_max_drawdown_pct(),
            max_daily_trades: default_max_daily_trades(),
        }
    }
}

impl RuntimeConfig {
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }

    pub fn cycle_cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cycle_cooldown_secs as i64)
    }

    pub fn max_signal_age(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.max_signal_age_secs as i64)
    }

    pub fn cycle_deadline(&self) -> Duration {
        Duration::from_secs(self.cycle_deadline_secs)
    }

    pub fn executor_deadline(&self) -> Duration {
        Duration::from_secs(self.executor_deadline_secs)
    }

    pub fn exchange_call_timeout(&self) -> Duration {
        Duration::from_secs(self.exchange_call_timeout_secs)
    }

    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            trading_mode = %config.trading_mode,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    ///
    /// This prevents corruption if the process crashes mid-write.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.trading_mode, TradingMode::Paused);
        assert_eq!(cfg.account_mode, AccountMode::Demo);
        assert_eq!(cfg.symbols.len(), 5);
        assert_eq!(cfg.symbols[0], "BTCUSDT");
        assert_eq!(cfg.symbols[4], "SOLUSDT");
        assert_eq!(cfg.max_concurrent_positions, 5);
        assert_eq!(cfg.max_daily_signals, 10);
        assert!((cfg.min_signal_store_score - 0.65).abs() < f64::EPSILON);
        assert!((cfg.min_selector_score - 0.65).abs() < f64::EPSILON);
        assert!((cfg.max_volatility - 0.15).abs() < f64::EPSILON);
        assert!((cfg.min_volume_24h - 1_000_000.0).abs() < f64::EPSILON);
        assert_eq!(cfg.credential_slot_prefix, "CREDENTIAL_SLOT_");
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.trading_mode, TradingMode::Paused);
        assert_eq!(cfg.account_mode, AccountMode::Demo);
        assert_eq!(cfg.cycle_interval_secs, 60);
        assert_eq!(cfg.executor_deadline_secs, 30);
        assert_eq!(cfg.exchange_call_timeout_secs, 10);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "trading_mode": "Live", "symbols": ["ETHUSDT"] }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.trading_mode, TradingMode::Live);
        assert_eq!(cfg.symbols, vec!["ETHUSDT"]);
        assert_eq!(cfg.max_concurrent_positions, 5);
        assert_eq!(cfg.max_signal_age_secs, 24 * 3600);
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = RuntimeConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.symbols, cfg2.symbols);
        assert_eq!(cfg.max_concurrent_positions, cfg2.max_concurrent_positions);
        assert_eq!(cfg.trading_mode, cfg2.trading_mode);
    }

    #[test]
    fn duration_accessors_convert_seconds() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.cycle_interval(), Duration::from_secs(60));
        assert_eq!(cfg.cycle_cooldown(), chrono::Duration::seconds(300));
        assert_eq!(cfg.max_signal_age(), chrono::Duration::hours(24));
    }
}
