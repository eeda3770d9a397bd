// =============================================================================
// Account — a configured execution destination (§3.1, §6.4)
// =============================================================================
//
// The core never sees raw credential material. An Account carries a
// capability the store can resolve into an authenticated `ExchangeClient`;
// everything else here is policy and mutable per-account state.
// =============================================================================

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::exchange::ExchangeClient;
use crate::types::{AccountMode, MarketType, SizingMode};

/// Per-account risk/sizing policy envelope (§3.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountPolicy {
    pub max_position_size_usd: f64,
    pub leverage: u32,
    pub max_daily_trades: u32,
    pub max_risk_per_trade: f64,
    pub max_daily_loss: f64,
    pub stop_on_daily_loss: bool,
    pub sizing_mode: SizingMode,
    pub sizing_value: f64,
    pub auto_trade_enabled: bool,
    pub is_active: bool,
    pub is_verified: bool,
}

/// Mutable per-account runtime state, updated by the executor/position monitor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountState {
    pub current_balance: f64,
    pub total_pnl: f64,
    pub today_trades_count: u32,
    pub today_realized_pnl: f64,
    pub last_verified_at: Option<chrono::DateTime<chrono::Utc>>,
    pub daily_loss_tripped: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub display_name: String,
    pub market_type: MarketType,
    pub mode: AccountMode,
    pub policy: AccountPolicy,
    pub state: AccountState,
}

impl Account {
    /// (§3.1) "an account is eligible for a cycle iff isActive ∧ isVerified
    /// ∧ autoTradeEnabled ∧ ¬dailyLossTripped".
    pub fn is_eligible(&self) -> bool {
        self.policy.is_active
            && self.policy.is_verified
            && self.policy.auto_trade_enabled
            && !self.state.daily_loss_tripped
    }
}

/// Consumed by the Executor and Scheduler (§6.4). The core asks this store
/// for eligible accounts and resolves each into an authenticated client
/// without ever holding the underlying secret.
pub trait AccountStore: Send + Sync {
    fn list_eligible_accounts(&self) -> Vec<Account>;

    /// Every registered account regardless of eligibility — used by the
    /// control surface and by ledger-wide facts (win rate, PnL) that must
    /// not silently drop ineligible accounts' trade history.
    fn list_all_accounts(&self) -> Vec<Account>;

    fn fetch_decrypted_client(&self, account_id: &str) -> Option<Arc<dyn ExchangeClient>>;

    fn get(&self, account_id: &str) -> Option<Account>;

    fn update_state(&self, account_id: &str, f: &dyn Fn(&mut AccountState));
}

/// In-memory account registry merging environment-slot accounts (credentials
/// read from `CREDENTIAL_SLOT_n` at boot, §4.4 step 1a) with accounts added
/// at runtime through the control surface (§4.4 step 1b).
pub struct InMemoryAccountStore {
    accounts: RwLock<HashMap<String, Account>>,
    clients: RwLock<HashMap<String, Arc<dyn ExchangeClient>>>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self { accounts: RwLock::new(HashMap::new()), clients: RwLock::new(HashMap::new()) }
    }

    /// Register an account with its resolved exchange client. Called once at
    /// boot per `CREDENTIAL_SLOT_n` environment entry, and again whenever the
    /// control surface adds a store-configured account.
    pub fn register(&self, account: Account, client: Arc<dyn ExchangeClient>) {
        let id = account.id.clone();
        self.accounts.write().insert(id.clone(), account);
        self.clients.write().insert(id, client);
    }

    pub fn remove(&self, account_id: &str) {
        self.accounts.write().remove(account_id);
        self.clients.write().remove(account_id);
    }
}

impl Default for InMemoryAccountStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AccountStore for InMemoryAccountStore {
    fn list_eligible_accounts(&self) -> Vec<Account> {
        self.accounts.read().values().filter(|a| a.is_eligible()).cloned().collect()
    }

    fn list_all_accounts(&self) -> Vec<Account> {
        self.accounts.read().values().cloned().collect()
    }

    fn fetch_decrypted_client(&self, account_id: &str) -> Option<Arc<dyn ExchangeClient>> {
        self.clients.read().get(account_id).cloned()
    }

    fn get(&self, account_id: &str) -> Option<Account> {
        self.accounts.read().get(account_id).cloned()
    }

    fn update_state(&self, account_id: &str, f: &dyn Fn(&mut AccountState)) {
        if let Some(acct) = self.accounts.write().get_mut(account_id) {
            f(&mut acct.state);
        }
    }
}
