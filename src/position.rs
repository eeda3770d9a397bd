// =============================================================================
// Position Monitor — exchange-authoritative read-through sync (§4.5)
// =============================================================================
//
// SAFETY POLICY: this module only ever reads exchange state and writes it
// into local Position/Order rows. It never places, cancels, or modifies an
// order — a human operator or the Executor does that.
// =============================================================================

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::account::AccountStore;
use crate::order::{OrderStatus, OrderStore};
use crate::types::Direction;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub account_id: String,
    pub symbol: String,
    pub side: Direction,
    pub entry_price: f64,
    pub quantity: f64,
    pub mark_price: f64,
    pub unrealized_pnl: f64,
    pub is_open: bool,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

pub trait PositionStore: Send + Sync {
    fn upsert(&self, position: Position);

    fn close(&self, account_id: &str, symbol: &str);

    fn list_open(&self, account_id: &str) -> Vec<Position>;

    fn list_all(&self) -> Vec<Position>;
}

#[derive(Default)]
pub struct InMemoryPositionStore {
    positions: RwLock<HashMap<(String, String), Position>>,
}

impl InMemoryPositionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PositionStore for InMemoryPositionStore {
    fn upsert(&self, position: Position) {
        let key = (position.account_id.clone(), position.symbol.clone());
        self.positions.write().insert(key, position);
    }

    fn close(&self, account_id: &str, symbol: &str) {
        let mut positions = self.positions.write();
        if let Some(p) = positions.get_mut(&(account_id.to_string(), symbol.to_string())) {
            p.is_open = false;
            p.closed_at = Some(Utc::now());
        }
    }

    fn list_open(&self, account_id: &str) -> Vec<Position> {
        self.positions
            .read()
            .values()
            .filter(|p| p.account_id == account_id && p.is_open)
            .cloned()
            .collect()
    }

    fn list_all(&self) -> Vec<Position> {
        self.positions.read().values().cloned().collect()
    }
}

/// Periodic task (§4.5, ~60s): pulls open positions from each eligible
/// account's exchange and refreshes local `markPrice`/`unrealizedPnl`. When
/// the exchange no longer reports a previously-open position, it is closed
/// locally and realized PnL is written back to the originating order.
pub struct PositionMonitor {
    accounts: Arc<dyn AccountStore>,
    positions: Arc<dyn PositionStore>,
    orders: Arc<dyn OrderStore>,
    exchange_call_timeout: Duration,
}

impl PositionMonitor {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        positions: Arc<dyn PositionStore>,
        orders: Arc<dyn OrderStore>,
        exchange_call_timeout: Duration,
    ) -> Self {
        Self { accounts, positions, orders, exchange_call_timeout }
    }

    /// Run a single sync pass across every eligible account. Never placed on
    /// a hard deadline itself — a slow account's call times out individually
    /// via `exchange_call_timeout` and does not block its peers.
    pub async fn sync_once(&self) {
        let accounts = self.accounts.list_eligible_accounts();
        debug!(account_count = accounts.len(), "position monitor sync starting");

        for account in accounts {
            let Some(client) = self.accounts.fetch_decrypted_client(&account.id) else {
                warn!(account_id = %account.id, "no exchange client resolved for account — skipping sync");
                continue;
            };

            let previously_open: HashMap<String, f64> = self
                .positions
                .list_open(&account.id)
                .into_iter()
                .map(|p| (p.symbol, p.unrealized_pnl))
                .collect();

            match client.fetch_open_positions(self.exchange_call_timeout).await {
                Ok(exchange_positions) => {
                    let mut still_open = std::collections::HashSet::new();
                    for ep in &exchange_positions {
                        still_open.insert(ep.symbol.clone());
                        self.positions.upsert(Position {
                            account_id: account.id.clone(),
                            symbol: ep.symbol.clone(),
                            side: ep.side,
                            entry_price: ep.entry_price,
                            quantity: ep.quantity,
                            mark_price: ep.mark_price,
                            unrealized_pnl: ep.unrealized_pnl,
                            is_open: true,
                            opened_at: Utc::now(),
                            closed_at: None,
                        });
                    }

                    for (symbol, last_unrealized) in &previously_open {
                        if !still_open.contains(symbol) {
                            info!(account_id = %account.id, symbol, "position no longer reported by exchange — closing locally");
                            self.positions.close(&account.id, symbol);
                            self.write_back_realized_pnl(&account.id, symbol, *last_unrealized);
                        }
                    }
                }
                Err(err) => {
                    warn!(account_id = %account.id, error = %err, "position sync failed for account");
                }
            }
        }
    }

    fn write_back_realized_pnl(&self, account_id: &str, symbol: &str, unrealized_pnl_at_close: f64) {
        for order in self.orders.list_filled_open(account_id, symbol) {
            self.orders.record_realized_pnl(order.id, unrealized_pnl_at_close);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_and_list_open() {
        let store = InMemoryPositionStore::new();
        store.upsert(Position {
            account_id: "a1".into(),
            symbol: "BTCUSDT".into(),
            side: Direction::Long,
            entry_price: 60000.0,
            quantity: 0.1,
            mark_price: 61000.0,
            unrealized_pnl: 100.0,
            is_open: true,
            opened_at: Utc::now(),
            closed_at: None,
        });

        let open = store.list_open("a1");
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].symbol, "BTCUSDT");
    }

    #[test]
    fn close_marks_closed_and_excludes_from_open() {
        let store = InMemoryPositionStore::new();
        store.upsert(Position {
            account_id: "a1".into(),
            symbol: "BTCUSDT".into(),
            side: Direction::Long,
            entry_price: 60000.0,
            quantity: 0.1,
            mark_price: 61000.0,
            unrealized_pnl: 100.0,
            is_open: true,
            opened_at: Utc::now(),
            closed_at: None,
        });
        store.close("a1", "BTCUSDT");

        assert!(store.list_open("a1").is_empty());
        let all = store.list_all();
        assert!(!all[0].is_open);
        assert!(all[0].closed_at.is_some());
    }
}
