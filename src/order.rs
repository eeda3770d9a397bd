// =============================================================================
// Order — a per-account execution record for one signal (§3.1, §4.4)
// =============================================================================

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::types::{Direction, MarketType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Filled,
    Failed,
    Partial,
}

/// Error taxonomy recorded as `errorKind` on a failed order (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum OrderErrorKind {
    #[error("insufficient balance")]
    InsufficientBalance,
    #[error("order notional below exchange minimum")]
    BelowMinNotional,
    #[error("invalid symbol")]
    InvalidSymbol,
    #[error("invalid api key")]
    InvalidApiKey,
    #[error("rate limited")]
    RateLimited,
    #[error("exchange rejected request")]
    ExchangeReject,
    #[error("network timeout")]
    NetworkTimeout,
    #[error("balance fetch timed out")]
    BalanceTimeout,
    #[error("skipped by sizing policy")]
    SkippedBySizing,
    #[error("executor deadline exceeded")]
    Timeout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub group_id: Uuid,
    pub account_id: String,
    pub symbol: String,
    pub side: Direction,
    pub quantity: f64,
    pub entry_price: f64,
    pub leverage: u32,
    pub notional_usd: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub market_type: MarketType,
    pub status: OrderStatus,
    pub exchange_order_id: Option<String>,
    pub error_kind: Option<OrderErrorKind>,
    pub error_message: Option<String>,
    pub pnl: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Order {
    /// (§3.1) "an order in FAILED carries a non-null errorKind; an order in
    /// FILLED carries a non-null exchangeOrderId".
    pub fn is_well_formed(&self) -> bool {
        match self.status {
            OrderStatus::Failed => self.error_kind.is_some(),
            OrderStatus::Filled => self.exchange_order_id.is_some(),
            _ => true,
        }
    }
}

/// Consumed by the Executor (§6.3). `(groupId, accountId)` uniqueness backs
/// executor idempotency (P3) — retrying `executeOnAll` after partial failure
/// must not re-submit to an account that already has a terminal row.
pub trait OrderStore: Send + Sync {
    fn insert_order(&self, order: Order);

    fn update_order_status(
        &self,
        id: Uuid,
        status: OrderStatus,
        exchange_order_id: Option<String>,
        error_kind: Option<OrderErrorKind>,
        error_message: Option<String>,
    );

    /// Existing terminal order for this `(groupId, accountId)` pair, if any.
    fn find_terminal(&self, group_id: Uuid, account_id: &str) -> Option<Order>;

    fn list_by_group(&self, group_id: Uuid) -> Vec<Order>;

    /// Filled orders for this account/symbol still awaiting a closing PnL
    /// write-back (consumed by the Position Monitor on exchange-reported
    /// close, §4.5).
    fn list_filled_open(&self, account_id: &str, symbol: &str) -> Vec<Order>;

    fn record_realized_pnl(&self, id: Uuid, pnl: f64);

    fn get(&self, id: Uuid) -> Option<Order>;

    /// All orders for one account, closed or open — the ledger a win-rate /
    /// avg-win-loss-ratio computation reads from.
    fn list_by_account(&self, account_id: &str) -> Vec<Order>;
}

#[derive(Default)]
pub struct InMemoryOrderStore {
    orders: RwLock<HashMap<Uuid, Order>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OrderStore for InMemoryOrderStore {
    fn insert_order(&self, order: Order) {
        self.orders.write().insert(order.id, order);
    }

    fn update_order_status(
        &self,
        id: Uuid,
        status: OrderStatus,
        exchange_order_id: Option<String>,
        error_kind: Option<OrderErrorKind>,
        error_message: Option<String>,
    ) {
        let mut orders = self.orders.write();
        if let Some(o) = orders.get_mut(&id) {
            o.status = status;
            if exchange_order_id.is_some() {
                o.exchange_order_id = exchange_order_id;
            }
            o.error_kind = error_kind;
            o.error_message = error_message;
            if matches!(status, OrderStatus::Filled | OrderStatus::Failed) {
                o.closed_at = Some(Utc::now());
            }
        }
    }

    fn find_terminal(&self, group_id: Uuid, account_id: &str) -> Option<Order> {
        self.orders
            .read()
            .values()
            .find(|o| {
                o.group_id == group_id
                    && o.account_id == account_id
                    && matches!(o.status, OrderStatus::Filled | OrderStatus::Failed | OrderStatus::Partial)
            })
            .cloned()
    }

    fn list_by_group(&self, group_id: Uuid) -> Vec<Order> {
        self.orders.read().values().filter(|o| o.group_id == group_id).cloned().collect()
    }

    fn list_filled_open(&self, account_id: &str, symbol: &str) -> Vec<Order> {
        self.orders
            .read()
            .values()
            .filter(|o| {
                o.account_id == account_id && o.symbol == symbol && o.status == OrderStatus::Filled && o.pnl.is_none()
            })
            .cloned()
            .collect()
    }

    fn record_realized_pnl(&self, id: Uuid, pnl: f64) {
        if let Some(o) = self.orders.write().get_mut(&id) {
            o.pnl = Some(pnl);
        }
    }

    fn get(&self, id: Uuid) -> Option<Order> {
        self.orders.read().get(&id).cloned()
    }

    fn list_by_account(&self, account_id: &str) -> Vec<Order> {
        self.orders.read().values().filter(|o| o.account_id == account_id).cloned().collect()
    }
}
