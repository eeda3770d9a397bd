// =============================================================================
// ExchangeClient — polymorphic capability set consumed by the executor (§6.5)
// =============================================================================
//
// Market-type routing is a pure function of (account, signal) inside the
// Executor; there is no subtype dispatch per venue (§9 "Recasting source
// patterns"). Every venue implements this one trait.

use async_trait::async_trait;
use std::time::Duration;

use crate::types::Direction;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuoteBalance {
    pub free: f64,
    pub used: f64,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderAck {
    pub order_id: String,
    pub filled_price: f64,
    pub filled_qty: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExchangePosition {
    pub symbol: String,
    pub side: Direction,
    pub entry_price: f64,
    pub quantity: f64,
    pub mark_price: f64,
    pub unrealized_pnl: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SymbolInfo {
    pub tick_size: f64,
    pub lot_step: f64,
    pub min_notional: f64,
}

/// Typed errors every venue call must fail with (§6.5, §4.4 error taxonomy).
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExchangeError {
    #[error("insufficient balance")]
    InsufficientBalance,
    #[error("invalid symbol: {0}")]
    InvalidSymbol(String),
    #[error("invalid api key")]
    InvalidApiKey,
    #[error("rate limited")]
    RateLimited,
    #[error("exchange rejected request: {0}")]
    ExchangeReject(String),
    #[error("network timeout")]
    NetworkTimeout,
}

/// Capability set consumed by the executor. All calls accept a deadline and
/// fail with a typed error rather than suspending indefinitely (§6.5).
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn fetch_balance(&self, quote_asset: &str, deadline: Duration) -> Result<QuoteBalance, ExchangeError>;

    async fn fetch_mark_price(&self, symbol: &str, deadline: Duration) -> Result<f64, ExchangeError>;

    async fn submit_market_order(
        &self,
        symbol: &str,
        side: Direction,
        quantity: f64,
        leverage: u32,
        deadline: Duration,
    ) -> Result<OrderAck, ExchangeError>;

    async fn fetch_open_positions(&self, deadline: Duration) -> Result<Vec<ExchangePosition>, ExchangeError>;

    async fn exchange_info(&self, symbol: &str, deadline: Duration) -> Result<SymbolInfo, ExchangeError>;
}

/// Runs `fut` under `deadline`, mapping elapsed timers to `NetworkTimeout`
/// the way the teacher's `BinanceClient` callers are expected to (§4.4.1).
pub async fn with_deadline<T>(
    deadline: Duration,
    fut: impl std::future::Future<Output = Result<T, ExchangeError>>,
) -> Result<T, ExchangeError> {
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(ExchangeError::NetworkTimeout),
    }
}
