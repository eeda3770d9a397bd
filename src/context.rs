// =============================================================================
// LedgerContext — the single facts-provider backing SelectorContext,
// ExecutorContext and MarketFacts (§5, §6.2, §6.3)
// =============================================================================
//
// The scheduler, selector and executor each want a narrow read-only view of
// the same underlying ledger (accounts, orders, positions, bars, risk
// engine). Rather than have three ad-hoc adapters drift out of sync, one
// struct implements all three trait boundaries against the shared stores.
// =============================================================================

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::account::AccountStore;
use crate::bar::BarStore;
use crate::executor::ExecutorContext;
use crate::indicators::atr::calculate_atr;
use crate::order::{Order, OrderStatus, OrderStore};
use crate::position::PositionStore;
use crate::risk::engine::RiskEngine;
use crate::scheduler::MarketFacts;
use crate::selector::{win_rate_from_ledger, SelectorContext};

/// Used by `avgWinLossRatio` when an account has no losing trades yet to
/// divide by — avoids a division-by-zero blowing the sizing multiplier up
/// to infinity on a brand new account.
const DEFAULT_WIN_LOSS_RATIO: f64 = 1.5;

pub struct LedgerContext {
    accounts: Arc<dyn AccountStore>,
    orders: Arc<dyn OrderStore>,
    positions: Arc<dyn PositionStore>,
    bars: Arc<dyn BarStore>,
    risk: Arc<RiskEngine>,
    timeframe: String,
    today_signals_executed: Arc<AtomicUsize>,
    /// Shared with the scheduler, which stamps it right after a fan-out so
    /// the cooldown gate sees the attempt rather than lagging until the
    /// position monitor reconciles a fill.
    last_execution_at: Arc<RwLock<Option<DateTime<Utc>>>>,
}

impl LedgerContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        orders: Arc<dyn OrderStore>,
        positions: Arc<dyn PositionStore>,
        bars: Arc<dyn BarStore>,
        risk: Arc<RiskEngine>,
        timeframe: impl Into<String>,
        today_signals_executed: Arc<AtomicUsize>,
        last_execution_at: Arc<RwLock<Option<DateTime<Utc>>>>,
    ) -> Self {
        Self {
            accounts,
            orders,
            positions,
            bars,
            risk,
            timeframe: timeframe.into(),
            today_signals_executed,
            last_execution_at,
        }
    }

    fn all_ledger_orders(&self) -> Vec<Order> {
        self.accounts
            .list_all_accounts()
            .into_iter()
            .flat_map(|a| self.orders.list_by_account(&a.id))
            .collect()
    }

    fn win_loss_counts(orders: &[Order], symbol: Option<&str>) -> (u32, u32) {
        let mut wins = 0u32;
        let mut losses = 0u32;
        for o in orders {
            if o.status != OrderStatus::Filled {
                continue;
            }
            if let Some(sym) = symbol {
                if o.symbol != sym {
                    continue;
                }
            }
            match o.pnl {
                Some(pnl) if pnl > 0.0 => wins += 1,
                Some(pnl) if pnl < 0.0 => losses += 1,
                _ => {}
            }
        }
        (wins, losses)
    }
}

impl SelectorContext for LedgerContext {
    fn recent_win_rate(&self, symbol: &str) -> f64 {
        let orders = self.all_ledger_orders();
        let (wins, losses) = Self::win_loss_counts(&orders, Some(symbol));
        win_rate_from_ledger(wins, losses)
    }

    fn open_position_symbols(&self) -> Vec<String> {
        self.positions.list_all().into_iter().filter(|p| p.is_open).map(|p| p.symbol).collect()
    }

    fn open_positions_count(&self) -> usize {
        self.positions.list_all().iter().filter(|p| p.is_open).count()
    }

    fn today_signals_executed(&self) -> usize {
        self.today_signals_executed.load(Ordering::Relaxed)
    }

    fn last_execution_at(&self) -> Option<DateTime<Utc>> {
        *self.last_execution_at.read()
    }
}

impl ExecutorContext for LedgerContext {
    fn win_rate(&self, account_id: &str) -> f64 {
        let orders = self.orders.list_by_account(account_id);
        let (wins, losses) = Self::win_loss_counts(&orders, None);
        win_rate_from_ledger(wins, losses)
    }

    fn avg_win_loss_ratio(&self, account_id: &str) -> f64 {
        let orders = self.orders.list_by_account(account_id);
        let (mut win_sum, mut win_n, mut loss_sum, mut loss_n) = (0.0_f64, 0u32, 0.0_f64, 0u32);
        for o in &orders {
            if o.status != OrderStatus::Filled {
                continue;
            }
            match o.pnl {
                Some(pnl) if pnl > 0.0 => {
                    win_sum += pnl;
                    win_n += 1;
                }
                Some(pnl) if pnl < 0.0 => {
                    loss_sum += pnl.abs();
                    loss_n += 1;
                }
                _ => {}
            }
        }
        if loss_n == 0 || win_n == 0 {
            return DEFAULT_WIN_LOSS_RATIO;
        }
        (win_sum / win_n as f64) / (loss_sum / loss_n as f64)
    }
}

impl MarketFacts for LedgerContext {
    fn volatility_24h(&self, symbol: &str) -> f64 {
        let bars = self.bars.read_bars(symbol, &self.timeframe, 25);
        match (calculate_atr(&bars, 14), bars.last()) {
            (Some(atr), Some(last)) if last.close > 0.0 => atr / last.close,
            _ => 0.0,
        }
    }

    fn volume_24h(&self, symbol: &str) -> f64 {
        self.bars.read_bars(symbol, &self.timeframe, 24).iter().map(|b| b.volume).sum()
    }

    fn daily_realized_loss_fraction(&self) -> f64 {
        let pct = self.risk.get_state().daily_pnl_pct;
        if pct < 0.0 {
            -pct / 100.0
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{Account, AccountPolicy, AccountState, InMemoryAccountStore};
    use crate::bar::InMemoryBarStore;
    use crate::exchange::ExchangeClient;
    use crate::order::InMemoryOrderStore;
    use crate::position::InMemoryPositionStore;
    use crate::types::{AccountMode, Direction, MarketType, SizingMode};
    use uuid::Uuid;

    struct NoopClient;

    #[async_trait::async_trait]
    impl ExchangeClient for NoopClient {
        async fn fetch_balance(
            &self,
            _quote_asset: &str,
            _deadline: std::time::Duration,
        ) -> Result<crate::exchange::QuoteBalance, crate::exchange::ExchangeError> {
            unimplemented!()
        }
        async fn fetch_mark_price(
            &self,
            _symbol: &str,
            _deadline: std::time::Duration,
        ) -> Result<f64, crate::exchange::ExchangeError> {
            unimplemented!()
        }
        async fn submit_market_order(
            &self,
            _symbol: &str,
            _side: Direction,
            _quantity: f64,
            _leverage: u32,
            _deadline: std::time::Duration,
        ) -> Result<crate::exchange::OrderAck, crate::exchange::ExchangeError> {
            unimplemented!()
        }
        async fn fetch_open_positions(
            &self,
            _deadline: std::time::Duration,
        ) -> Result<Vec<crate::exchange::ExchangePosition>, crate::exchange::ExchangeError> {
            unimplemented!()
        }
        async fn exchange_info(
            &self,
            _symbol: &str,
            _deadline: std::time::Duration,
        ) -> Result<crate::exchange::SymbolInfo, crate::exchange::ExchangeError> {
            unimplemented!()
        }
    }

    fn account(id: &str) -> Account {
        Account {
            id: id.to_string(),
            display_name: "test".into(),
            market_type: MarketType::Spot,
            mode: AccountMode::Demo,
            policy: AccountPolicy {
                max_position_size_usd: 1000.0,
                leverage: 1,
                max_daily_trades: 10,
                max_risk_per_trade: 0.02,
                max_daily_loss: 0.05,
                stop_on_daily_loss: true,
                sizing_mode: SizingMode::Fixed,
                sizing_value: 100.0,
                auto_trade_enabled: true,
                is_active: true,
                is_verified: true,
            },
            state: AccountState::default(),
        }
    }

    fn filled_order(account_id: &str, symbol: &str, pnl: f64) -> Order {
        Order {
            id: Uuid::new_v4(),
            group_id: Uuid::new_v4(),
            account_id: account_id.to_string(),
            symbol: symbol.to_string(),
            side: Direction::Long,
            quantity: 0.01,
            entry_price: 100.0,
            leverage: 1,
            notional_usd: 100.0,
            stop_loss: 95.0,
            take_profit: 110.0,
            market_type: MarketType::Spot,
            status: OrderStatus::Filled,
            exchange_order_id: Some("x".into()),
            error_kind: None,
            error_message: None,
            pnl: Some(pnl),
            created_at: Utc::now(),
            closed_at: Some(Utc::now()),
        }
    }

    fn context() -> (LedgerContext, Arc<InMemoryOrderStore>, Arc<InMemoryAccountStore>) {
        let accounts = Arc::new(InMemoryAccountStore::new());
        let orders = Arc::new(InMemoryOrderStore::new());
        let positions = Arc::new(InMemoryPositionStore::new());
        let bars = Arc::new(InMemoryBarStore::new(500));
        let risk = Arc::new(RiskEngine::new(10_000.0, 3.0, 5, 5.0, 50));
        accounts.register(account("a1"), Arc::new(NoopClient));
        let ctx = LedgerContext::new(
            accounts.clone(),
            orders.clone(),
            positions,
            bars,
            risk,
            "1h",
            Arc::new(AtomicUsize::new(0)),
            Arc::new(RwLock::new(None)),
        );
        (ctx, orders, accounts)
    }

    #[test]
    fn win_rate_defaults_with_no_history() {
        let (ctx, _, _) = context();
        assert_eq!(ExecutorContext::win_rate(&ctx, "a1"), 0.50);
    }

    #[test]
    fn avg_win_loss_ratio_uses_default_without_losses() {
        let (ctx, orders, _) = context();
        orders.insert_order(filled_order("a1", "BTCUSDT", 50.0));
        assert_eq!(ctx.avg_win_loss_ratio("a1"), DEFAULT_WIN_LOSS_RATIO);
    }

    #[test]
    fn avg_win_loss_ratio_computed_from_ledger() {
        let (ctx, orders, _) = context();
        orders.insert_order(filled_order("a1", "BTCUSDT", 100.0));
        orders.insert_order(filled_order("a1", "BTCUSDT", -50.0));
        assert_eq!(ctx.avg_win_loss_ratio("a1"), 2.0);
    }

    #[test]
    fn today_signals_executed_reads_shared_counter() {
        let counter = Arc::new(AtomicUsize::new(3));
        let accounts = Arc::new(InMemoryAccountStore::new());
        let orders = Arc::new(InMemoryOrderStore::new());
        let positions = Arc::new(InMemoryPositionStore::new());
        let bars = Arc::new(InMemoryBarStore::new(500));
        let risk = Arc::new(RiskEngine::new(10_000.0, 3.0, 5, 5.0, 50));
        let ctx =
            LedgerContext::new(accounts, orders, positions, bars, risk, "1h", counter.clone(), Arc::new(RwLock::new(None)));
        assert_eq!(SelectorContext::today_signals_executed(&ctx), 3);
        counter.fetch_add(1, Ordering::Relaxed);
        assert_eq!(SelectorContext::today_signals_executed(&ctx), 4);
    }

    #[test]
    fn last_execution_at_reads_shared_cell() {
        let cell = Arc::new(RwLock::new(None));
        let accounts = Arc::new(InMemoryAccountStore::new());
        let orders = Arc::new(InMemoryOrderStore::new());
        let positions = Arc::new(InMemoryPositionStore::new());
        let bars = Arc::new(InMemoryBarStore::new(500));
        let risk = Arc::new(RiskEngine::new(10_000.0, 3.0, 5, 5.0, 50));
        let ctx = LedgerContext::new(
            accounts,
            orders,
            positions,
            bars,
            risk,
            "1h",
            Arc::new(AtomicUsize::new(0)),
            cell.clone(),
        );
        assert!(SelectorContext::last_execution_at(&ctx).is_none());
        let now = Utc::now();
        *cell.write() = Some(now);
        assert_eq!(SelectorContext::last_execution_at(&ctx), Some(now));
    }

    #[test]
    fn recent_win_rate_aggregates_across_accounts() {
        let (ctx, orders, accounts) = context();
        accounts.register(account("a2"), Arc::new(NoopClient));
        for _ in 0..4 {
            orders.insert_order(filled_order("a1", "BTCUSDT", 10.0));
        }
        for _ in 0..2 {
            orders.insert_order(filled_order("a2", "BTCUSDT", -10.0));
        }
        assert_eq!(ctx.recent_win_rate("BTCUSDT"), 4.0 / 6.0);
    }
}
