// =============================================================================
// Multi-Account Executor — parallel order fan-out across N accounts (§4.4)
// =============================================================================

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::account::AccountStore;
use crate::exchange::ExchangeError;
use crate::notifier::{Notifier, OrderEvent};
use crate::order::{Order, OrderErrorKind, OrderStatus, OrderStore};
use crate::risk::sizing::{size_position, SizingInputs, SizingOutcome};
use crate::signal::Signal;
use crate::types::MarketType;

const BALANCE_FETCH_TIMEOUT: Duration = Duration::from_secs(3);
/// (§4.4 protocol step 2) spot is preferred over futures for a `both`-type
/// account when the signal is high quality, low volatility, and on a higher
/// timeframe.
const SPOT_SCORE_THRESHOLD: f64 = 0.75;
const SPOT_VOLATILITY_CEILING: f64 = 0.10;
const SPOT_TIMEFRAMES: [&str; 2] = ["4h", "1d"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerAccountOutcome {
    pub account_id: String,
    pub status: OrderStatus,
    pub order_id: Option<String>,
    pub error_kind: Option<OrderErrorKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub group_id: Uuid,
    pub total_accounts: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub per_account: Vec<PerAccountOutcome>,
}

/// Stats the executor needs per account that don't live on the Account row
/// (the same closed-order-ledger lookups the selector uses, §9.1).
pub trait ExecutorContext: Send + Sync {
    fn win_rate(&self, account_id: &str) -> f64;
    fn avg_win_loss_ratio(&self, account_id: &str) -> f64;
}

pub struct MultiAccountExecutor {
    accounts: Arc<dyn AccountStore>,
    orders: Arc<dyn OrderStore>,
    notifier: Arc<dyn Notifier>,
    fanout_deadline: Duration,
    exchange_call_timeout: Duration,
}

impl MultiAccountExecutor {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        orders: Arc<dyn OrderStore>,
        notifier: Arc<dyn Notifier>,
        fanout_deadline: Duration,
        exchange_call_timeout: Duration,
    ) -> Self {
        Self { accounts, orders, notifier, fanout_deadline, exchange_call_timeout }
    }

    #[instrument(skip(self, signal, ctx), fields(group_id = %signal.group_id, symbol = %signal.symbol))]
    pub async fn execute_on_all(
        &self,
        signal: &Signal,
        volatility_24h: f64,
        ctx: &dyn ExecutorContext,
    ) -> Summary {
        let accounts = self.accounts.list_eligible_accounts();
        let group_id = signal.group_id;

        let tasks = accounts.into_iter().map(|account| {
            let account_id = account.id.clone();
            async move {
                if let Some(existing) = self.orders.find_terminal(group_id, &account_id) {
                    // Idempotency (§4.4, P3): don't re-submit a terminal pair.
                    return PerAccountOutcome {
                        account_id,
                        status: existing.status,
                        order_id: existing.exchange_order_id,
                        error_kind: existing.error_kind,
                    };
                }

                // Each account is bounded by its own deadline so one slow
                // account cannot erase the completed outcomes of its peers
                // (§4.4: individual task failures do not cancel peers).
                match tokio::time::timeout(
                    self.fanout_deadline,
                    self.execute_for_account(signal, volatility_24h, &account_id, ctx),
                )
                .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        warn!(account_id, "account execution exceeded fan-out deadline");
                        self.notify_failure(signal, &account_id, OrderErrorKind::Timeout).await;
                        PerAccountOutcome {
                            account_id,
                            status: OrderStatus::Failed,
                            order_id: None,
                            error_kind: Some(OrderErrorKind::Timeout),
                        }
                    }
                }
            }
        });

        let per_account = futures_util::future::join_all(tasks).await;

        let succeeded = per_account.iter().filter(|o| o.status == OrderStatus::Filled).count();
        let failed = per_account.len() - succeeded;

        let summary = Summary { group_id, total_accounts: per_account.len(), succeeded, failed, per_account };
        self.notifier.publish_summary(summary.clone()).await;
        info!(succeeded, failed, "cycle execution complete");
        summary
    }

    async fn execute_for_account(
        &self,
        signal: &Signal,
        volatility_24h: f64,
        account_id: &str,
        ctx: &dyn ExecutorContext,
    ) -> PerAccountOutcome {
        let Some(account) = self.accounts.get(account_id) else {
            return self.fail(signal, account_id, OrderErrorKind::ExchangeReject, "account disappeared mid-cycle").await;
        };
        let Some(client) = self.accounts.fetch_decrypted_client(account_id) else {
            return self.fail(signal, account_id, OrderErrorKind::InvalidApiKey, "no exchange client resolved").await;
        };

        let balance = match tokio::time::timeout(
            BALANCE_FETCH_TIMEOUT,
            client.fetch_balance("USDT", self.exchange_call_timeout),
        )
        .await
        {
            Ok(Ok(b)) => b,
            Ok(Err(_)) | Err(_) => {
                return self.fail(signal, account_id, OrderErrorKind::BalanceTimeout, "balance fetch timed out").await;
            }
        };

        let symbol_info = match client.exchange_info(&signal.symbol, self.exchange_call_timeout).await {
            Ok(info) => info,
            Err(err) => return self.fail(signal, account_id, map_exchange_error(&err), err.to_string()).await,
        };

        let sizing_inputs = SizingInputs {
            account_balance: balance.free,
            win_rate: ctx.win_rate(account_id),
            avg_win_loss_ratio: ctx.avg_win_loss_ratio(account_id),
            exchange_min_notional: symbol_info.min_notional,
            lot_step: symbol_info.lot_step,
        };

        let (quantity, _notional) = match size_position(signal, &account, &sizing_inputs) {
            SizingOutcome::Sized { quantity, notional_usd } => (quantity, notional_usd),
            SizingOutcome::Skip { reason } => {
                return self.fail(signal, account_id, OrderErrorKind::SkippedBySizing, reason).await;
            }
        };

        let market_type = self.choose_market(&account.market_type, signal, volatility_24h);

        let order_id = Uuid::new_v4();
        self.orders.insert_order(Order {
            id: order_id,
            group_id: signal.group_id,
            account_id: account_id.to_string(),
            symbol: signal.symbol.clone(),
            side: signal.direction,
            quantity,
            entry_price: signal.entry,
            leverage: account.policy.leverage,
            notional_usd: _notional,
            stop_loss: signal.stop_loss,
            take_profit: signal.tp1,
            market_type,
            status: OrderStatus::Pending,
            exchange_order_id: None,
            error_kind: None,
            error_message: None,
            pnl: None,
            created_at: chrono::Utc::now(),
            closed_at: None,
        });

        match client
            .submit_market_order(&signal.symbol, signal.direction, quantity, account.policy.leverage, self.exchange_call_timeout)
            .await
        {
            Ok(ack) => {
                self.orders.update_order_status(order_id, OrderStatus::Filled, Some(ack.order_id.clone()), None, None);
                self.notifier
                    .publish_order_event(OrderEvent {
                        group_id: signal.group_id,
                        account_id: account_id.to_string(),
                        symbol: signal.symbol.clone(),
                        status: OrderStatus::Filled,
                        exchange_order_id: Some(ack.order_id.clone()),
                        error_kind: None,
                    })
                    .await;
                PerAccountOutcome {
                    account_id: account_id.to_string(),
                    status: OrderStatus::Filled,
                    order_id: Some(ack.order_id),
                    error_kind: None,
                }
            }
            Err(err) => {
                let kind = map_exchange_error(&err);
                self.orders.update_order_status(order_id, OrderStatus::Failed, None, Some(kind), Some(err.to_string()));
                self.notify_failure(signal, account_id, kind).await;
                PerAccountOutcome { account_id: account_id.to_string(), status: OrderStatus::Failed, order_id: None, error_kind: Some(kind) }
            }
        }
    }

    /// (§4.4 protocol step 2) routes a `both`-type account to SPOT when the
    /// signal is high-confidence, low-volatility, and on a higher timeframe;
    /// futures otherwise. Explicit account market types are respected as-is.
    fn choose_market(&self, account_market: &MarketType, signal: &Signal, volatility_24h: f64) -> MarketType {
        match account_market {
            MarketType::Both => {
                if signal.score >= SPOT_SCORE_THRESHOLD
                    && volatility_24h <= SPOT_VOLATILITY_CEILING
                    && SPOT_TIMEFRAMES.contains(&signal.timeframe.as_str())
                {
                    MarketType::Spot
                } else {
                    MarketType::Futures
                }
            }
            other => *other,
        }
    }

    async fn fail(
        &self,
        signal: &Signal,
        account_id: &str,
        kind: OrderErrorKind,
        reason: impl Into<String>,
    ) -> PerAccountOutcome {
        let reason = reason.into();
        warn!(account_id, symbol = %signal.symbol, %reason, ?kind, "account execution failed before submission");
        self.notify_failure(signal, account_id, kind).await;
        PerAccountOutcome { account_id: account_id.to_string(), status: OrderStatus::Failed, order_id: None, error_kind: Some(kind) }
    }

    async fn notify_failure(&self, signal: &Signal, account_id: &str, kind: OrderErrorKind) {
        self.notifier
            .publish_order_event(OrderEvent {
                group_id: signal.group_id,
                account_id: account_id.to_string(),
                symbol: signal.symbol.clone(),
                status: OrderStatus::Failed,
                exchange_order_id: None,
                error_kind: Some(kind),
            })
            .await;
    }
}

fn map_exchange_error(err: &ExchangeError) -> OrderErrorKind {
    match err {
        ExchangeError::InsufficientBalance => OrderErrorKind::InsufficientBalance,
        ExchangeError::InvalidSymbol(_) => OrderErrorKind::InvalidSymbol,
        ExchangeError::InvalidApiKey => OrderErrorKind::InvalidApiKey,
        ExchangeError::RateLimited => OrderErrorKind::RateLimited,
        ExchangeError::ExchangeReject(_) => OrderErrorKind::ExchangeReject,
        ExchangeError::NetworkTimeout => OrderErrorKind::NetworkTimeout,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{Account, AccountPolicy, AccountState, InMemoryAccountStore};
    use crate::exchange::{ExchangeClient, ExchangePosition, OrderAck, QuoteBalance, SymbolInfo};
    use crate::notifier::LoggingNotifier;
    use crate::order::InMemoryOrderStore;
    use crate::signal::{ConfluenceFlags, MarketRegime, SignalContext, SignalStatus};
    use crate::types::{AccountMode, Direction, SizingMode};

    struct StubClient {
        balance: f64,
        fail_order: bool,
        hang: bool,
    }

    #[async_trait::async_trait]
    impl ExchangeClient for StubClient {
        async fn fetch_balance(&self, _q: &str, _d: Duration) -> Result<QuoteBalance, ExchangeError> {
            if self.hang {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(QuoteBalance { free: self.balance, used: 0.0, total: self.balance })
        }
        async fn fetch_mark_price(&self, _s: &str, _d: Duration) -> Result<f64, ExchangeError> {
            Ok(100.0)
        }
        async fn submit_market_order(
            &self,
            _s: &str,
            _side: Direction,
            quantity: f64,
            _l: u32,
            _d: Duration,
        ) -> Result<OrderAck, ExchangeError> {
            if self.fail_order {
                Err(ExchangeError::InsufficientBalance)
            } else {
                Ok(OrderAck { order_id: "ex-1".into(), filled_price: 100.0, filled_qty: quantity })
            }
        }
        async fn fetch_open_positions(&self, _d: Duration) -> Result<Vec<ExchangePosition>, ExchangeError> {
            Ok(vec![])
        }
        async fn exchange_info(&self, _s: &str, _d: Duration) -> Result<SymbolInfo, ExchangeError> {
            Ok(SymbolInfo { tick_size: 0.01, lot_step: 0.0001, min_notional: 10.0 })
        }
    }

    struct FixedCtx;
    impl ExecutorContext for FixedCtx {
        fn win_rate(&self, _account_id: &str) -> f64 {
            0.5
        }
        fn avg_win_loss_ratio(&self, _account_id: &str) -> f64 {
            1.5
        }
    }

    fn account(id: &str) -> Account {
        Account {
            id: id.to_string(),
            display_name: "t".into(),
            market_type: MarketType::Spot,
            mode: AccountMode::Demo,
            policy: AccountPolicy {
                max_position_size_usd: 1000.0,
                leverage: 1,
                max_daily_trades: 10,
                max_risk_per_trade: 0.5,
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

    fn signal() -> Signal {
        Signal {
            id: Uuid::new_v4(),
            group_id: Uuid::new_v4(),
            symbol: "BTCUSDT".into(),
            timeframe: "1h".into(),
            direction: Direction::Long,
            score: 0.8,
            entry: 100.0,
            stop_loss: 90.0,
            tp1: 110.0,
            tp2: 120.0,
            tp3: 130.0,
            confluence: ConfluenceFlags::default(),
            context: SignalContext { regime: MarketRegime::Trending, risk_reward: 1.6, indicators: serde_json::Value::Null },
            status: SignalStatus::Active,
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn successful_fill_marks_order_filled() {
        let accounts = Arc::new(InMemoryAccountStore::new());
        accounts.register(account("a1"), Arc::new(StubClient { balance: 5000.0, fail_order: false, hang: false }));
        let orders = Arc::new(InMemoryOrderStore::new());
        let executor = MultiAccountExecutor::new(
            accounts,
            orders.clone(),
            Arc::new(LoggingNotifier),
            Duration::from_secs(5),
            Duration::from_secs(5),
        );

        let summary = executor.execute_on_all(&signal(), 0.05, &FixedCtx).await;
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 0);
    }

    #[tokio::test]
    async fn exchange_rejection_marks_order_failed_with_kind() {
        let accounts = Arc::new(InMemoryAccountStore::new());
        accounts.register(account("a1"), Arc::new(StubClient { balance: 5000.0, fail_order: true, hang: false }));
        let orders = Arc::new(InMemoryOrderStore::new());
        let executor = MultiAccountExecutor::new(
            accounts,
            orders,
            Arc::new(LoggingNotifier),
            Duration::from_secs(5),
            Duration::from_secs(5),
        );

        let summary = executor.execute_on_all(&signal(), 0.05, &FixedCtx).await;
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.per_account[0].error_kind, Some(OrderErrorKind::InsufficientBalance));
    }

    #[tokio::test]
    async fn overrunning_account_marked_timeout_without_erasing_peers() {
        let accounts = Arc::new(InMemoryAccountStore::new());
        accounts.register(account("slow"), Arc::new(StubClient { balance: 5000.0, fail_order: false, hang: true }));
        accounts.register(account("fast"), Arc::new(StubClient { balance: 5000.0, fail_order: false, hang: false }));
        let orders = Arc::new(InMemoryOrderStore::new());
        let executor = MultiAccountExecutor::new(
            accounts,
            orders,
            Arc::new(LoggingNotifier),
            Duration::from_millis(50),
            Duration::from_secs(5),
        );

        let summary = executor.execute_on_all(&signal(), 0.05, &FixedCtx).await;
        assert_eq!(summary.total_accounts, 2);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        let slow = summary.per_account.iter().find(|o| o.account_id == "slow").unwrap();
        assert_eq!(slow.status, OrderStatus::Failed);
        assert_eq!(slow.error_kind, Some(OrderErrorKind::Timeout));
        let fast = summary.per_account.iter().find(|o| o.account_id == "fast").unwrap();
        assert_eq!(fast.status, OrderStatus::Filled);
    }

    #[tokio::test]
    async fn idempotent_retry_skips_terminal_pair() {
        let accounts = Arc::new(InMemoryAccountStore::new());
        accounts.register(account("a1"), Arc::new(StubClient { balance: 5000.0, fail_order: false, hang: false }));
        let orders = Arc::new(InMemoryOrderStore::new());
        let executor = MultiAccountExecutor::new(
            accounts,
            orders.clone(),
            Arc::new(LoggingNotifier),
            Duration::from_secs(5),
            Duration::from_secs(5),
        );

        let sig = signal();
        executor.execute_on_all(&sig, 0.05, &FixedCtx).await;
        let first_count = orders.list_by_group(sig.group_id).len();
        executor.execute_on_all(&sig, 0.05, &FixedCtx).await;
        let second_count = orders.list_by_group(sig.group_id).len();
        assert_eq!(first_count, second_count, "retry must not insert a second order for the same pair");
    }
}
