// =============================================================================
// Notifier — best-effort event publication (§6.6)
// =============================================================================
//
// Failures here never block or fail a cycle; they are logged and swallowed.
// No ordering guarantee is made between events.
// =============================================================================

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::executor::Summary;
use crate::order::{OrderErrorKind, OrderStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderEvent {
    pub group_id: Uuid,
    pub account_id: String,
    pub symbol: String,
    pub status: OrderStatus,
    pub exchange_order_id: Option<String>,
    pub error_kind: Option<OrderErrorKind>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish_order_event(&self, event: OrderEvent);

    async fn publish_summary(&self, summary: Summary);
}

/// Logs every event at `info`/`warn` and otherwise does nothing. Stands in
/// for a real sink (webhook, message bus) the way the teacher's codebase
/// treats alerting as a pluggable, best-effort concern.
#[derive(Default)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn publish_order_event(&self, event: OrderEvent) {
        match event.status {
            OrderStatus::Failed => {
                warn!(
                    account_id = %event.account_id,
                    symbol = %event.symbol,
                    error_kind = ?event.error_kind,
                    "order event: failed"
                );
            }
            _ => {
                tracing::info!(
                    account_id = %event.account_id,
                    symbol = %event.symbol,
                    status = ?event.status,
                    exchange_order_id = ?event.exchange_order_id,
                    "order event"
                );
            }
        }
    }

    async fn publish_summary(&self, summary: Summary) {
        tracing::info!(
            group_id = %summary.group_id,
            total = summary.total_accounts,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "cycle summary"
        );
    }
}
