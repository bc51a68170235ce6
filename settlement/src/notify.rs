//! Settlement notifications
//!
//! Fire-and-forget: delivery of notifications is best-effort and never
//! affects whether a settlement commits. Failures are logged and dropped.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validation_core::types::ActorId;

/// Notification intents emitted after a settlement commits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    /// Delivery reached a terminal success state
    DeliveryCompleted {
        /// Actor to notify
        recipient: ActorId,
        /// Settled delivery
        delivery_id: Uuid,
        /// Whether issues were reported at hand-off
        with_issues: bool,
    },

    /// Commission was credited to a courier's wallet
    CommissionPaid {
        /// Courier credited
        recipient: ActorId,
        /// Delivery that earned it
        delivery_id: Uuid,
        /// Credited amount
        amount: Decimal,
    },
}

/// Outbound notification channel
pub trait Notifier: Send + Sync {
    /// Dispatch one notification. Implementations must not block settlement
    /// and must swallow their own delivery failures.
    fn notify(&self, notification: Notification);
}

/// Notifier that emits structured log events instead of delivering anywhere
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: Notification) {
        match &notification {
            Notification::DeliveryCompleted {
                recipient,
                delivery_id,
                with_issues,
            } => {
                tracing::info!(
                    recipient = %recipient,
                    delivery_id = %delivery_id,
                    with_issues,
                    "Delivery completed"
                );
            }
            Notification::CommissionPaid {
                recipient,
                delivery_id,
                amount,
            } => {
                tracing::info!(
                    recipient = %recipient,
                    delivery_id = %delivery_id,
                    amount = %amount,
                    "Commission paid"
                );
            }
        }
    }
}
