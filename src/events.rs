//! Checkout events published to the presentation layer.
//!
//! The state machine owns all side effects; the UI is reduced to a
//! subscriber of these transitions. Delivery is best-effort: a full or
//! closed channel is logged and never fails the checkout itself.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

use crate::models::PaymentIntent;
use crate::services::checkout::CheckoutState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CheckoutEvent {
    /// The session moved from one state to another.
    StateChanged {
        order_id: String,
        from: CheckoutState,
        to: CheckoutState,
    },
    /// A payment intent exists; the UI can render payment instructions.
    PaymentInstructionsReady {
        order_id: String,
        intent: PaymentIntent,
    },
    /// The watcher confirmed settlement with this delta.
    SettlementConfirmed {
        order_id: String,
        delta: Decimal,
        required: Decimal,
    },
    /// Keys were delivered. `email_sent = false` means partial delivery:
    /// the keys must be rendered inline.
    KeysDelivered {
        order_id: String,
        key_count: usize,
        email_sent: bool,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<CheckoutEvent>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<CheckoutEvent>) -> Self {
        Self { sender }
    }

    pub async fn send(&self, event: CheckoutEvent) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send checkout event: {}", e))
    }

    /// Sends and logs instead of propagating: event delivery must never
    /// fail the checkout flow itself.
    pub async fn publish(&self, event: CheckoutEvent) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "Dropping checkout event, subscriber gone or lagging");
        }
    }
}

/// Creates the event channel the presentation layer subscribes to.
pub fn channel(buffer: usize) -> (EventSender, mpsc::Receiver<CheckoutEvent>) {
    let (tx, rx) = mpsc::channel(buffer);
    (EventSender::new(tx), rx)
}
