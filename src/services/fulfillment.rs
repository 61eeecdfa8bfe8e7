use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::clients::fulfillment::{
    BuyerPayload, FulfillmentApi, LineItemPayload, RegisterOrderRequest, RegisterOrderResponse,
    TotalsPayload,
};
use crate::errors::CheckoutError;
use crate::models::{CheckoutSession, FulfillmentResult, PaymentIntent, PaymentRail};

/// How the order was paid, attached to the fulfillment request for
/// invoicing and support lookups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub method: PaymentRail,
    pub data: serde_json::Value,
}

impl PaymentRecord {
    pub fn from_intent(rail: PaymentRail, intent: &PaymentIntent) -> Self {
        let data = match rail {
            PaymentRail::Crypto => json!({
                "settlementAddress": intent.destination,
                "network": intent.network,
            }),
            PaymentRail::SepaTransfer => json!({
                "transferId": intent.intent_id,
                "iban": intent.destination,
            }),
            PaymentRail::VirtualCard => json!({
                "cardId": intent.intent_id,
                "maskedPan": intent.destination,
            }),
        };
        Self { method: rail, data }
    }
}

/// Order fulfillment engine.
///
/// Submits exactly one registration request per invocation; idempotent key
/// allocation is the backend's job, keyed on the caller-supplied order id.
/// There is no local retry loop, and the order id is never regenerated:
/// retrying a network failure with the same arguments is always safe.
#[derive(Clone)]
pub struct FulfillmentService {
    backend: Arc<dyn FulfillmentApi>,
}

impl FulfillmentService {
    pub fn new(backend: Arc<dyn FulfillmentApi>) -> Self {
        Self { backend }
    }

    #[instrument(skip(self, session, payment), fields(order_id = %session.order_id))]
    pub async fn register_order(
        &self,
        session: &CheckoutSession,
        payment: &PaymentRecord,
    ) -> Result<FulfillmentResult, CheckoutError> {
        // Precondition failures never reach the network.
        if session.order_id.trim().is_empty() {
            return Err(CheckoutError::validation("Order id must not be empty"));
        }
        if session.line_items.is_empty() {
            return Err(CheckoutError::validation("Order has no line items"));
        }
        if !session.buyer.email.contains('@') {
            return Err(CheckoutError::validation(
                "A valid email address is required for delivery",
            ));
        }

        let request = build_request(session, payment);
        let response = self.backend.register_order(&request).await?;
        let result = normalize(response, &session.buyer.email);

        if result.success {
            info!(
                order_id = %session.order_id,
                key_count = result.keys.len(),
                email_sent = result.email_sent,
                "Order fulfilled"
            );
            if result.is_partial_delivery() {
                warn!(
                    order_id = %session.order_id,
                    email_error = result.email_error.as_deref().unwrap_or("unknown"),
                    "Keys issued but delivery email failed"
                );
            }
        } else {
            warn!(
                order_id = %session.order_id,
                error = result.error.as_deref().unwrap_or("unknown"),
                "Fulfillment backend rejected the order"
            );
        }

        Ok(result)
    }
}

/// Deterministic for a given session and payment record, so a retried call
/// carries byte-identical arguments under the same order id.
fn build_request(session: &CheckoutSession, payment: &PaymentRecord) -> RegisterOrderRequest {
    RegisterOrderRequest {
        order_id: session.order_id.clone(),
        buyer: BuyerPayload {
            buyer_id: session.buyer.buyer_id.clone(),
            email: session.buyer.email.clone(),
        },
        line_items: session
            .line_items
            .iter()
            .map(|item| LineItemPayload {
                product_id: item.product_id,
                external_id: item.external_id.clone(),
                name: item.name.clone(),
                quantity: item.quantity,
                unit_price: item.unit_price,
            })
            .collect(),
        totals: TotalsPayload {
            total_amount: session.total_amount,
            settlement_amount: session.required_settlement_amount,
        },
        payment_method: payment.method.to_string(),
        payment_data: payment.data.clone(),
    }
}

/// Collapses the backend's dual-shape key payload into structured keys and
/// fills in a delivery message when the backend sent none.
fn normalize(response: RegisterOrderResponse, buyer_email: &str) -> FulfillmentResult {
    let keys = response.keys.into_iter().map(Into::into).collect();
    let delivery_message = response.message.unwrap_or_else(|| {
        if response.email_sent {
            format!("Your gift card keys have been sent to {}", buyer_email)
        } else {
            "Your gift card keys are ready below".to_string()
        }
    });
    FulfillmentResult {
        success: response.success,
        keys,
        email_sent: response.email_sent,
        email_error: response.email_error,
        invoice_url: response.invoice_url,
        delivery_message,
        error: response.error,
    }
}
