use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::instrument;
use uuid::Uuid;

use crate::errors::CheckoutError;
use crate::models::fulfillment::WireGiftCardKey;

/// The fulfillment backend exposes a single order-registration POST. It
/// allocates gift-card keys idempotently, keyed on the caller-supplied
/// order id, and reports delivery status in the same response.
#[async_trait]
pub trait FulfillmentApi: Send + Sync {
    async fn register_order(
        &self,
        request: &RegisterOrderRequest,
    ) -> Result<RegisterOrderResponse, CheckoutError>;
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterOrderRequest {
    /// Idempotency key. Identical across retries of the same logical order;
    /// the backend deduplicates on it.
    pub order_id: String,
    pub buyer: BuyerPayload,
    pub line_items: Vec<LineItemPayload>,
    pub totals: TotalsPayload,
    pub payment_method: String,
    pub payment_data: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuyerPayload {
    pub buyer_id: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItemPayload {
    pub product_id: Uuid,
    pub external_id: String,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TotalsPayload {
    pub total_amount: Decimal,
    pub settlement_amount: Decimal,
}

/// Raw backend response. `keys` arrives under either field name and with
/// mixed element shapes; normalization into [`crate::models::GiftCardKey`]
/// happens in the fulfillment service, not here.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterOrderResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, alias = "giftCardKeys")]
    pub keys: Vec<WireGiftCardKey>,
    #[serde(default)]
    pub email_sent: bool,
    #[serde(default)]
    pub email_error: Option<String>,
    #[serde(default)]
    pub invoice_url: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// reqwest-backed fulfillment client.
#[derive(Debug, Clone)]
pub struct HttpFulfillmentClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpFulfillmentClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, CheckoutError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl FulfillmentApi for HttpFulfillmentClient {
    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn register_order(
        &self,
        request: &RegisterOrderRequest,
    ) -> Result<RegisterOrderResponse, CheckoutError> {
        let response = self
            .http
            .post(format!("{}/orders", self.base_url))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<RegisterOrderResponse>().await?);
        }

        // Failure bodies still follow the response schema when the backend
        // produced them itself; keep the literal error text where it exists.
        let body = response.json::<RegisterOrderResponse>().await.ok();
        resolve_failure_body(status, body)
    }
}

/// A failure body is only trusted when it names its failure. An empty or
/// message-less body would collapse into a generic reason downstream, so
/// the HTTP status is kept instead.
fn resolve_failure_body(
    status: reqwest::StatusCode,
    body: Option<RegisterOrderResponse>,
) -> Result<RegisterOrderResponse, CheckoutError> {
    match body {
        Some(body) if body.error.is_some() || body.message.is_some() => Ok(body),
        _ => Err(CheckoutError::fulfillment(format!(
            "Fulfillment backend returned {}",
            status
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_accepts_gift_card_keys_alias() {
        let json = r#"{
            "success": true,
            "giftCardKeys": ["AAAA-1111"],
            "emailSent": true,
            "invoiceUrl": "https://shop.example.com/invoices/1.pdf"
        }"#;
        let response: RegisterOrderResponse = serde_json::from_str(json).expect("response");
        assert!(response.success);
        assert_eq!(response.keys.len(), 1);
        assert_eq!(
            response.invoice_url.as_deref(),
            Some("https://shop.example.com/invoices/1.pdf")
        );
    }

    #[test]
    fn missing_fields_default() {
        let response: RegisterOrderResponse =
            serde_json::from_str(r#"{"success": false, "error": "insufficient inventory"}"#)
                .expect("response");
        assert!(!response.success);
        assert!(response.keys.is_empty());
        assert!(!response.email_sent);
        assert_eq!(response.error.as_deref(), Some("insufficient inventory"));
    }

    #[test]
    fn failure_body_with_error_text_is_kept() {
        let body: RegisterOrderResponse =
            serde_json::from_str(r#"{"success": false, "error": "insufficient inventory"}"#)
                .expect("body");
        let kept = resolve_failure_body(reqwest::StatusCode::CONFLICT, Some(body)).expect("kept");
        assert!(!kept.success);
        assert_eq!(kept.error.as_deref(), Some("insufficient inventory"));
    }

    #[test]
    fn message_less_failure_body_falls_back_to_the_status() {
        let body: RegisterOrderResponse = serde_json::from_str("{}").expect("body");
        let err = resolve_failure_body(reqwest::StatusCode::BAD_GATEWAY, Some(body))
            .expect_err("no failure context");
        assert!(err.to_string().contains("502"));

        let err = resolve_failure_body(reqwest::StatusCode::BAD_GATEWAY, None)
            .expect_err("unparseable body");
        assert!(err.to_string().contains("502"));
    }

    #[test]
    fn request_serializes_camel_case() {
        let request = RegisterOrderRequest {
            order_id: "ORD-1".to_string(),
            buyer: BuyerPayload {
                buyer_id: "u1".to_string(),
                email: "buyer@example.com".to_string(),
            },
            line_items: vec![],
            totals: TotalsPayload {
                total_amount: Decimal::new(2425, 2),
                settlement_amount: Decimal::new(2425, 2),
            },
            payment_method: "crypto".to_string(),
            payment_data: serde_json::json!({}),
        };
        let value = serde_json::to_value(&request).expect("serialize");
        assert_eq!(value["orderId"], "ORD-1");
        assert!(value.get("lineItems").is_some());
        assert!(value["totals"].get("settlementAmount").is_some());
    }
}
