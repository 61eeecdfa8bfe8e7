use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Product name used when the fulfillment backend returns a bare key with no
/// product metadata attached.
pub const FALLBACK_PRODUCT_NAME: &str = "Gift Card";

/// A delivered gift-card key, normalized at the engine boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GiftCardKey {
    pub code: String,
    pub product_id: Uuid,
    pub product_name: String,
}

/// Key payload as it appears on the wire. The fulfillment backend returns
/// either bare code strings or structured records; both normalize into
/// [`GiftCardKey`] so callers never branch on shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireGiftCardKey {
    Structured {
        code: String,
        #[serde(default, rename = "productId")]
        product_id: Option<Uuid>,
        #[serde(default, rename = "productName")]
        product_name: Option<String>,
    },
    Bare(String),
}

impl From<WireGiftCardKey> for GiftCardKey {
    fn from(wire: WireGiftCardKey) -> Self {
        match wire {
            WireGiftCardKey::Structured {
                code,
                product_id,
                product_name,
            } => Self {
                code,
                product_id: product_id.unwrap_or_else(Uuid::nil),
                product_name: product_name
                    .filter(|name| !name.trim().is_empty())
                    .unwrap_or_else(|| FALLBACK_PRODUCT_NAME.to_string()),
            },
            WireGiftCardKey::Bare(code) => Self {
                code,
                product_id: Uuid::nil(),
                product_name: FALLBACK_PRODUCT_NAME.to_string(),
            },
        }
    }
}

/// Terminal artifact of order fulfillment. Created once per order id and
/// immutable thereafter; the state machine surfaces it without mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FulfillmentResult {
    pub success: bool,
    pub keys: Vec<GiftCardKey>,
    pub email_sent: bool,
    pub email_error: Option<String>,
    pub invoice_url: Option<String>,
    pub delivery_message: String,
    pub error: Option<String>,
}

impl FulfillmentResult {
    /// Keys were issued but the notification email failed. Still a
    /// successful fulfillment; the keys must be rendered to the buyer.
    pub fn is_partial_delivery(&self) -> bool {
        self.success && !self.email_sent
    }
}
