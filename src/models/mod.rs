//! Domain model for the checkout orchestration core.
//!
//! A [`CheckoutSession`] is the unit of work: one cart-to-purchase attempt,
//! identified by a caller-generated `order_id` that doubles as the
//! idempotency key for the whole flow. The session is owned exclusively by
//! the checkout state machine; every other component receives copies of the
//! data it needs and returns results instead of mutating shared state.

pub mod fulfillment;
pub mod intent;

pub use fulfillment::{FulfillmentResult, GiftCardKey};
pub use intent::{PaymentIntent, SettlementObservation};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Settlement method selected by the buyer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentRail {
    Crypto,
    SepaTransfer,
    VirtualCard,
}

impl std::fmt::Display for PaymentRail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Crypto => write!(f, "crypto"),
            Self::SepaTransfer => write!(f, "sepa_transfer"),
            Self::VirtualCard => write!(f, "virtual_card"),
        }
    }
}

/// A validated cart line, supplied by the external catalog/cart service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    pub product_id: Uuid,
    /// Identifier of the product in the external fulfillment catalog.
    pub external_id: String,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
}

impl LineItem {
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// Buyer identity as supplied by the external auth/session service.
///
/// Guest checkout is supported: `buyer_id` may be a synthetic identifier as
/// long as `email` is a deliverable address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuyerContext {
    pub buyer_id: String,
    pub email: String,
}

/// Rail-specific input collected on the payment method step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "rail", rename_all = "snake_case")]
pub enum RailDetails {
    /// Settle by on-chain stablecoin transfer into the buyer's custodial
    /// address for `currency` (e.g. "USDC").
    Crypto { currency: String },
    /// Settle by SEPA bank transfer to a provider-created transfer resource.
    SepaTransfer { receiver_name: String, iban: String },
    /// Settle by issuing an instant virtual card.
    VirtualCard { pin: String, label: String },
}

impl RailDetails {
    pub fn rail(&self) -> PaymentRail {
        match self {
            Self::Crypto { .. } => PaymentRail::Crypto,
            Self::SepaTransfer { .. } => PaymentRail::SepaTransfer,
            Self::VirtualCard { .. } => PaymentRail::VirtualCard,
        }
    }
}

/// One cart-to-purchase attempt.
///
/// Created when the buyer reaches the payment method step and discarded once
/// a terminal state is reached or the buyer abandons the flow. The line-item
/// list is immutable for the lifetime of the session.
#[derive(Debug, Clone)]
pub struct CheckoutSession {
    /// Caller-generated, globally unique. Used as the idempotency key for
    /// order fulfillment; never regenerated on retry.
    pub order_id: String,
    pub buyer: BuyerContext,
    pub rail_details: RailDetails,
    pub line_items: Vec<LineItem>,
    /// Fiat order total.
    pub total_amount: Decimal,
    /// Amount required on the selected rail, in rail-native units
    /// (e.g. stablecoin units for the crypto rail).
    pub required_settlement_amount: Decimal,
    pub created_at: DateTime<Utc>,
}

impl CheckoutSession {
    pub fn new(
        order_id: impl Into<String>,
        buyer: BuyerContext,
        rail_details: RailDetails,
        line_items: Vec<LineItem>,
        total_amount: Decimal,
        required_settlement_amount: Decimal,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            buyer,
            rail_details,
            line_items,
            total_amount,
            required_settlement_amount,
            created_at: Utc::now(),
        }
    }

    pub fn rail(&self) -> PaymentRail {
        self.rail_details.rail()
    }
}
