use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use validator::{Validate, ValidationError};

use crate::clients::payment_provider::{
    BankTransferRequest, CardIssuanceRequest, PaymentProviderApi,
};
use crate::errors::CheckoutError;
use crate::models::{CheckoutSession, PaymentIntent, RailDetails};

fn validate_iban(iban: &str) -> Result<(), ValidationError> {
    let normalized = normalize_iban(iban);
    let bytes = normalized.as_bytes();
    let shape_ok = (15..=34).contains(&bytes.len())
        && bytes[..2].iter().all(u8::is_ascii_uppercase)
        && bytes[2..4].iter().all(u8::is_ascii_digit)
        && bytes[4..].iter().all(u8::is_ascii_alphanumeric);
    if shape_ok {
        Ok(())
    } else {
        let mut err = ValidationError::new("invalid_iban");
        err.message = Some("Please enter a valid IBAN".into());
        Err(err)
    }
}

fn validate_card_pin(pin: &str) -> Result<(), ValidationError> {
    if pin.len() == 4 && pin.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("invalid_pin");
        err.message = Some("Card PIN must be exactly 4 digits".into());
        Err(err)
    }
}

/// Strips spaces and uppercases; IBANs are commonly pasted with grouping.
fn normalize_iban(iban: &str) -> String {
    iban.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase()
}

/// SEPA transfer input, validated before any provider call is made.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SepaIntentRequest {
    #[validate(length(min = 2, max = 70, message = "Receiver name must be 2-70 characters"))]
    pub receiver_name: String,
    #[validate(custom = "validate_iban")]
    pub iban: String,
}

/// Virtual card input, validated before any provider call is made.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CardIntentRequest {
    #[validate(custom = "validate_card_pin")]
    pub pin: String,
    #[validate(length(min = 3, max = 30, message = "Card label must be 3-30 characters"))]
    pub label: String,
}

/// PaymentIntent factory: one provider call per successful intent, zero on
/// validation failure. Retry policy belongs to the caller; nothing here
/// retries.
#[derive(Clone)]
pub struct PaymentIntentService {
    provider: Arc<dyn PaymentProviderApi>,
}

impl PaymentIntentService {
    pub fn new(provider: Arc<dyn PaymentProviderApi>) -> Self {
        Self { provider }
    }

    #[instrument(skip(self, session), fields(order_id = %session.order_id, rail = %session.rail()))]
    pub async fn create_intent(
        &self,
        session: &CheckoutSession,
    ) -> Result<PaymentIntent, CheckoutError> {
        match &session.rail_details {
            RailDetails::Crypto { currency } => self.crypto_intent(session, currency).await,
            RailDetails::SepaTransfer {
                receiver_name,
                iban,
            } => {
                let request = SepaIntentRequest {
                    receiver_name: receiver_name.trim().to_string(),
                    iban: normalize_iban(iban),
                };
                request.validate()?;
                self.sepa_intent(session, request).await
            }
            RailDetails::VirtualCard { pin, label } => {
                let request = CardIntentRequest {
                    pin: pin.clone(),
                    label: label.trim().to_string(),
                };
                request.validate()?;
                self.card_intent(session, request).await
            }
        }
    }

    /// Crypto settles into the buyer's existing custodial address; no
    /// provider resource is minted here.
    async fn crypto_intent(
        &self,
        session: &CheckoutSession,
        currency: &str,
    ) -> Result<PaymentIntent, CheckoutError> {
        let wallet = self
            .provider
            .lookup_wallet(&session.buyer.buyer_id, currency)
            .await?
            .ok_or_else(|| CheckoutError::NoWallet {
                currency: currency.to_string(),
            })?;

        info!(
            order_id = %session.order_id,
            network = %wallet.network,
            "Crypto settlement address resolved"
        );

        Ok(PaymentIntent {
            intent_id: wallet.address.clone(),
            destination: wallet.address,
            network: wallet.network,
            expires_at: None,
        })
    }

    async fn sepa_intent(
        &self,
        session: &CheckoutSession,
        request: SepaIntentRequest,
    ) -> Result<PaymentIntent, CheckoutError> {
        let resource = self
            .provider
            .create_bank_transfer(&BankTransferRequest {
                buyer_id: session.buyer.buyer_id.clone(),
                receiver_name: request.receiver_name,
                iban: request.iban,
                amount: session.total_amount,
                reference: session.order_id.clone(),
            })
            .await?;

        info!(
            order_id = %session.order_id,
            transfer_id = %resource.transfer_id,
            "Bank transfer resource created"
        );

        Ok(PaymentIntent {
            intent_id: resource.transfer_id,
            destination: resource.iban,
            network: "sepa".to_string(),
            expires_at: None,
        })
    }

    async fn card_intent(
        &self,
        session: &CheckoutSession,
        request: CardIntentRequest,
    ) -> Result<PaymentIntent, CheckoutError> {
        let card = self
            .provider
            .issue_card(&CardIssuanceRequest {
                buyer_id: session.buyer.buyer_id.clone(),
                pin: request.pin,
                label: request.label,
            })
            .await?;

        info!(
            order_id = %session.order_id,
            card_id = %card.card_id,
            "Virtual card issued"
        );

        Ok(PaymentIntent {
            intent_id: card.card_id,
            destination: card.masked_pan,
            network: "virtual_card".to_string(),
            expires_at: card.expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_iban() {
        assert!(validate_iban("DE89370400440532013000").is_ok());
        // Grouped lowercase input normalizes before the shape check.
        assert!(validate_iban(&normalize_iban("de89 3704 0044 0532 0130 00")).is_ok());
    }

    #[test]
    fn rejects_malformed_iban() {
        assert!(validate_iban("1234567890123456").is_err()); // no country code
        assert!(validate_iban("DEXX370400440532013000").is_err()); // letters as check digits
        assert!(validate_iban("DE8937").is_err()); // too short
    }

    #[test]
    fn pin_must_be_four_digits() {
        assert!(validate_card_pin("0412").is_ok());
        assert!(validate_card_pin("123").is_err());
        assert!(validate_card_pin("12345").is_err());
        assert!(validate_card_pin("12a4").is_err());
    }

    #[test]
    fn card_label_length_is_enforced() {
        let request = CardIntentRequest {
            pin: "1234".to_string(),
            label: "ab".to_string(),
        };
        assert!(request.validate().is_err());

        let request = CardIntentRequest {
            pin: "1234".to_string(),
            label: "everyday shopping".to_string(),
        };
        assert!(request.validate().is_ok());
    }
}
