use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

use crate::errors::CheckoutError;

/// The slice of the multi-rail payment provider API this core consumes:
/// custodial wallet lookup, SEPA transfer creation, virtual card issuance,
/// and the per-buyer cumulative-spend counter the settlement watcher samples.
#[async_trait]
pub trait PaymentProviderApi: Send + Sync {
    /// Custodial settlement address for the buyer and currency, if one is
    /// provisioned. `None` means provisioning has to happen out-of-band.
    async fn lookup_wallet(
        &self,
        buyer_id: &str,
        currency: &str,
    ) -> Result<Option<WalletInfo>, CheckoutError>;

    /// Creates a bank transfer resource. Exactly one provider-side resource
    /// per successful call.
    async fn create_bank_transfer(
        &self,
        request: &BankTransferRequest,
    ) -> Result<BankTransferResource, CheckoutError>;

    /// Issues an instant virtual card.
    async fn issue_card(&self, request: &CardIssuanceRequest)
        -> Result<CardResource, CheckoutError>;

    /// Current value of the buyer's monotonically increasing spend counter,
    /// in rail-native units.
    async fn cumulative_spend(&self, buyer_id: &str) -> Result<Decimal, CheckoutError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletInfo {
    pub address: String,
    pub network: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BankTransferRequest {
    pub buyer_id: String,
    pub receiver_name: String,
    pub iban: String,
    pub amount: Decimal,
    /// Transfer reference shown on the buyer's bank statement; the order id.
    pub reference: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BankTransferResource {
    pub transfer_id: String,
    pub iban: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CardIssuanceRequest {
    pub buyer_id: String,
    pub pin: String,
    pub label: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardResource {
    pub card_id: String,
    pub masked_pan: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Error body the provider returns on rejection. Either field may carry the
/// message; it is surfaced to the buyer verbatim.
#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpendResponse {
    cumulative_spend: Decimal,
}

/// reqwest-backed provider client.
#[derive(Debug, Clone)]
pub struct HttpPaymentProviderClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpPaymentProviderClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, CheckoutError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Turns a non-success response into a rejection carrying the
    /// provider's message unmodified.
    async fn rejection(response: reqwest::Response) -> CheckoutError {
        let status = response.status();
        match response.json::<ProviderErrorBody>().await {
            Ok(body) => CheckoutError::ProviderRejected(
                body.message
                    .or(body.error)
                    .unwrap_or_else(|| format!("Payment provider returned {}", status)),
            ),
            Err(_) => {
                CheckoutError::ProviderRejected(format!("Payment provider returned {}", status))
            }
        }
    }
}

#[async_trait]
impl PaymentProviderApi for HttpPaymentProviderClient {
    #[instrument(skip(self))]
    async fn lookup_wallet(
        &self,
        buyer_id: &str,
        currency: &str,
    ) -> Result<Option<WalletInfo>, CheckoutError> {
        let url = self.url(&format!("/users/{}/wallets/{}", buyer_id, currency));
        let response = self.http.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            debug!(buyer_id, currency, "No custodial wallet provisioned");
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }
        Ok(Some(response.json::<WalletInfo>().await?))
    }

    #[instrument(skip(self, request), fields(reference = %request.reference))]
    async fn create_bank_transfer(
        &self,
        request: &BankTransferRequest,
    ) -> Result<BankTransferResource, CheckoutError> {
        let response = self
            .http
            .post(self.url("/bank-transfers"))
            .json(request)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }
        Ok(response.json::<BankTransferResource>().await?)
    }

    #[instrument(skip(self, request), fields(buyer_id = %request.buyer_id))]
    async fn issue_card(
        &self,
        request: &CardIssuanceRequest,
    ) -> Result<CardResource, CheckoutError> {
        let response = self
            .http
            .post(self.url("/cards"))
            .json(request)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }
        Ok(response.json::<CardResource>().await?)
    }

    #[instrument(skip(self))]
    async fn cumulative_spend(&self, buyer_id: &str) -> Result<Decimal, CheckoutError> {
        let url = self.url(&format!("/users/{}/spend", buyer_id));
        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }
        let body = response.json::<SpendResponse>().await?;
        Ok(body.cumulative_spend)
    }
}
