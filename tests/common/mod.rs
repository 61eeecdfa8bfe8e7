//! Shared test doubles: in-memory stand-ins for the payment provider and
//! the fulfillment backend, scriptable per test.
#![allow(dead_code)]

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use giftcard_checkout::clients::{
    BankTransferRequest, BankTransferResource, CardIssuanceRequest, CardResource, FulfillmentApi,
    PaymentProviderApi, RegisterOrderRequest, RegisterOrderResponse, WalletInfo,
};
use giftcard_checkout::errors::CheckoutError;
use giftcard_checkout::models::fulfillment::WireGiftCardKey;

/// Scriptable payment provider. Spend reads are served from a queue; once
/// the queue drains, the last value repeats (the counter is monotone and
/// simply stops moving).
pub struct MockPaymentProvider {
    wallet: Option<WalletInfo>,
    transfer_rejection: Option<String>,
    spend: Mutex<SpendScript>,
    pub spend_calls: AtomicUsize,
    pub transfers_created: AtomicUsize,
    pub cards_issued: AtomicUsize,
}

struct SpendScript {
    reads: VecDeque<Decimal>,
    last: Decimal,
}

impl MockPaymentProvider {
    pub fn new() -> Self {
        Self {
            wallet: Some(WalletInfo {
                address: "0x742d35Cc6634C0532925a3b844Bc9e7595f0bEb".to_string(),
                network: "base".to_string(),
            }),
            transfer_rejection: None,
            spend: Mutex::new(SpendScript {
                reads: VecDeque::new(),
                last: Decimal::ZERO,
            }),
            spend_calls: AtomicUsize::new(0),
            transfers_created: AtomicUsize::new(0),
            cards_issued: AtomicUsize::new(0),
        }
    }

    pub fn without_wallet(mut self) -> Self {
        self.wallet = None;
        self
    }

    pub fn with_transfer_rejection(mut self, message: &str) -> Self {
        self.transfer_rejection = Some(message.to_string());
        self
    }

    /// First read serves the baseline, subsequent reads serve poll samples.
    pub fn with_spend_reads(self, reads: Vec<Decimal>) -> Self {
        {
            let mut script = self.spend.lock().unwrap();
            script.last = reads.last().copied().unwrap_or(Decimal::ZERO);
            script.reads = reads.into();
        }
        self
    }

    pub fn spend_call_count(&self) -> usize {
        self.spend_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentProviderApi for MockPaymentProvider {
    async fn lookup_wallet(
        &self,
        _buyer_id: &str,
        _currency: &str,
    ) -> Result<Option<WalletInfo>, CheckoutError> {
        Ok(self.wallet.clone())
    }

    async fn create_bank_transfer(
        &self,
        request: &BankTransferRequest,
    ) -> Result<BankTransferResource, CheckoutError> {
        if let Some(message) = &self.transfer_rejection {
            return Err(CheckoutError::ProviderRejected(message.clone()));
        }
        self.transfers_created.fetch_add(1, Ordering::SeqCst);
        Ok(BankTransferResource {
            transfer_id: "tr-0001".to_string(),
            iban: request.iban.clone(),
        })
    }

    async fn issue_card(
        &self,
        _request: &CardIssuanceRequest,
    ) -> Result<CardResource, CheckoutError> {
        self.cards_issued.fetch_add(1, Ordering::SeqCst);
        Ok(CardResource {
            card_id: "card-0001".to_string(),
            masked_pan: "**** **** **** 4242".to_string(),
            expires_at: None,
        })
    }

    async fn cumulative_spend(&self, _buyer_id: &str) -> Result<Decimal, CheckoutError> {
        self.spend_calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.spend.lock().unwrap();
        let value = script.reads.pop_front().unwrap_or(script.last);
        script.last = value;
        Ok(value)
    }
}

/// What the scripted fulfillment backend should report.
pub enum FulfillmentScript {
    /// Allocate one key per line item, idempotently per order id.
    Success {
        email_sent: bool,
        email_error: Option<String>,
        message: Option<String>,
    },
    Failure { error: String },
}

/// In-memory fulfillment backend. Deduplicates on order id the way the real
/// backend does: keys are allocated at most once per id, and identical
/// retries get the same set back.
pub struct MockFulfillmentBackend {
    script: FulfillmentScript,
    allocated: Mutex<HashMap<String, Vec<String>>>,
    pub requests: Mutex<Vec<RegisterOrderRequest>>,
    pub allocations: AtomicUsize,
}

impl MockFulfillmentBackend {
    pub fn succeeding() -> Self {
        Self::scripted(FulfillmentScript::Success {
            email_sent: true,
            email_error: None,
            message: None,
        })
    }

    pub fn scripted(script: FulfillmentScript) -> Self {
        Self {
            script,
            allocated: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            allocations: AtomicUsize::new(0),
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn allocation_count(&self) -> usize {
        self.allocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FulfillmentApi for MockFulfillmentBackend {
    async fn register_order(
        &self,
        request: &RegisterOrderRequest,
    ) -> Result<RegisterOrderResponse, CheckoutError> {
        self.requests.lock().unwrap().push(request.clone());

        match &self.script {
            FulfillmentScript::Failure { error } => Ok(RegisterOrderResponse {
                success: false,
                keys: vec![],
                email_sent: false,
                email_error: None,
                invoice_url: None,
                message: None,
                error: Some(error.clone()),
            }),
            FulfillmentScript::Success {
                email_sent,
                email_error,
                message,
            } => {
                let mut allocated = self.allocated.lock().unwrap();
                let codes = allocated
                    .entry(request.order_id.clone())
                    .or_insert_with(|| {
                        self.allocations.fetch_add(1, Ordering::SeqCst);
                        request
                            .line_items
                            .iter()
                            .enumerate()
                            .map(|(i, _)| format!("KEY-{}-{}", request.order_id, i + 1))
                            .collect()
                    })
                    .clone();
                Ok(RegisterOrderResponse {
                    success: true,
                    keys: codes.into_iter().map(WireGiftCardKey::Bare).collect(),
                    email_sent: *email_sent,
                    email_error: email_error.clone(),
                    invoice_url: Some("https://shop.example.com/invoices/1.pdf".to_string()),
                    message: message.clone(),
                    error: None,
                })
            }
        }
    }
}
