//! HTTP clients for the external services this core consumes.
//!
//! Each client is a thin trait seam over one external API so the services
//! can be exercised against in-memory doubles in tests. The reqwest
//! implementations carry explicit timeouts from [`crate::config`].

pub mod fulfillment;
pub mod payment_provider;

pub use fulfillment::{
    FulfillmentApi, HttpFulfillmentClient, RegisterOrderRequest, RegisterOrderResponse,
};
pub use payment_provider::{
    BankTransferRequest, BankTransferResource, CardIssuanceRequest, CardResource,
    HttpPaymentProviderClient, PaymentProviderApi, WalletInfo,
};
