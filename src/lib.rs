//! Gift-Card Checkout Orchestration Core
//!
//! The hard part of a digital gift-card storefront is not the UI: it is
//! turning "the buyer picked a settlement rail" into "the buyer holds
//! working keys" without webhooks, with an external ledger as the only
//! source of payment truth, and with a fulfillment call that can partially
//! fail. This crate owns exactly that slice:
//!
//! - [`services::PaymentIntentService`] creates one rail-specific payment
//!   descriptor per checkout (deposit address, bank transfer, virtual card).
//! - [`services::SettlementWatcher`] confirms crypto payments by comparing
//!   two reads of the provider's cumulative-spend counter against the
//!   required amount.
//! - [`services::FulfillmentService`] registers the order idempotently and
//!   normalizes the backend's delivery report, partial failures included.
//! - [`services::CheckoutStateMachine`] sequences the three and publishes
//!   every state transition to the presentation layer.
//!
//! Catalog, cart, auth, invoice rendering, and email delivery are external
//! collaborators consumed through the trait seams in [`clients`].
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod clients;
pub mod config;
pub mod errors;
pub mod events;
pub mod models;
pub mod services;

pub use config::{init_tracing, load_config, CheckoutConfig};
pub use errors::CheckoutError;
pub use events::{CheckoutEvent, EventSender};
pub use models::{
    BuyerContext, CheckoutSession, FulfillmentResult, GiftCardKey, LineItem, PaymentIntent,
    PaymentRail, RailDetails, SettlementObservation,
};
pub use services::{
    CheckoutOutcome, CheckoutState, CheckoutStateMachine, FulfillmentService, PaymentIntentService,
    SettlementOutcome, SettlementWatcher, WatcherConfig,
};
