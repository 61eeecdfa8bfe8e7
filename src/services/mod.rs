// Core services
pub mod checkout;
pub mod fulfillment;
pub mod payment_intents;
pub mod settlement_watcher;

pub use checkout::{CheckoutOutcome, CheckoutState, CheckoutStateMachine};
pub use fulfillment::{FulfillmentService, PaymentRecord};
pub use payment_intents::PaymentIntentService;
pub use settlement_watcher::{SettlementOutcome, SettlementWatcher, WatcherConfig};
