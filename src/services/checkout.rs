//! Checkout state machine.
//!
//! Sequences intent creation, settlement watching, and order fulfillment
//! into the four-stage flow and owns every side effect along the way. The
//! session is mutated nowhere else; the factory, watcher, and engine get
//! copies of what they need and hand results back.
//!
//! Flow per rail:
//! - Crypto:      Review → MethodSelected → AwaitingSettlement → Fulfilling → Delivered
//! - VirtualCard: Review → MethodSelected → Fulfilling → Delivered
//!   (card issuance is the payment; no settlement watch)
//! - SEPA:        Review → MethodSelected → AwaitingSettlement → Processing
//!   (delivery is driven later by an external confirmation signal)
//!
//! `Failed` is terminal and reachable from every post-review stage, with the
//! failure reason preserved verbatim for display.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, instrument};

use crate::clients::{
    FulfillmentApi, HttpFulfillmentClient, HttpPaymentProviderClient, PaymentProviderApi,
};
use crate::config::CheckoutConfig;
use crate::errors::CheckoutError;
use crate::events::{CheckoutEvent, EventSender};
use crate::models::{
    CheckoutSession, FulfillmentResult, PaymentIntent, PaymentRail, SettlementObservation,
};
use crate::services::fulfillment::{FulfillmentService, PaymentRecord};
use crate::services::payment_intents::PaymentIntentService;
use crate::services::settlement_watcher::{SettlementOutcome, SettlementWatcher};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutState {
    Review,
    MethodSelected,
    AwaitingSettlement,
    /// Long-lived SEPA sub-state; the core does not poll it.
    Processing,
    Fulfilling,
    Delivered,
    Failed,
}

impl std::fmt::Display for CheckoutState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Review => "review",
            Self::MethodSelected => "method_selected",
            Self::AwaitingSettlement => "awaiting_settlement",
            Self::Processing => "processing",
            Self::Fulfilling => "fulfilling",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Externally observable result of one checkout run.
#[derive(Debug, Clone)]
pub enum CheckoutOutcome {
    /// Keys delivered (possibly partially: keys issued, email failed).
    Delivered(FulfillmentResult),
    /// SEPA transfer created; fulfillment is triggered later out-of-band.
    Processing,
    /// The watcher ceiling elapsed without detecting payment, or a re-check
    /// trigger was ignored because a poll is already in flight. Non-fatal;
    /// the buyer may re-check.
    SettlementPending,
    /// The buyer navigated away; the session is discarded.
    Abandoned,
    /// Terminal failure. The reason is the provider's or backend's message
    /// verbatim.
    Failed { reason: String },
}

#[derive(Clone)]
pub struct CheckoutStateMachine {
    intents: PaymentIntentService,
    watcher: SettlementWatcher,
    fulfillment: FulfillmentService,
    events: EventSender,
    /// Order ids with a settlement poll in flight. A second "check payment"
    /// trigger for the same session is ignored while its entry exists.
    in_flight: Arc<DashMap<String, ()>>,
}

impl CheckoutStateMachine {
    pub fn new(
        intents: PaymentIntentService,
        watcher: SettlementWatcher,
        fulfillment: FulfillmentService,
        events: EventSender,
    ) -> Self {
        Self {
            intents,
            watcher,
            fulfillment,
            events,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Wires the state machine against the HTTP clients described by
    /// `config`.
    pub fn from_config(
        config: &CheckoutConfig,
        events: EventSender,
    ) -> Result<Self, CheckoutError> {
        let provider: Arc<dyn PaymentProviderApi> = Arc::new(HttpPaymentProviderClient::new(
            config.provider_base_url.clone(),
            config.http_timeout(),
        )?);
        let backend: Arc<dyn FulfillmentApi> = Arc::new(HttpFulfillmentClient::new(
            config.fulfillment_base_url.clone(),
            config.http_timeout(),
        )?);
        Ok(Self::new(
            PaymentIntentService::new(Arc::clone(&provider)),
            SettlementWatcher::new(provider, config.watcher()),
            FulfillmentService::new(backend),
            events,
        ))
    }

    /// Drives one checkout session to its outcome, emitting every state
    /// transition on the event channel. `cancel` stops an in-flight
    /// settlement poll when the buyer navigates away.
    #[instrument(
        skip(self, session, cancel),
        fields(order_id = %session.order_id, rail = %session.rail())
    )]
    pub async fn run_checkout(
        &self,
        session: CheckoutSession,
        cancel: watch::Receiver<bool>,
    ) -> CheckoutOutcome {
        if let Err(err) = validate_session(&session) {
            return self
                .fail(&session.order_id, CheckoutState::Review, err.to_string())
                .await;
        }
        self.transition(
            &session.order_id,
            CheckoutState::Review,
            CheckoutState::MethodSelected,
        )
        .await;

        let intent = match self.intents.create_intent(&session).await {
            Ok(intent) => intent,
            Err(err) => {
                return self
                    .fail(&session.order_id, CheckoutState::MethodSelected, err.to_string())
                    .await;
            }
        };

        match session.rail() {
            PaymentRail::VirtualCard => {
                // Card issuance is the payment method becoming ready; go
                // straight to fulfillment without a single watcher sample.
                self.transition(
                    &session.order_id,
                    CheckoutState::MethodSelected,
                    CheckoutState::Fulfilling,
                )
                .await;
                let payment = PaymentRecord::from_intent(PaymentRail::VirtualCard, &intent);
                self.fulfill(&session, payment).await
            }
            PaymentRail::SepaTransfer => {
                self.events
                    .publish(CheckoutEvent::PaymentInstructionsReady {
                        order_id: session.order_id.clone(),
                        intent: intent.clone(),
                    })
                    .await;
                self.transition(
                    &session.order_id,
                    CheckoutState::MethodSelected,
                    CheckoutState::AwaitingSettlement,
                )
                .await;
                self.transition(
                    &session.order_id,
                    CheckoutState::AwaitingSettlement,
                    CheckoutState::Processing,
                )
                .await;
                info!(
                    order_id = %session.order_id,
                    transfer_id = %intent.intent_id,
                    "Bank transfer pending; fulfillment will be triggered out-of-band"
                );
                CheckoutOutcome::Processing
            }
            PaymentRail::Crypto => {
                // Baseline first, instructions after: spend bursts that
                // predate the instructions must never count toward the delta.
                let baseline = match self.watcher.take_baseline(&session.buyer.buyer_id).await {
                    Ok(baseline) => baseline,
                    Err(err) => {
                        return self
                            .fail(&session.order_id, CheckoutState::MethodSelected, err.to_string())
                            .await;
                    }
                };
                self.events
                    .publish(CheckoutEvent::PaymentInstructionsReady {
                        order_id: session.order_id.clone(),
                        intent: intent.clone(),
                    })
                    .await;
                self.transition(
                    &session.order_id,
                    CheckoutState::MethodSelected,
                    CheckoutState::AwaitingSettlement,
                )
                .await;
                self.await_settlement(&session, &intent, baseline, cancel)
                    .await
            }
        }
    }

    /// Re-entry path for the crypto rail: the buyer returned to the payment
    /// step, or is manually re-checking after the watcher gave up. Always
    /// takes a fresh baseline; stale baselines are never reused. A trigger
    /// arriving while a poll for the same session is in flight is ignored.
    #[instrument(skip(self, session, intent, cancel), fields(order_id = %session.order_id))]
    pub async fn recheck_settlement(
        &self,
        session: &CheckoutSession,
        intent: &PaymentIntent,
        cancel: watch::Receiver<bool>,
    ) -> CheckoutOutcome {
        if session.rail() != PaymentRail::Crypto {
            return CheckoutOutcome::Failed {
                reason: "Settlement re-check is only available for crypto payments".to_string(),
            };
        }
        // The in-flight slot is claimed before anything goes on the wire:
        // an ignored trigger costs no provider call.
        let _guard = match InFlightGuard::try_acquire(&self.in_flight, &session.order_id) {
            Some(guard) => guard,
            None => {
                info!(
                    order_id = %session.order_id,
                    "Ignoring settlement check, a poll is already in flight"
                );
                return CheckoutOutcome::SettlementPending;
            }
        };
        let baseline = match self.watcher.take_baseline(&session.buyer.buyer_id).await {
            Ok(baseline) => baseline,
            Err(err) => {
                return self
                    .fail(
                        &session.order_id,
                        CheckoutState::AwaitingSettlement,
                        err.to_string(),
                    )
                    .await;
            }
        };
        self.poll_and_fulfill(session, intent, baseline, cancel).await
    }

    async fn await_settlement(
        &self,
        session: &CheckoutSession,
        intent: &PaymentIntent,
        baseline: SettlementObservation,
        cancel: watch::Receiver<bool>,
    ) -> CheckoutOutcome {
        let _guard = match InFlightGuard::try_acquire(&self.in_flight, &session.order_id) {
            Some(guard) => guard,
            None => {
                info!(
                    order_id = %session.order_id,
                    "Ignoring settlement check, a poll is already in flight"
                );
                return CheckoutOutcome::SettlementPending;
            }
        };
        self.poll_and_fulfill(session, intent, baseline, cancel).await
    }

    async fn poll_and_fulfill(
        &self,
        session: &CheckoutSession,
        intent: &PaymentIntent,
        baseline: SettlementObservation,
        cancel: watch::Receiver<bool>,
    ) -> CheckoutOutcome {
        let outcome = self
            .watcher
            .poll_until_confirmed(
                &session.buyer.buyer_id,
                &baseline,
                session.required_settlement_amount,
                cancel,
            )
            .await;

        match outcome {
            Ok(SettlementOutcome::Confirmed { observation }) => {
                self.events
                    .publish(CheckoutEvent::SettlementConfirmed {
                        order_id: session.order_id.clone(),
                        delta: observation.delta_since(&baseline),
                        required: session.required_settlement_amount,
                    })
                    .await;
                self.transition(
                    &session.order_id,
                    CheckoutState::AwaitingSettlement,
                    CheckoutState::Fulfilling,
                )
                .await;
                let payment = PaymentRecord::from_intent(PaymentRail::Crypto, intent);
                self.fulfill(session, payment).await
            }
            Ok(SettlementOutcome::TimedOut { .. }) => {
                info!(
                    order_id = %session.order_id,
                    "Settlement not yet detected; session remains awaiting settlement"
                );
                CheckoutOutcome::SettlementPending
            }
            Ok(SettlementOutcome::Cancelled) => {
                info!(order_id = %session.order_id, "Checkout abandoned during settlement watch");
                CheckoutOutcome::Abandoned
            }
            Err(err) => {
                self.fail(&session.order_id, CheckoutState::AwaitingSettlement, err.to_string())
                    .await
            }
        }
    }

    async fn fulfill(&self, session: &CheckoutSession, payment: PaymentRecord) -> CheckoutOutcome {
        match self.fulfillment.register_order(session, &payment).await {
            Ok(result) if result.success => {
                self.events
                    .publish(CheckoutEvent::KeysDelivered {
                        order_id: session.order_id.clone(),
                        key_count: result.keys.len(),
                        email_sent: result.email_sent,
                    })
                    .await;
                self.transition(
                    &session.order_id,
                    CheckoutState::Fulfilling,
                    CheckoutState::Delivered,
                )
                .await;
                CheckoutOutcome::Delivered(result)
            }
            Ok(result) => {
                let reason = result
                    .error
                    .unwrap_or_else(|| "Order fulfillment failed".to_string());
                self.fail(&session.order_id, CheckoutState::Fulfilling, reason)
                    .await
            }
            Err(err) => {
                self.fail(&session.order_id, CheckoutState::Fulfilling, err.to_string())
                    .await
            }
        }
    }

    async fn transition(&self, order_id: &str, from: CheckoutState, to: CheckoutState) {
        info!(order_id, %from, %to, "Checkout state transition");
        self.events
            .publish(CheckoutEvent::StateChanged {
                order_id: order_id.to_string(),
                from,
                to,
            })
            .await;
    }

    async fn fail(&self, order_id: &str, from: CheckoutState, reason: String) -> CheckoutOutcome {
        error!(order_id, %from, reason = %reason, "Checkout failed");
        self.events
            .publish(CheckoutEvent::StateChanged {
                order_id: order_id.to_string(),
                from,
                to: CheckoutState::Failed,
            })
            .await;
        CheckoutOutcome::Failed { reason }
    }
}

fn validate_session(session: &CheckoutSession) -> Result<(), CheckoutError> {
    if session.order_id.trim().is_empty() {
        return Err(CheckoutError::validation("Order id must not be empty"));
    }
    let email = session.buyer.email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(CheckoutError::validation(
            "A valid email address is required",
        ));
    }
    if session.line_items.is_empty() {
        return Err(CheckoutError::validation("Cart must not be empty"));
    }
    Ok(())
}

/// Removes the session's in-flight marker when the poll ends, on every exit
/// path.
struct InFlightGuard<'a> {
    map: &'a DashMap<String, ()>,
    key: String,
}

impl<'a> InFlightGuard<'a> {
    fn try_acquire(map: &'a DashMap<String, ()>, key: &str) -> Option<Self> {
        match map.entry(key.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(Self {
                    map,
                    key: key.to_string(),
                })
            }
        }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.map.remove(&self.key);
    }
}
