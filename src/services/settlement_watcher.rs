//! Delta-based settlement confirmation for the crypto rail.
//!
//! The provider exposes no per-transaction webhook, only a monotonically
//! increasing per-buyer spend counter. The watcher takes one baseline read
//! before payment instructions are shown, then samples the counter on a
//! fixed interval; settlement is confirmed as soon as the delta against the
//! baseline reaches the required amount. Spend that landed before the
//! baseline never counts, and a session re-entering the payment step must
//! take a fresh baseline.

use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::clients::payment_provider::PaymentProviderApi;
use crate::errors::CheckoutError;
use crate::models::SettlementObservation;

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Pause between spend samples.
    pub interval: Duration,
    /// Ceiling on one polling run; expiry is non-fatal.
    pub timeout: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(600),
        }
    }
}

/// Outcome of one polling run. Only `Confirmed` advances the checkout;
/// `TimedOut` leaves the session awaiting settlement so the buyer can
/// re-check manually.
#[derive(Debug, Clone)]
pub enum SettlementOutcome {
    Confirmed { observation: SettlementObservation },
    TimedOut { last: Option<SettlementObservation> },
    Cancelled,
}

#[derive(Clone)]
pub struct SettlementWatcher {
    provider: Arc<dyn PaymentProviderApi>,
    config: WatcherConfig,
}

impl SettlementWatcher {
    pub fn new(provider: Arc<dyn PaymentProviderApi>, config: WatcherConfig) -> Self {
        Self { provider, config }
    }

    /// Reads the spend counter once. Taken immediately before the buyer is
    /// shown payment instructions; every confirmation is relative to it.
    #[instrument(skip(self))]
    pub async fn take_baseline(
        &self,
        buyer_id: &str,
    ) -> Result<SettlementObservation, CheckoutError> {
        let spend = self.provider.cumulative_spend(buyer_id).await?;
        let baseline = SettlementObservation::now(spend);
        debug!(buyer_id, cumulative_spend = %spend, "Settlement baseline taken");
        Ok(baseline)
    }

    /// Samples the spend counter every `interval` until the delta against
    /// `baseline` reaches `required`, the configured ceiling elapses, or
    /// `cancel` fires. Cancellation is observed before the next sample is
    /// taken, not merely before the next scheduling tick; dropping the
    /// sender counts as a stop signal, since it means the session owning
    /// this run is gone.
    #[instrument(skip(self, baseline, cancel), fields(required = %required))]
    pub async fn poll_until_confirmed(
        &self,
        buyer_id: &str,
        baseline: &SettlementObservation,
        required: Decimal,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<SettlementOutcome, CheckoutError> {
        let deadline = Instant::now() + self.config.timeout;
        let mut last: Option<SettlementObservation> = None;

        loop {
            if *cancel.borrow() {
                info!(buyer_id, "Settlement polling cancelled");
                return Ok(SettlementOutcome::Cancelled);
            }

            let spend = self.provider.cumulative_spend(buyer_id).await?;
            let observation = SettlementObservation::now(spend);
            let delta = observation.delta_since(baseline);
            debug!(
                buyer_id,
                cumulative_spend = %spend,
                delta = %delta,
                "Settlement sample taken"
            );

            if delta >= required {
                info!(buyer_id, delta = %delta, "Settlement confirmed");
                return Ok(SettlementOutcome::Confirmed { observation });
            }
            last = Some(observation);

            if Instant::now() >= deadline {
                warn!(
                    buyer_id,
                    delta = %delta,
                    "Settlement not detected within the polling ceiling"
                );
                return Ok(SettlementOutcome::TimedOut { last });
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {}
                changed = cancel.changed() => {
                    // A dropped sender means the owning session is gone; a
                    // value change only stops the run when the flag actually
                    // reads true. A redundant `false` send resumes sampling.
                    if changed.is_err() || *cancel.borrow() {
                        info!(buyer_id, "Settlement polling cancelled");
                        return Ok(SettlementOutcome::Cancelled);
                    }
                }
            }
        }
    }
}
