use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Rail-specific payment descriptor produced by the intent factory.
///
/// Immutable once created. A session holds at most one live intent; creating
/// a new one discards the prior (the external provider remains the source of
/// truth for any already-created resource).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    /// Provider-issued identifier: transfer id, card id, or the settlement
    /// address itself for the crypto rail (no resource is minted there).
    pub intent_id: String,
    /// Where the buyer sends funds: wallet address, IBAN, or masked PAN.
    pub destination: String,
    /// Network or currency tag ("base", "sepa", "virtual_card", ...).
    pub network: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// One sample of the provider's monotonically increasing per-buyer spend
/// counter. The watcher retains exactly two per session: the baseline taken
/// before payment instructions are shown, and the latest sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementObservation {
    pub observed_at: DateTime<Utc>,
    pub cumulative_spend: Decimal,
}

impl SettlementObservation {
    pub fn now(cumulative_spend: Decimal) -> Self {
        Self {
            observed_at: Utc::now(),
            cumulative_spend,
        }
    }

    /// Spend accrued since `baseline`. Spend that happened before the
    /// baseline was taken never contributes.
    pub fn delta_since(&self, baseline: &SettlementObservation) -> Decimal {
        self.cumulative_spend - baseline.cumulative_spend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn delta_is_relative_to_baseline() {
        let baseline = SettlementObservation::now(dec!(100.0));
        let latest = SettlementObservation::now(dec!(124.30));
        assert_eq!(latest.delta_since(&baseline), dec!(24.30));
    }

    #[test]
    fn delta_can_go_negative_on_counter_reset() {
        let baseline = SettlementObservation::now(dec!(50));
        let latest = SettlementObservation::now(dec!(10));
        assert_eq!(latest.delta_since(&baseline), dec!(-40));
    }
}
