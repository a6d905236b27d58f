use crate::error::PaymentError;
use chrono::Duration;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Upper bound for every hour offset in a policy: ten years.
pub const MAX_POLICY_HOURS: i64 = 87_600;

/// Payment terms pinned onto an order when it is created.
///
/// Policies are looked up by id for the lifetime of an order; editing a
/// policy means publishing a new id, never mutating one that orders reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentPolicy {
    pub id: String,
    /// Share of the order total authorized up front, in percent.
    pub deposit_percentage: Decimal,
    /// Cancelling more than this many hours before the start is free.
    pub cancellation_cutoff_hours: i64,
    /// Share of the deposit kept on a late cancellation, in percent.
    pub forfeiture_percentage: Decimal,
    pub auto_capture_hours_before: i64,
    pub is_auto_capture_enabled: bool,
    /// Fraction of the order total retained by the platform at settlement.
    pub platform_fee_rate: Decimal,
}

impl PaymentPolicy {
    pub fn validate(&self) -> Result<(), PaymentError> {
        let percent = Decimal::ZERO..=Decimal::ONE_HUNDRED;
        if !percent.contains(&self.deposit_percentage) {
            return Err(PaymentError::ValidationError(format!(
                "policy {}: deposit percentage must be within 0..=100",
                self.id
            )));
        }
        if !percent.contains(&self.forfeiture_percentage) {
            return Err(PaymentError::ValidationError(format!(
                "policy {}: forfeiture percentage must be within 0..=100",
                self.id
            )));
        }
        if !(Decimal::ZERO..=Decimal::ONE).contains(&self.platform_fee_rate) {
            return Err(PaymentError::ValidationError(format!(
                "policy {}: platform fee rate must be within 0..=1",
                self.id
            )));
        }
        let hours = 0..=MAX_POLICY_HOURS;
        if !hours.contains(&self.cancellation_cutoff_hours)
            || !hours.contains(&self.auto_capture_hours_before)
        {
            return Err(PaymentError::ValidationError(format!(
                "policy {}: hour offsets must be within 0..={}",
                self.id, MAX_POLICY_HOURS
            )));
        }
        Ok(())
    }

    pub fn cancellation_cutoff(&self) -> Duration {
        Duration::hours(self.cancellation_cutoff_hours)
    }

    pub fn auto_capture_lead(&self) -> Duration {
        Duration::hours(self.auto_capture_hours_before)
    }
}

impl Default for PaymentPolicy {
    fn default() -> Self {
        Self {
            id: "default".to_string(),
            deposit_percentage: dec!(30),
            cancellation_cutoff_hours: 48,
            forfeiture_percentage: dec!(50),
            auto_capture_hours_before: 24,
            is_auto_capture_enabled: true,
            platform_fee_rate: dec!(0.10),
        }
    }
}
