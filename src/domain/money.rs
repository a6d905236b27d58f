use crate::error::PaymentError;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Number of decimal places every stored monetary value carries.
pub const MONEY_SCALE: u32 = 2;

/// Tolerance for the `deposit + remaining == total` invariant.
pub const CENT: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Represents a positive monetary amount supplied from outside the service.
///
/// Ensures that order totals and gateway amounts are always positive.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, PaymentError> {
        if value > Decimal::ZERO {
            Ok(Self(round_money(value)))
        } else {
            Err(PaymentError::ValidationError(
                "Amount must be positive".to_string(),
            ))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = PaymentError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

/// Rounds to cents, half away from zero, and pins the scale to two places.
///
/// Every derived amount in the service goes through this one rule so that
/// a split computed as `part` and `whole - part` never drifts by a cent.
pub fn round_money(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(MONEY_SCALE);
    rounded
}

/// `percentage`% of `amount`, rounded once.
pub fn percentage_of(amount: Decimal, percentage: Decimal) -> Decimal {
    round_money(amount * percentage / Decimal::ONE_HUNDRED)
}

/// Splits `whole` into a rounded share and the exact remainder.
pub fn split(whole: Decimal, share: Decimal) -> (Decimal, Decimal) {
    let share = round_money(share);
    let rest = round_money(whole) - share;
    (share, rest)
}
