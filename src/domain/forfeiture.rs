use crate::domain::money::{percentage_of, split};
use crate::domain::order::OrderStatus;
use crate::domain::policy::PaymentPolicy;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

/// What the gateway has to do for a cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayRemedy {
    /// Nothing was ever authorized.
    None,
    /// Undo the authorization; the customer keeps the whole deposit.
    VoidAuthorization,
    /// Refund the whole captured deposit.
    FullRefund,
    /// Refund `refund_amount` and keep the rest.
    PartialRefund,
    /// Keep the whole deposit; nothing goes back to the customer.
    Forfeit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancellationQuote {
    pub status: OrderStatus,
    pub forfeited_amount: Decimal,
    pub refund_amount: Decimal,
    pub remedy: GatewayRemedy,
}

/// Prices a cancellation at `now`.
///
/// Callers must already have checked the order is in a cancellable status;
/// this only distinguishes the free window from the forfeiture window.
/// `forfeited_amount + refund_amount == deposit` holds exactly for every
/// quote, since the refund is derived from the rounded forfeiture.
pub fn quote_cancellation(
    status: OrderStatus,
    deposit: Decimal,
    policy: &PaymentPolicy,
    scheduled_start_time: DateTime<Utc>,
    now: DateTime<Utc>,
) -> CancellationQuote {
    if status == OrderStatus::Pending {
        return CancellationQuote {
            status: OrderStatus::Cancelled,
            forfeited_amount: Decimal::ZERO,
            refund_amount: Decimal::ZERO,
            remedy: GatewayRemedy::None,
        };
    }

    let until_service = scheduled_start_time - now;
    if until_service > policy.cancellation_cutoff() {
        let remedy = if status == OrderStatus::Captured {
            GatewayRemedy::FullRefund
        } else {
            GatewayRemedy::VoidAuthorization
        };
        return CancellationQuote {
            status: OrderStatus::Cancelled,
            forfeited_amount: Decimal::ZERO,
            refund_amount: deposit,
            remedy,
        };
    }

    let (forfeited, refund) = split(
        deposit,
        percentage_of(deposit, policy.forfeiture_percentage),
    );
    CancellationQuote {
        status: OrderStatus::CancelledForfeited,
        forfeited_amount: forfeited,
        refund_amount: refund,
        remedy: if refund > Decimal::ZERO {
            GatewayRemedy::PartialRefund
        } else {
            GatewayRemedy::Forfeit
        },
    }
}
