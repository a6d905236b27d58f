use crate::domain::money::{CENT, percentage_of, split};
use crate::domain::policy::PaymentPolicy;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Gateway capture is attempted at most this many times per order.
pub const MAX_CAPTURE_ATTEMPTS: u8 = 3;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Authorized,
    CronCapturing,
    Captured,
    InProgress,
    PendingSettlement,
    Completed,
    Settled,
    Cancelled,
    CancelledForfeited,
    Refunded,
    Disputed,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 12] = [
        OrderStatus::Pending,
        OrderStatus::Authorized,
        OrderStatus::CronCapturing,
        OrderStatus::Captured,
        OrderStatus::InProgress,
        OrderStatus::PendingSettlement,
        OrderStatus::Completed,
        OrderStatus::Settled,
        OrderStatus::Cancelled,
        OrderStatus::CancelledForfeited,
        OrderStatus::Refunded,
        OrderStatus::Disputed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Authorized => "AUTHORIZED",
            OrderStatus::CronCapturing => "CRON_CAPTURING",
            OrderStatus::Captured => "CAPTURED",
            OrderStatus::InProgress => "IN_PROGRESS",
            OrderStatus::PendingSettlement => "PENDING_SETTLEMENT",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Settled => "SETTLED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::CancelledForfeited => "CANCELLED_FORFEITED",
            OrderStatus::Refunded => "REFUNDED",
            OrderStatus::Disputed => "DISPUTED",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The order aggregate as persisted.
///
/// Orders are never deleted. Every mutation after creation goes through a
/// conditional store update guarded by the current status.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub status: OrderStatus,
    pub customer_id: String,
    pub provider_id: String,
    pub payment_policy_id: String,
    pub total_amount: Decimal,
    pub deposit_amount: Decimal,
    pub remaining_amount: Decimal,
    pub forfeited_amount: Decimal,
    pub refunded_amount: Decimal,
    pub capture_attempts: u8,
    /// When the scheduler last moved the order into CRON_CAPTURING.
    #[serde(default)]
    pub capture_claimed_at: Option<DateTime<Utc>>,
    pub scheduled_capture_at: Option<DateTime<Utc>>,
    pub scheduled_start_time: DateTime<Utc>,
    pub actual_start_time: Option<DateTime<Utc>>,
    pub actual_end_time: Option<DateTime<Utc>>,
    /// Gateway reference of the deposit authorization.
    pub payment_reference: Option<String>,
    /// Gateway reference of the remainder payment.
    pub remaining_payment_reference: Option<String>,
    pub last_capture_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub authorized_at: Option<DateTime<Utc>>,
    pub captured_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<String>,
    pub cancellation_reason: Option<String>,
}

/// What the order-creation collaborator hands over.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrder {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub customer_id: String,
    pub provider_id: String,
    pub payment_policy_id: String,
    pub total_amount: Decimal,
    pub scheduled_start_time: DateTime<Utc>,
}

impl Order {
    /// Builds a PENDING order, splitting the total per the pinned policy.
    pub fn new(request: NewOrder, policy: &PaymentPolicy, now: DateTime<Utc>) -> Self {
        let (deposit, remaining) = split(
            request.total_amount,
            percentage_of(request.total_amount, policy.deposit_percentage),
        );
        Self {
            id: request.id.unwrap_or_else(Uuid::new_v4),
            status: OrderStatus::Pending,
            customer_id: request.customer_id,
            provider_id: request.provider_id,
            payment_policy_id: policy.id.clone(),
            total_amount: deposit + remaining,
            deposit_amount: deposit,
            remaining_amount: remaining,
            forfeited_amount: Decimal::ZERO,
            refunded_amount: Decimal::ZERO,
            capture_attempts: 0,
            capture_claimed_at: None,
            scheduled_capture_at: Some(request.scheduled_start_time - policy.auto_capture_lead()),
            scheduled_start_time: request.scheduled_start_time,
            actual_start_time: None,
            actual_end_time: None,
            payment_reference: None,
            remaining_payment_reference: None,
            last_capture_error: None,
            created_at: now,
            authorized_at: None,
            captured_at: None,
            completed_at: None,
            settled_at: None,
            cancelled_at: None,
            cancelled_by: None,
            cancellation_reason: None,
        }
    }

    /// `deposit + remaining == total`, within a cent.
    pub fn amounts_balance(&self) -> bool {
        (self.deposit_amount + self.remaining_amount - self.total_amount).abs() <= CENT
    }

    /// Whether the capture scheduler should pick this order up at `now`.
    pub fn is_due_for_capture(&self, now: DateTime<Utc>) -> bool {
        self.status == OrderStatus::Authorized
            && self.capture_attempts < MAX_CAPTURE_ATTEMPTS
            && self.payment_reference.is_some()
            && self.scheduled_capture_at.is_some_and(|at| at <= now)
    }

    /// A capture claim that nobody can still be working on: the claim is
    /// older than `claimed_before`. Claims with no timestamp count as stale.
    pub fn is_stranded_capture(&self, claimed_before: DateTime<Utc>) -> bool {
        self.status == OrderStatus::CronCapturing
            && self.capture_claimed_at.is_none_or(|at| at <= claimed_before)
    }

    pub fn is_party(&self, user_id: &str) -> bool {
        self.customer_id == user_id || self.provider_id == user_id
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    pub(crate) fn sample_order(now: DateTime<Utc>) -> Order {
        Order::new(
            NewOrder {
                id: None,
                customer_id: "cust-1".to_string(),
                provider_id: "prov-1".to_string(),
                payment_policy_id: "default".to_string(),
                total_amount: dec!(1000),
                scheduled_start_time: now + Duration::days(7),
            },
            &PaymentPolicy::default(),
            now,
        )
    }

    #[test]
    fn test_new_order_splits_total() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let order = sample_order(now);
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.deposit_amount, dec!(300.00));
        assert_eq!(order.remaining_amount, dec!(700.00));
        assert!(order.amounts_balance());
        assert_eq!(
            order.scheduled_capture_at,
            Some(order.scheduled_start_time - Duration::hours(24))
        );
    }

    #[test]
    fn test_odd_totals_still_balance() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let policy = PaymentPolicy {
            deposit_percentage: dec!(33.3333),
            ..PaymentPolicy::default()
        };
        for total in [dec!(0.01), dec!(10.01), dec!(999.99), dec!(1234.567)] {
            let order = Order::new(
                NewOrder {
                    id: None,
                    customer_id: "c".to_string(),
                    provider_id: "p".to_string(),
                    payment_policy_id: policy.id.clone(),
                    total_amount: total,
                    scheduled_start_time: now,
                },
                &policy,
                now,
            );
            assert!(order.amounts_balance(), "total {}", total);
        }
    }

    #[test]
    fn test_due_for_capture() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut order = sample_order(now);
        let due = order.scheduled_capture_at.unwrap();
        assert!(!order.is_due_for_capture(due));

        order.status = OrderStatus::Authorized;
        assert!(!order.is_due_for_capture(due), "needs a payment reference");

        order.payment_reference = Some("pi_1".to_string());
        assert!(order.is_due_for_capture(due));
        assert!(!order.is_due_for_capture(due - Duration::seconds(1)));

        order.capture_attempts = MAX_CAPTURE_ATTEMPTS;
        assert!(!order.is_due_for_capture(due));
    }

    #[test]
    fn test_stranded_capture() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut order = sample_order(now);
        order.status = OrderStatus::CronCapturing;
        order.capture_claimed_at = Some(now);

        assert!(!order.is_stranded_capture(now - Duration::seconds(1)));
        assert!(order.is_stranded_capture(now));

        order.capture_claimed_at = None;
        assert!(order.is_stranded_capture(now - Duration::days(1)));

        order.status = OrderStatus::Authorized;
        assert!(!order.is_stranded_capture(now));
    }

    #[test]
    fn test_status_wire_format() {
        let json = serde_json::to_string(&OrderStatus::CancelledForfeited).unwrap();
        assert_eq!(json, "\"CANCELLED_FORFEITED\"");
        for status in OrderStatus::ALL {
            assert_eq!(
                serde_json::to_string(&status).unwrap(),
                format!("\"{}\"", status)
            );
        }
    }
}
