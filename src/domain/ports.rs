use super::ledger::{Escrow, Payment, Payout, PayoutEntry};
use super::order::{Order, OrderStatus};
use super::policy::PaymentPolicy;
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// A change applied to the stored order inside a conditional update.
pub type OrderMutation = Box<dyn FnOnce(&mut Order) + Send>;

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Stores a new order. Fails if the id is already taken.
    async fn insert(&self, order: Order) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<Order>>;
    /// AUTHORIZED orders with attempts left, a payment reference, and a
    /// capture time at or before `now`, oldest capture time first.
    async fn due_for_capture(&self, now: DateTime<Utc>) -> Result<Vec<Order>>;
    /// CRON_CAPTURING orders claimed at or before `claimed_before`.
    async fn stranded_captures(&self, claimed_before: DateTime<Utc>) -> Result<Vec<Order>>;
    /// Applies `mutation` to the stored order only if its status is still
    /// `expected`, atomically with respect to every other writer.
    ///
    /// Returns the updated order, or `None` when the status had moved on.
    /// Fails with `NotFoundError` if the order does not exist.
    async fn update_if(
        &self,
        id: Uuid,
        expected: OrderStatus,
        mutation: OrderMutation,
    ) -> Result<Option<Order>>;
}

/// Append-only monetary records and the escrow/payout rows hanging off them.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn append_payment(&self, payment: Payment) -> Result<()>;
    async fn payments_for(&self, order_id: Uuid) -> Result<Vec<Payment>>;
    async fn get_escrow(&self, order_id: Uuid) -> Result<Option<Escrow>>;
    async fn put_escrow(&self, escrow: Escrow) -> Result<()>;
    /// Adds `entry` to the provider's payout for `entry.period`, opening the
    /// payout on first use, atomically with respect to other writers. An
    /// order already on the payout is not added again.
    async fn record_payout(&self, entry: PayoutEntry) -> Result<Payout>;
    async fn payout_for(&self, provider_id: &str, period: &str) -> Result<Option<Payout>>;
    /// Every payout of a provider, oldest period first.
    async fn payouts_for(&self, provider_id: &str) -> Result<Vec<Payout>>;
}

#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn get(&self, policy_id: &str) -> Result<Option<PaymentPolicy>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, serde::Deserialize)]
pub struct PayoutDestination {
    pub provider_id: String,
    pub account_reference: String,
    pub verified: bool,
}

#[async_trait]
pub trait ProviderDirectory: Send + Sync {
    async fn payout_destination(&self, provider_id: &str) -> Result<Option<PayoutDestination>>;
}

/// What the gateway knows about a customer's authorization.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthorizationStatus {
    pub reference: String,
    pub amount: Decimal,
    pub ready_to_capture: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayReceipt {
    pub reference: String,
    pub amount: Decimal,
}

/// The external payment processor.
///
/// Every money-moving call carries an idempotency key; a gateway that sees a
/// key twice must answer the second call with the first call's result.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn authorization(
        &self,
        reference: &str,
    ) -> std::result::Result<AuthorizationStatus, GatewayError>;
    async fn capture(
        &self,
        reference: &str,
        amount: Decimal,
        idempotency_key: &str,
    ) -> std::result::Result<GatewayReceipt, GatewayError>;
    async fn cancel_authorization(
        &self,
        reference: &str,
        idempotency_key: &str,
    ) -> std::result::Result<(), GatewayError>;
    async fn refund(
        &self,
        reference: &str,
        amount: Decimal,
        idempotency_key: &str,
    ) -> std::result::Result<GatewayReceipt, GatewayError>;
    async fn transfer(
        &self,
        destination: &str,
        amount: Decimal,
        idempotency_key: &str,
    ) -> std::result::Result<GatewayReceipt, GatewayError>;
}

/// Cross-process mutual exclusion with a time-to-live.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Returns `false` without waiting when someone else holds `key`.
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<bool>;
    async fn release(&self, key: &str) -> Result<()>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    Authorized { order_id: Uuid },
    DepositCaptured { order_id: Uuid, amount: Decimal },
    CaptureFailed { order_id: Uuid, attempts: u8 },
    Disputed { order_id: Uuid },
    Cancelled { order_id: Uuid, status: OrderStatus, refund_amount: Decimal },
    Started { order_id: Uuid },
    Completed { order_id: Uuid },
    Settled { order_id: Uuid, amount: Decimal },
}

/// Fire-and-forget delivery; failures are the notifier's problem.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, recipient: &str, notification: Notification);
}

pub type OrderStoreRef = Arc<dyn OrderStore>;
pub type LedgerStoreRef = Arc<dyn LedgerStore>;
pub type PolicyStoreRef = Arc<dyn PolicyStore>;
pub type ProviderDirectoryRef = Arc<dyn ProviderDirectory>;
pub type PaymentGatewayRef = Arc<dyn PaymentGateway>;
pub type DistributedLockRef = Arc<dyn DistributedLock>;
pub type ClockRef = Arc<dyn Clock>;
pub type NotifierRef = Arc<dyn Notifier>;
