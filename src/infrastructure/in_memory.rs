use crate::domain::ledger::{Escrow, Payment, Payout, PayoutEntry};
use crate::domain::order::{Order, OrderStatus};
use crate::domain::policy::PaymentPolicy;
use crate::domain::ports::{
    ClockRef, DistributedLock, LedgerStore, OrderMutation, OrderStore, PayoutDestination,
    PolicyStore, ProviderDirectory,
};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

/// A thread-safe in-memory store for orders.
///
/// Conditional updates run under the write lock, which makes the status
/// check and the mutation a single step for every task sharing the store.
#[derive(Default, Clone)]
pub struct InMemoryOrderStore {
    orders: Arc<RwLock<HashMap<Uuid, Order>>>,
}

impl InMemoryOrderStore {
    /// Creates a new, empty in-memory order store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, order: Order) -> Result<()> {
        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.id) {
            return Err(PaymentError::ValidationError(format!(
                "order {} already exists",
                order.id
            )));
        }
        orders.insert(order.id, order);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Order>> {
        let orders = self.orders.read().await;
        Ok(orders.get(&id).cloned())
    }

    async fn due_for_capture(&self, now: DateTime<Utc>) -> Result<Vec<Order>> {
        let orders = self.orders.read().await;
        let mut due: Vec<Order> = orders
            .values()
            .filter(|order| order.is_due_for_capture(now))
            .cloned()
            .collect();
        due.sort_by_key(|order| (order.scheduled_capture_at, order.created_at));
        Ok(due)
    }

    async fn stranded_captures(&self, claimed_before: DateTime<Utc>) -> Result<Vec<Order>> {
        let orders = self.orders.read().await;
        Ok(orders
            .values()
            .filter(|order| order.is_stranded_capture(claimed_before))
            .cloned()
            .collect())
    }

    async fn update_if(
        &self,
        id: Uuid,
        expected: OrderStatus,
        mutation: OrderMutation,
    ) -> Result<Option<Order>> {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(&id)
            .ok_or_else(|| PaymentError::NotFoundError(format!("order {}", id)))?;
        if order.status != expected {
            return Ok(None);
        }
        mutation(order);
        Ok(Some(order.clone()))
    }
}

/// In-memory ledger: payments, escrows and payouts.
///
/// Payouts are keyed by `(provider_id, period)`.
#[derive(Default, Clone)]
pub struct InMemoryLedgerStore {
    payments: Arc<RwLock<Vec<Payment>>>,
    escrows: Arc<RwLock<HashMap<Uuid, Escrow>>>,
    payouts: Arc<RwLock<HashMap<(String, String), Payout>>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn append_payment(&self, payment: Payment) -> Result<()> {
        self.payments.write().await.push(payment);
        Ok(())
    }

    async fn payments_for(&self, order_id: Uuid) -> Result<Vec<Payment>> {
        let payments = self.payments.read().await;
        Ok(payments
            .iter()
            .filter(|p| p.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn get_escrow(&self, order_id: Uuid) -> Result<Option<Escrow>> {
        Ok(self.escrows.read().await.get(&order_id).cloned())
    }

    async fn put_escrow(&self, escrow: Escrow) -> Result<()> {
        self.escrows.write().await.insert(escrow.order_id, escrow);
        Ok(())
    }

    async fn record_payout(&self, entry: PayoutEntry) -> Result<Payout> {
        let mut payouts = self.payouts.write().await;
        let payout = payouts
            .entry((entry.provider_id.clone(), entry.period.clone()))
            .or_insert_with(|| Payout::open(&entry.provider_id, &entry.period, entry.settled_at));
        payout.add(&entry);
        Ok(payout.clone())
    }

    async fn payout_for(&self, provider_id: &str, period: &str) -> Result<Option<Payout>> {
        let payouts = self.payouts.read().await;
        Ok(payouts
            .get(&(provider_id.to_string(), period.to_string()))
            .cloned())
    }

    async fn payouts_for(&self, provider_id: &str) -> Result<Vec<Payout>> {
        let payouts = self.payouts.read().await;
        let mut rows: Vec<Payout> = payouts
            .values()
            .filter(|p| p.provider_id == provider_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.period.cmp(&b.period));
        Ok(rows)
    }
}

#[derive(Default, Clone)]
pub struct InMemoryPolicyStore {
    policies: Arc<RwLock<HashMap<String, PaymentPolicy>>>,
}

impl InMemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store holding only [`PaymentPolicy::default`].
    pub fn with_default_policy() -> Self {
        let policy = PaymentPolicy::default();
        let mut map = HashMap::new();
        map.insert(policy.id.clone(), policy);
        Self {
            policies: Arc::new(RwLock::new(map)),
        }
    }

    /// Publishes a policy. An id that orders already reference is immutable.
    pub async fn publish(&self, policy: PaymentPolicy) -> Result<()> {
        policy.validate()?;
        let mut policies = self.policies.write().await;
        if policies.contains_key(&policy.id) {
            return Err(PaymentError::ValidationError(format!(
                "policy {} is already published",
                policy.id
            )));
        }
        policies.insert(policy.id.clone(), policy);
        Ok(())
    }
}

#[async_trait]
impl PolicyStore for InMemoryPolicyStore {
    async fn get(&self, policy_id: &str) -> Result<Option<PaymentPolicy>> {
        Ok(self.policies.read().await.get(policy_id).cloned())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryProviderDirectory {
    destinations: Arc<RwLock<HashMap<String, PayoutDestination>>>,
}

impl InMemoryProviderDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, destination: PayoutDestination) {
        self.destinations
            .write()
            .await
            .insert(destination.provider_id.clone(), destination);
    }
}

#[async_trait]
impl ProviderDirectory for InMemoryProviderDirectory {
    async fn payout_destination(&self, provider_id: &str) -> Result<Option<PayoutDestination>> {
        Ok(self.destinations.read().await.get(provider_id).cloned())
    }
}

/// Lock table shared by every task holding a clone.
///
/// Entries carry an expiry computed from the injected clock; an expired
/// entry is treated as free by the next `acquire`.
#[derive(Clone)]
pub struct InMemoryLock {
    clock: ClockRef,
    held: Arc<RwLock<HashMap<String, DateTime<Utc>>>>,
}

impl InMemoryLock {
    pub fn new(clock: ClockRef) -> Self {
        Self {
            clock,
            held: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn is_held(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.held
            .read()
            .await
            .get(key)
            .is_some_and(|expires_at| *expires_at > now)
    }
}

#[async_trait]
impl DistributedLock for InMemoryLock {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = self.clock.now();
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| PaymentError::ValidationError(format!("lock ttl: {}", e)))?;
        let mut held = self.held.write().await;
        if held.get(key).is_some_and(|expires_at| *expires_at > now) {
            return Ok(false);
        }
        held.insert(key.to_string(), now + ttl);
        Ok(true)
    }

    async fn release(&self, key: &str) -> Result<()> {
        self.held.write().await.remove(key);
        Ok(())
    }
}
