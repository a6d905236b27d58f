#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use deposit_escrow::application::Dependencies;
use deposit_escrow::application::orders::OrderService;
use deposit_escrow::application::scheduler::CaptureScheduler;
use deposit_escrow::application::settlement::SettlementEngine;
use deposit_escrow::config::SchedulerConfig;
use deposit_escrow::domain::caller::{Caller, Role};
use deposit_escrow::domain::ledger::{Escrow, Payment, Payout, PayoutEntry};
use deposit_escrow::domain::order::{NewOrder, Order, OrderStatus};
use deposit_escrow::domain::policy::PaymentPolicy;
use deposit_escrow::domain::ports::{
    Clock, DistributedLock, LedgerStore, OrderStore, PayoutDestination,
};
use deposit_escrow::error::{PaymentError, Result};
use deposit_escrow::infrastructure::clock::FixedClock;
use deposit_escrow::infrastructure::gateway::SandboxGateway;
use deposit_escrow::infrastructure::in_memory::{
    InMemoryLedgerStore, InMemoryLock, InMemoryOrderStore, InMemoryPolicyStore,
    InMemoryProviderDirectory,
};
use deposit_escrow::infrastructure::notifier::RecordingNotifier;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const CUSTOMER: &str = "cust-1";
pub const PROVIDER: &str = "prov-1";

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()
}

/// Wraps the in-memory lock and counts how it is used.
///
/// A permissive lock grants every acquire, standing in for a lock service
/// that fails open.
pub struct CountingLock {
    inner: InMemoryLock,
    permissive: bool,
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl CountingLock {
    pub fn new(inner: InMemoryLock, permissive: bool) -> Self {
        Self {
            inner,
            permissive,
            acquired: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        }
    }

    pub fn acquisitions(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Takes the capture lock for `order_id` on behalf of another process.
    pub async fn hold_elsewhere(&self, order_id: uuid::Uuid, ttl: std::time::Duration) {
        let key = format!("order-capture:{}", order_id);
        assert!(self.inner.acquire(&key, ttl).await.unwrap());
    }

    pub async fn is_held(&self, order_id: uuid::Uuid) -> bool {
        self.inner
            .is_held(&format!("order-capture:{}", order_id))
            .await
    }
}

#[async_trait]
impl DistributedLock for CountingLock {
    async fn acquire(&self, key: &str, ttl: std::time::Duration) -> Result<bool> {
        let granted = self.inner.acquire(key, ttl).await? || self.permissive;
        if granted {
            self.acquired.fetch_add(1, Ordering::SeqCst);
        }
        Ok(granted)
    }

    async fn release(&self, key: &str) -> Result<()> {
        self.released.fetch_add(1, Ordering::SeqCst);
        self.inner.release(key).await
    }
}

/// Ledger whose next writes can be made to fail.
pub struct FailingLedger {
    inner: Arc<InMemoryLedgerStore>,
    failing_payments: AtomicUsize,
    failing_payouts: AtomicUsize,
}

impl FailingLedger {
    pub fn new(inner: Arc<InMemoryLedgerStore>) -> Self {
        Self {
            inner,
            failing_payments: AtomicUsize::new(0),
            failing_payouts: AtomicUsize::new(0),
        }
    }

    pub fn fail_next_payments(&self, count: usize) {
        self.failing_payments.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_payouts(&self, count: usize) {
        self.failing_payouts.store(count, Ordering::SeqCst);
    }

    fn trip(counter: &AtomicUsize, what: &str) -> Result<()> {
        let tripped = counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            return Err(PaymentError::StorageError(format!("{} write failed", what)));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for FailingLedger {
    async fn append_payment(&self, payment: Payment) -> Result<()> {
        Self::trip(&self.failing_payments, "payment")?;
        self.inner.append_payment(payment).await
    }

    async fn payments_for(&self, order_id: uuid::Uuid) -> Result<Vec<Payment>> {
        self.inner.payments_for(order_id).await
    }

    async fn get_escrow(&self, order_id: uuid::Uuid) -> Result<Option<Escrow>> {
        self.inner.get_escrow(order_id).await
    }

    async fn put_escrow(&self, escrow: Escrow) -> Result<()> {
        self.inner.put_escrow(escrow).await
    }

    async fn record_payout(&self, entry: PayoutEntry) -> Result<Payout> {
        Self::trip(&self.failing_payouts, "payout")?;
        self.inner.record_payout(entry).await
    }

    async fn payout_for(&self, provider_id: &str, period: &str) -> Result<Option<Payout>> {
        self.inner.payout_for(provider_id, period).await
    }

    async fn payouts_for(&self, provider_id: &str) -> Result<Vec<Payout>> {
        self.inner.payouts_for(provider_id).await
    }
}

pub struct Harness {
    pub clock: Arc<FixedClock>,
    pub orders: Arc<InMemoryOrderStore>,
    pub ledger: Arc<InMemoryLedgerStore>,
    pub policies: Arc<InMemoryPolicyStore>,
    pub providers: Arc<InMemoryProviderDirectory>,
    pub gateway: Arc<SandboxGateway>,
    pub lock: Arc<CountingLock>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::build(SandboxGateway::new(), false).await
    }

    pub async fn with_gateway(gateway: SandboxGateway) -> Self {
        Self::build(gateway, false).await
    }

    /// A harness whose lock never refuses.
    pub async fn with_permissive_lock(gateway: SandboxGateway) -> Self {
        Self::build(gateway, true).await
    }

    async fn build(gateway: SandboxGateway, permissive: bool) -> Self {
        let clock = Arc::new(FixedClock::new(t0()));
        let policies = InMemoryPolicyStore::with_default_policy();
        policies
            .publish(PaymentPolicy {
                id: "manual".to_string(),
                is_auto_capture_enabled: false,
                ..PaymentPolicy::default()
            })
            .await
            .unwrap();
        let providers = InMemoryProviderDirectory::new();
        providers
            .register(PayoutDestination {
                provider_id: PROVIDER.to_string(),
                account_reference: "acct_prov_1".to_string(),
                verified: true,
            })
            .await;

        Self {
            lock: Arc::new(CountingLock::new(
                InMemoryLock::new(clock.clone()),
                permissive,
            )),
            clock,
            orders: Arc::new(InMemoryOrderStore::new()),
            ledger: Arc::new(InMemoryLedgerStore::new()),
            policies: Arc::new(policies),
            providers: Arc::new(providers),
            gateway: Arc::new(gateway),
            notifier: Arc::new(RecordingNotifier::new()),
        }
    }

    pub fn deps(&self) -> Dependencies {
        Dependencies {
            orders: self.orders.clone(),
            ledger: self.ledger.clone(),
            policies: self.policies.clone(),
            providers: self.providers.clone(),
            gateway: self.gateway.clone(),
            lock: self.lock.clone(),
            clock: self.clock.clone(),
            notifier: self.notifier.clone(),
        }
    }

    /// The same ports, with ledger writes going through `ledger`.
    pub fn deps_with_ledger(&self, ledger: Arc<FailingLedger>) -> Dependencies {
        Dependencies {
            ledger,
            ..self.deps()
        }
    }

    pub fn service(&self) -> OrderService {
        OrderService::new(self.deps())
    }

    pub fn scheduler(&self) -> CaptureScheduler {
        self.scheduler_with(SchedulerConfig::default())
    }

    pub fn scheduler_with(&self, config: SchedulerConfig) -> CaptureScheduler {
        CaptureScheduler::new(self.deps(), config)
    }

    pub fn settlement(&self) -> SettlementEngine {
        SettlementEngine::new(self.deps())
    }

    pub async fn order(&self, id: uuid::Uuid) -> Order {
        self.orders.get(id).await.unwrap().unwrap()
    }

    /// A PENDING order for `total`, starting `starts_in` from now.
    pub async fn pending_order(&self, total: Decimal, starts_in: Duration) -> Order {
        self.pending_order_with_policy(total, starts_in, "default").await
    }

    pub async fn pending_order_with_policy(
        &self,
        total: Decimal,
        starts_in: Duration,
        policy_id: &str,
    ) -> Order {
        self.service()
            .create_order(NewOrder {
                id: None,
                customer_id: CUSTOMER.to_string(),
                provider_id: PROVIDER.to_string(),
                payment_policy_id: policy_id.to_string(),
                total_amount: total,
                scheduled_start_time: self.clock.now() + starts_in,
            })
            .await
            .unwrap()
    }

    /// Authorizes a pending order through the service with a fresh reference.
    pub async fn authorize(&self, order: &Order) -> Order {
        let reference = format!("pi_{}", order.id.simple());
        self.gateway
            .register_authorization(&reference, order.deposit_amount);
        self.service()
            .authorize(&customer(), order.id, &reference)
            .await
            .unwrap()
    }

    pub async fn authorized_order(&self, total: Decimal, starts_in: Duration) -> Order {
        let order = self.pending_order(total, starts_in).await;
        self.authorize(&order).await
    }

    /// An AUTHORIZED order whose capture time has already passed.
    pub async fn due_order(&self, total: Decimal) -> Order {
        self.authorized_order(total, Duration::hours(12)).await
    }

    /// Forces the status and attempt counter, as if earlier runs had happened.
    pub async fn force(&self, id: uuid::Uuid, status: OrderStatus, attempts: u8) -> Order {
        let current = self.order(id).await.status;
        self.orders
            .update_if(
                id,
                current,
                Box::new(move |o: &mut Order| {
                    o.status = status;
                    o.capture_attempts = attempts;
                }),
            )
            .await
            .unwrap()
            .unwrap()
    }

    /// A CAPTURED order, driven there by the scheduler.
    pub async fn captured_order(&self, total: Decimal, starts_in: Duration) -> Order {
        let order = self.authorized_order(total, starts_in).await;
        let scheduler = self.scheduler();
        let outcome = scheduler.capture_one(self.order(order.id).await).await;
        assert_eq!(
            outcome,
            deposit_escrow::application::scheduler::CaptureOutcome::Captured
        );
        self.order(order.id).await
    }
}

pub fn customer() -> Caller {
    Caller::new(CUSTOMER, Role::Customer)
}

pub fn provider() -> Caller {
    Caller::new(PROVIDER, Role::Provider)
}

pub fn admin() -> Caller {
    Caller::new("ops-1", Role::Admin)
}

pub fn stranger() -> Caller {
    Caller::new("cust-2", Role::Customer)
}
