//! Application layer containing the order payment workflows.
//!
//! `OrderService` serves one user action per call, `CaptureScheduler` drives
//! due deposits through capture in batches, and `SettlementEngine` pays
//! providers out. All three are stateless between calls: every piece of
//! shared state lives behind the ports in [`Dependencies`].

pub mod orders;
pub mod scheduler;
pub mod settlement;

use crate::domain::ledger::Escrow;
use crate::domain::order::{Order, OrderStatus};
use crate::domain::policy::PaymentPolicy;
use crate::domain::ports::{
    ClockRef, DistributedLockRef, LedgerStoreRef, Notification, NotifierRef, OrderStoreRef,
    PaymentGatewayRef, PolicyStoreRef, ProviderDirectoryRef,
};
use crate::domain::state_machine::can_transition;
use crate::error::{PaymentError, Result};
use uuid::Uuid;

/// The ports every workflow is built on.
#[derive(Clone)]
pub struct Dependencies {
    pub orders: OrderStoreRef,
    pub ledger: LedgerStoreRef,
    pub policies: PolicyStoreRef,
    pub providers: ProviderDirectoryRef,
    pub gateway: PaymentGatewayRef,
    pub lock: DistributedLockRef,
    pub clock: ClockRef,
    pub notifier: NotifierRef,
}

impl Dependencies {
    pub(crate) async fn load_order(&self, id: Uuid) -> Result<Order> {
        self.orders
            .get(id)
            .await?
            .ok_or_else(|| PaymentError::NotFoundError(format!("order {}", id)))
    }

    /// The policy pinned on an order. A dangling reference is a data fault,
    /// not a caller mistake.
    pub(crate) async fn pinned_policy(&self, order: &Order) -> Result<PaymentPolicy> {
        self.policies
            .get(&order.payment_policy_id)
            .await?
            .ok_or_else(|| {
                PaymentError::StorageError(format!(
                    "order {} references missing policy {}",
                    order.id, order.payment_policy_id
                ))
            })
    }

    /// Moves the order along one edge of the lifecycle.
    ///
    /// Refuses edges missing from the transition table. Otherwise sets the
    /// status to `to` and applies `mutation`, only if the order is still in
    /// `from`; `None` means another writer got there first. Compensating
    /// writes that undo a claim go straight to the store instead.
    pub(crate) async fn transition(
        &self,
        id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
        mutation: impl FnOnce(&mut Order) + Send + 'static,
    ) -> Result<Option<Order>> {
        if !can_transition(from, to) {
            return Err(PaymentError::InternalError(
                format!("order {}: no transition from {} to {}", id, from, to).into(),
            ));
        }
        self.orders
            .update_if(
                id,
                from,
                Box::new(move |o: &mut Order| {
                    o.status = to;
                    mutation(o);
                }),
            )
            .await
    }

    /// Error for a conditional update that found the order in another status.
    pub(crate) async fn lost_race(&self, id: Uuid, action: &'static str) -> PaymentError {
        match self.load_order(id).await {
            Ok(current) => PaymentError::InvalidTransition {
                current: current.status,
                action,
            },
            Err(e) => e,
        }
    }

    /// Opens the escrow for a captured deposit unless one already exists.
    pub(crate) async fn ensure_escrow(&self, order: &Order) -> Result<Escrow> {
        if let Some(existing) = self.ledger.get_escrow(order.id).await? {
            return Ok(existing);
        }
        let escrow = Escrow::holding(order.id, order.deposit_amount, self.clock.now());
        self.ledger.put_escrow(escrow.clone()).await?;
        Ok(escrow)
    }

    /// Releases the escrow to the order's provider. Releasing twice is a no-op.
    pub(crate) async fn release_escrow(&self, order: &Order) -> Result<Escrow> {
        let mut escrow = self.ensure_escrow(order).await?;
        if escrow.release_to(&order.provider_id, self.clock.now()) {
            self.ledger.put_escrow(escrow.clone()).await?;
            tracing::info!(order_id = %order.id, provider_id = %order.provider_id, "escrow released");
        }
        Ok(escrow)
    }

    pub(crate) async fn notify_parties(&self, order: &Order, notification: Notification) {
        self.notifier
            .notify(&order.customer_id, notification.clone())
            .await;
        self.notifier.notify(&order.provider_id, notification).await;
    }
}
