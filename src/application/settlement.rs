use super::Dependencies;
use crate::domain::caller::Caller;
use crate::domain::ledger::{Payment, PaymentType, Payout, PayoutEntry, settlement_period};
use crate::domain::money::split;
use crate::domain::order::{Order, OrderStatus};
use crate::domain::ports::{GatewayReceipt, Notification};
use crate::domain::state_machine::{Action, ensure_allowed};
use crate::error::{PaymentError, Result};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementOutcome {
    pub order: Order,
    pub payout: Payout,
}

/// The provider's share of `total` after the platform fee.
///
/// Returns `(platform_fee, provider_amount)`, which always sum to `total`.
pub fn settlement_split(total: Decimal, fee_rate: Decimal) -> (Decimal, Decimal) {
    split(total, total * fee_rate)
}

/// Pays a completed order out to its provider.
pub struct SettlementEngine {
    deps: Dependencies,
}

impl SettlementEngine {
    pub fn new(deps: Dependencies) -> Self {
        Self { deps }
    }

    /// COMPLETED → SETTLED with one transfer of the provider's share.
    ///
    /// The order is claimed as SETTLED before the transfer and put back to
    /// COMPLETED if the transfer fails, so a duplicate request cannot pay
    /// twice. The bookkeeping after a successful transfer is idempotent:
    /// if it fails, settling the order again finishes it, replaying the
    /// transfer under the same idempotency key instead of paying again.
    pub async fn settle(&self, caller: &Caller, id: Uuid) -> Result<SettlementOutcome> {
        caller.ensure_admin()?;
        let order = self.deps.load_order(id).await?;
        let resuming = order.status == OrderStatus::Settled && !self.is_booked(&order).await?;
        if !resuming {
            ensure_allowed(Action::Settle, order.status)?;
        }

        let destination = self
            .deps
            .providers
            .payout_destination(&order.provider_id)
            .await?
            .filter(|d| d.verified)
            .ok_or_else(|| {
                PaymentError::ValidationError(format!(
                    "provider {} has no verified payout destination",
                    order.provider_id
                ))
            })?;
        let policy = self.deps.pinned_policy(&order).await?;
        let (platform_fee, provider_amount) =
            settlement_split(order.total_amount, policy.platform_fee_rate);

        let (settled, receipt) = if resuming {
            tracing::warn!(order_id = %id, "settled order has no payout yet, finishing its bookkeeping");
            let receipt = self
                .transfer(&destination.account_reference, provider_amount, id)
                .await?;
            (order, receipt)
        } else {
            self.claim_and_transfer(id, &destination.account_reference, provider_amount)
                .await?
        };

        let payout = self.book(&settled, &receipt, platform_fee).await?;
        tracing::info!(
            order_id = %id,
            provider_id = %settled.provider_id,
            amount = %provider_amount,
            fee = %platform_fee,
            period = %payout.period,
            "order settled"
        );
        self.deps
            .notifier
            .notify(
                &settled.provider_id,
                Notification::Settled {
                    order_id: id,
                    amount: provider_amount,
                },
            )
            .await;
        Ok(SettlementOutcome {
            order: settled,
            payout,
        })
    }

    async fn transfer(
        &self,
        destination: &str,
        amount: Decimal,
        id: Uuid,
    ) -> Result<GatewayReceipt> {
        let receipt = self
            .deps
            .gateway
            .transfer(destination, amount, &format!("transfer:{}", id))
            .await?;
        Ok(receipt)
    }

    async fn claim_and_transfer(
        &self,
        id: Uuid,
        destination: &str,
        amount: Decimal,
    ) -> Result<(Order, GatewayReceipt)> {
        let now = self.deps.clock.now();
        let claimed = self
            .deps
            .transition(
                id,
                OrderStatus::Completed,
                OrderStatus::Settled,
                move |o: &mut Order| o.settled_at = Some(now),
            )
            .await?;
        let Some(settled) = claimed else {
            return Err(self.deps.lost_race(id, Action::Settle.name()).await);
        };

        match self.transfer(destination, amount, id).await {
            Ok(receipt) => Ok((settled, receipt)),
            Err(e) => {
                tracing::warn!(order_id = %id, error = %e, "settlement transfer failed, restoring order");
                let restored = self
                    .deps
                    .orders
                    .update_if(
                        id,
                        OrderStatus::Settled,
                        Box::new(|o: &mut Order| {
                            o.status = OrderStatus::Completed;
                            o.settled_at = None;
                        }),
                    )
                    .await;
                if !matches!(restored, Ok(Some(_))) {
                    tracing::error!(order_id = %id, "could not restore order after failed transfer");
                }
                Err(e)
            }
        }
    }

    fn period_of(&self, order: &Order) -> String {
        settlement_period(order.settled_at.unwrap_or_else(|| self.deps.clock.now()))
    }

    /// Whether the settled order is already on its provider's payout.
    async fn is_booked(&self, order: &Order) -> Result<bool> {
        let payout = self
            .deps
            .ledger
            .payout_for(&order.provider_id, &self.period_of(order))
            .await?;
        Ok(payout.is_some_and(|p| p.includes(order.id)))
    }

    /// Ledger row, escrow release and payout for a transfer. Every step
    /// skips work an earlier attempt already did.
    async fn book(
        &self,
        settled: &Order,
        receipt: &GatewayReceipt,
        platform_fee: Decimal,
    ) -> Result<Payout> {
        let id = settled.id;
        let now = self.deps.clock.now();
        let recorded = self
            .deps
            .ledger
            .payments_for(id)
            .await?
            .iter()
            .any(|p| p.r#type == PaymentType::Transfer && p.external_reference == receipt.reference);
        if !recorded {
            self.deps
                .ledger
                .append_payment(Payment::new(
                    id,
                    PaymentType::Transfer,
                    receipt.amount,
                    receipt.reference.clone(),
                    now,
                ))
                .await?;
        }
        self.deps.release_escrow(settled).await?;
        self.deps
            .ledger
            .record_payout(PayoutEntry {
                provider_id: settled.provider_id.clone(),
                period: self.period_of(settled),
                order_id: id,
                amount: receipt.amount,
                platform_fee,
                transfer_id: receipt.reference.clone(),
                settled_at: settled.settled_at.unwrap_or(now),
            })
            .await
    }
}
