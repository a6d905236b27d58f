use super::Dependencies;
use crate::domain::caller::Caller;
use crate::domain::forfeiture::{CancellationQuote, GatewayRemedy, quote_cancellation};
use crate::domain::ledger::{Payment, PaymentType};
use crate::domain::money::Amount;
use crate::domain::order::{NewOrder, Order, OrderStatus};
use crate::domain::ports::Notification;
use crate::domain::state_machine::{Action, ensure_allowed};
use crate::error::{GatewayError, PaymentError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The two things a customer can do on the completion endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CompletionAction {
    ConfirmCompletion,
    #[serde(rename_all = "camelCase")]
    PayRemaining { external_payment_reference: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancellationOutcome {
    pub order: Order,
    pub quote: CancellationQuote,
}

/// Serves single user actions on one order.
pub struct OrderService {
    deps: Dependencies,
}

impl OrderService {
    pub fn new(deps: Dependencies) -> Self {
        Self { deps }
    }

    /// Creates a PENDING order pinned to its payment policy.
    pub async fn create_order(&self, request: NewOrder) -> Result<Order> {
        Amount::new(request.total_amount)?;
        if request.customer_id.trim().is_empty() || request.provider_id.trim().is_empty() {
            return Err(PaymentError::ValidationError(
                "customer and provider are required".to_string(),
            ));
        }
        let now = self.deps.clock.now();
        if request.scheduled_start_time <= now {
            return Err(PaymentError::ValidationError(
                "scheduled start time must be in the future".to_string(),
            ));
        }
        let policy = self
            .deps
            .policies
            .get(&request.payment_policy_id)
            .await?
            .ok_or_else(|| {
                PaymentError::ValidationError(format!(
                    "unknown payment policy {}",
                    request.payment_policy_id
                ))
            })?;
        policy.validate()?;

        let order = Order::new(request, &policy, now);
        self.deps.orders.insert(order.clone()).await?;
        tracing::info!(
            order_id = %order.id,
            policy_id = %policy.id,
            deposit = %order.deposit_amount,
            "order created"
        );
        Ok(order)
    }

    pub async fn get_order(&self, caller: &Caller, id: Uuid) -> Result<Order> {
        let order = self.deps.load_order(id).await?;
        caller.ensure_can_view(&order)?;
        Ok(order)
    }

    pub async fn payments(&self, caller: &Caller, id: Uuid) -> Result<Vec<Payment>> {
        let order = self.get_order(caller, id).await?;
        self.deps.ledger.payments_for(order.id).await
    }

    /// PENDING → AUTHORIZED once the gateway confirms the deposit hold.
    ///
    /// Repeating the call with the reference already on file is answered
    /// with the current order and no side effects.
    pub async fn authorize(&self, caller: &Caller, id: Uuid, reference: &str) -> Result<Order> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(PaymentError::ValidationError(
                "externalPaymentReference is required".to_string(),
            ));
        }
        let order = self.deps.load_order(id).await?;
        caller.ensure_customer_of(&order)?;
        if order.status == OrderStatus::Authorized
            && order.payment_reference.as_deref() == Some(reference)
        {
            return Ok(order);
        }
        ensure_allowed(Action::Authorize, order.status)?;

        let authorization = self.deps.gateway.authorization(reference).await?;
        if !authorization.ready_to_capture {
            return Err(GatewayError::NotReady(reference.to_string()).into());
        }
        if authorization.amount != order.deposit_amount {
            return Err(GatewayError::AmountMismatch {
                expected: order.deposit_amount,
                authorized: authorization.amount,
            }
            .into());
        }

        let now = self.deps.clock.now();
        let stored_reference = reference.to_string();
        let authorized = self
            .deps
            .transition(
                id,
                OrderStatus::Pending,
                OrderStatus::Authorized,
                move |o: &mut Order| {
                    o.payment_reference = Some(stored_reference);
                    o.authorized_at = Some(now);
                },
            )
            .await?;
        let Some(authorized) = authorized else {
            return Err(self.deps.lost_race(id, Action::Authorize.name()).await);
        };

        self.deps
            .ledger
            .append_payment(Payment::new(
                id,
                PaymentType::Authorize,
                authorized.deposit_amount,
                reference,
                now,
            ))
            .await?;
        tracing::info!(order_id = %id, "deposit authorized");
        self.deps
            .notify_parties(&authorized, Notification::Authorized { order_id: id })
            .await;
        Ok(authorized)
    }

    /// Cancels a PENDING, AUTHORIZED or CAPTURED order.
    ///
    /// The order is moved to its cancelled status first; the gateway is
    /// called only by the request that won that move. If the gateway call
    /// fails the move is undone and the error surfaces.
    pub async fn cancel(
        &self,
        caller: &Caller,
        id: Uuid,
        reason: Option<String>,
    ) -> Result<CancellationOutcome> {
        let order = self.deps.load_order(id).await?;
        caller.ensure_customer_or_admin(&order)?;
        ensure_allowed(Action::Cancel, order.status)?;

        let policy = self.deps.pinned_policy(&order).await?;
        let now = self.deps.clock.now();
        let quote = quote_cancellation(
            order.status,
            order.deposit_amount,
            &policy,
            order.scheduled_start_time,
            now,
        );

        let observed = order.status;
        let cancelled_by = caller.user_id.clone();
        let claim = quote.clone();
        let claimed = self
            .deps
            .transition(id, observed, quote.status, move |o: &mut Order| {
                o.forfeited_amount = claim.forfeited_amount;
                o.refunded_amount = claim.refund_amount;
                o.cancelled_at = Some(now);
                o.cancelled_by = Some(cancelled_by);
                o.cancellation_reason = reason;
            })
            .await?;
        let Some(cancelled) = claimed else {
            return Err(self.deps.lost_race(id, Action::Cancel.name()).await);
        };

        if let Err(e) = self.apply_remedy(&cancelled, &quote).await {
            tracing::warn!(order_id = %id, error = %e, "cancellation gateway call failed, restoring order");
            self.restore_after_failed_cancel(&order, quote.status).await;
            return Err(e);
        }

        tracing::info!(
            order_id = %id,
            status = %cancelled.status,
            forfeited = %quote.forfeited_amount,
            refund = %quote.refund_amount,
            "order cancelled"
        );
        self.deps
            .notify_parties(
                &cancelled,
                Notification::Cancelled {
                    order_id: id,
                    status: cancelled.status,
                    refund_amount: quote.refund_amount,
                },
            )
            .await;
        Ok(CancellationOutcome {
            order: cancelled,
            quote,
        })
    }

    async fn apply_remedy(&self, order: &Order, quote: &CancellationQuote) -> Result<()> {
        let reference = match (&order.payment_reference, quote.remedy) {
            (_, GatewayRemedy::None | GatewayRemedy::Forfeit) => return Ok(()),
            (Some(reference), _) => reference.clone(),
            (None, _) => {
                tracing::warn!(order_id = %order.id, "cancelled order has no payment reference");
                return Ok(());
            }
        };

        match quote.remedy {
            GatewayRemedy::VoidAuthorization => {
                self.deps
                    .gateway
                    .cancel_authorization(&reference, &format!("cancel:{}", order.id))
                    .await?;
            }
            GatewayRemedy::FullRefund | GatewayRemedy::PartialRefund => {
                let receipt = self
                    .deps
                    .gateway
                    .refund(
                        &reference,
                        quote.refund_amount,
                        &format!("refund:{}", order.id),
                    )
                    .await?;
                self.deps
                    .ledger
                    .append_payment(Payment::new(
                        order.id,
                        PaymentType::Refund,
                        receipt.amount,
                        receipt.reference,
                        self.deps.clock.now(),
                    ))
                    .await?;
            }
            GatewayRemedy::None | GatewayRemedy::Forfeit => {}
        }
        Ok(())
    }

    async fn restore_after_failed_cancel(&self, original: &Order, claimed_status: OrderStatus) {
        let original_status = original.status;
        let forfeited = original.forfeited_amount;
        let refunded = original.refunded_amount;
        let restored = self
            .deps
            .orders
            .update_if(
                original.id,
                claimed_status,
                Box::new(move |o: &mut Order| {
                    o.status = original_status;
                    o.forfeited_amount = forfeited;
                    o.refunded_amount = refunded;
                    o.cancelled_at = None;
                    o.cancelled_by = None;
                    o.cancellation_reason = None;
                }),
            )
            .await;
        if !matches!(restored, Ok(Some(_))) {
            tracing::error!(order_id = %original.id, "could not restore order after failed cancellation");
        }
    }

    /// CAPTURED → IN_PROGRESS; the escrowed deposit goes to the provider.
    pub async fn start(&self, caller: &Caller, id: Uuid) -> Result<Order> {
        let order = self.deps.load_order(id).await?;
        caller.ensure_customer_or_admin(&order)?;
        ensure_allowed(Action::Start, order.status)?;

        let now = self.deps.clock.now();
        let started = self
            .deps
            .transition(
                id,
                OrderStatus::Captured,
                OrderStatus::InProgress,
                move |o: &mut Order| o.actual_start_time = Some(now),
            )
            .await?;
        let Some(started) = started else {
            return Err(self.deps.lost_race(id, Action::Start.name()).await);
        };

        self.deps.release_escrow(&started).await?;
        tracing::info!(order_id = %id, "service started");
        self.deps
            .notify_parties(&started, Notification::Started { order_id: id })
            .await;
        Ok(started)
    }

    pub async fn complete(
        &self,
        caller: &Caller,
        id: Uuid,
        action: CompletionAction,
    ) -> Result<Order> {
        match action {
            CompletionAction::ConfirmCompletion => self.confirm_completion(caller, id).await,
            CompletionAction::PayRemaining {
                external_payment_reference,
            } => {
                self.pay_remaining(caller, id, &external_payment_reference)
                    .await
            }
        }
    }

    async fn confirm_completion(&self, caller: &Caller, id: Uuid) -> Result<Order> {
        let order = self.deps.load_order(id).await?;
        caller.ensure_customer_or_admin(&order)?;
        ensure_allowed(Action::ConfirmCompletion, order.status)?;

        let now = self.deps.clock.now();
        let confirmed = self
            .deps
            .transition(
                id,
                OrderStatus::InProgress,
                OrderStatus::PendingSettlement,
                move |o: &mut Order| o.actual_end_time = Some(now),
            )
            .await?;
        let Some(confirmed) = confirmed else {
            return Err(self.deps.lost_race(id, Action::ConfirmCompletion.name()).await);
        };
        tracing::info!(order_id = %id, "service completion confirmed");
        Ok(confirmed)
    }

    /// PENDING_SETTLEMENT → COMPLETED by capturing the remainder.
    async fn pay_remaining(&self, caller: &Caller, id: Uuid, reference: &str) -> Result<Order> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(PaymentError::ValidationError(
                "externalPaymentReference is required".to_string(),
            ));
        }
        let order = self.deps.load_order(id).await?;
        caller.ensure_customer_of(&order)?;
        ensure_allowed(Action::PayRemaining, order.status)?;

        let remaining = order.remaining_amount;
        if remaining > Decimal::ZERO {
            let authorization = self.deps.gateway.authorization(reference).await?;
            if !authorization.ready_to_capture {
                return Err(GatewayError::NotReady(reference.to_string()).into());
            }
            if authorization.amount != remaining {
                return Err(GatewayError::AmountMismatch {
                    expected: remaining,
                    authorized: authorization.amount,
                }
                .into());
            }
        }

        let now = self.deps.clock.now();
        let stored_reference = reference.to_string();
        let claimed = self
            .deps
            .transition(
                id,
                OrderStatus::PendingSettlement,
                OrderStatus::Completed,
                move |o: &mut Order| {
                    o.remaining_payment_reference = Some(stored_reference);
                    o.completed_at = Some(now);
                },
            )
            .await?;
        let Some(completed) = claimed else {
            return Err(self.deps.lost_race(id, Action::PayRemaining.name()).await);
        };

        if remaining > Decimal::ZERO {
            let captured = self
                .deps
                .gateway
                .capture(reference, remaining, &format!("remainder:{}", id))
                .await;
            let receipt = match captured {
                Ok(receipt) => receipt,
                Err(e) => {
                    tracing::warn!(order_id = %id, error = %e, "remainder capture failed, restoring order");
                    let restored = self
                        .deps
                        .orders
                        .update_if(
                            id,
                            OrderStatus::Completed,
                            Box::new(|o: &mut Order| {
                                o.status = OrderStatus::PendingSettlement;
                                o.remaining_payment_reference = None;
                                o.completed_at = None;
                            }),
                        )
                        .await;
                    if !matches!(restored, Ok(Some(_))) {
                        tracing::error!(order_id = %id, "could not restore order after failed remainder capture");
                    }
                    return Err(e.into());
                }
            };
            self.deps
                .ledger
                .append_payment(Payment::new(
                    id,
                    PaymentType::Capture,
                    receipt.amount,
                    receipt.reference,
                    now,
                ))
                .await?;
        }

        tracing::info!(order_id = %id, remaining = %remaining, "order completed");
        self.deps
            .notify_parties(&completed, Notification::Completed { order_id: id })
            .await;
        Ok(completed)
    }
}
