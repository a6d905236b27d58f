use super::Dependencies;
use crate::config::SchedulerConfig;
use crate::domain::ledger::{Payment, PaymentType};
use crate::domain::order::{Order, OrderStatus};
use crate::domain::ports::{DistributedLockRef, GatewayReceipt, Notification};
use crate::domain::state_machine::{Action, after_capture_failure, ensure_allowed};
use crate::error::{GatewayError, PaymentError, Result};
use futures_util::{FutureExt, StreamExt, stream};
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AutoCaptureDisabled,
    LockHeld,
    LostRace,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum CaptureOutcome {
    Captured,
    Skipped(SkipReason),
    Failed(String),
}

/// Aggregate result of one scheduler run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CaptureReport {
    pub processed: usize,
    pub captured: usize,
    pub skipped: usize,
    pub failed: usize,
    pub errors: Vec<String>,
    /// Interrupted captures put back before the batch started.
    pub recovered: usize,
    /// Per-order outcomes, in the order the candidates were picked up.
    #[serde(skip)]
    pub outcomes: Vec<(Uuid, CaptureOutcome)>,
}

impl CaptureReport {
    fn record(&mut self, order_id: Uuid, outcome: CaptureOutcome) {
        self.processed += 1;
        match &outcome {
            CaptureOutcome::Captured => self.captured += 1,
            CaptureOutcome::Skipped(_) => self.skipped += 1,
            CaptureOutcome::Failed(message) => {
                self.failed += 1;
                self.errors.push(message.clone());
            }
        }
        self.outcomes.push((order_id, outcome));
    }
}

fn lock_key(order_id: Uuid) -> String {
    format!("order-capture:{}", order_id)
}

/// A held capture lock.
///
/// Released explicitly on every path that runs to completion. If the owning
/// future is dropped first, the release is handed to the runtime instead.
struct CaptureLock {
    lock: DistributedLockRef,
    key: String,
    order_id: Uuid,
    held: bool,
}

impl CaptureLock {
    async fn acquire(
        lock: &DistributedLockRef,
        order_id: Uuid,
        ttl: std::time::Duration,
    ) -> Result<Option<Self>> {
        let key = lock_key(order_id);
        if !lock.acquire(&key, ttl).await? {
            return Ok(None);
        }
        Ok(Some(Self {
            lock: lock.clone(),
            key,
            order_id,
            held: true,
        }))
    }

    async fn release(mut self) {
        if let Err(e) = self.lock.release(&self.key).await {
            tracing::warn!(order_id = %self.order_id, error = %e, "failed to release capture lock");
        }
        self.held = false;
    }
}

impl Drop for CaptureLock {
    fn drop(&mut self) {
        if !self.held {
            return;
        }
        let lock = self.lock.clone();
        let key = std::mem::take(&mut self.key);
        let order_id = self.order_id;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = lock.release(&key).await {
                        tracing::warn!(order_id = %order_id, error = %e, "failed to release capture lock");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(order_id = %order_id, "capture lock left to expire");
            }
        }
    }
}

/// Captures deposits whose scheduled capture time has passed.
///
/// Any number of schedulers may run at once against the same stores. Each
/// order is guarded twice: a distributed lock keeps concurrent runs from
/// calling the gateway redundantly, and the AUTHORIZED → CRON_CAPTURING
/// conditional update decides which run owns the capture. The gateway
/// idempotency key `capture:{order}:{attempt}` covers a response lost in
/// transit.
///
/// Each capture runs on its own task, so a caller that stops waiting on
/// [`CaptureScheduler::run`] does not interrupt captures already started.
/// A capture interrupted anyway (process exit, a dropped `capture_one`)
/// leaves its order in CRON_CAPTURING; the next run puts it back once the
/// claim is older than the lock TTL.
#[derive(Clone)]
pub struct CaptureScheduler {
    deps: Dependencies,
    config: SchedulerConfig,
}

impl CaptureScheduler {
    pub fn new(deps: Dependencies, config: SchedulerConfig) -> Self {
        Self { deps, config }
    }

    /// Runs one batch. Only a failure to list candidates is an error;
    /// per-order failures are folded into the report.
    pub async fn run(&self) -> Result<CaptureReport> {
        let now = self.deps.clock.now();
        let recovered = self.recover_stranded(now).await?;
        let candidates = self.deps.orders.due_for_capture(now).await?;
        tracing::debug!(candidates = candidates.len(), "capture run started");

        let outcomes: Vec<(Uuid, CaptureOutcome)> = stream::iter(candidates)
            .map(|order| {
                let scheduler = self.clone();
                async move {
                    let id = order.id;
                    let task = tokio::spawn(async move { scheduler.capture_one(order).await });
                    let outcome = task.await.unwrap_or_else(|e| {
                        tracing::error!(order_id = %id, error = %e, "capture task failed");
                        CaptureOutcome::Failed(format!("order {}: capture task failed: {}", id, e))
                    });
                    (id, outcome)
                }
            })
            .buffered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut report = CaptureReport {
            recovered,
            ..CaptureReport::default()
        };
        for (order_id, outcome) in outcomes {
            report.record(order_id, outcome);
        }
        tracing::info!(
            processed = report.processed,
            captured = report.captured,
            skipped = report.skipped,
            failed = report.failed,
            recovered = report.recovered,
            "capture run finished"
        );
        Ok(report)
    }

    /// Rolls back CRON_CAPTURING claims older than the lock TTL as failed
    /// attempts. Returns how many orders were put back.
    async fn recover_stranded(&self, now: chrono::DateTime<chrono::Utc>) -> Result<usize> {
        let ttl = chrono::Duration::from_std(self.config.lock_ttl)
            .map_err(|e| PaymentError::ValidationError(format!("lock ttl: {}", e)))?;
        let stranded = self.deps.orders.stranded_captures(now - ttl).await?;
        let mut recovered = 0;
        for order in stranded {
            let order_id = order.id;
            let guard =
                match CaptureLock::acquire(&self.deps.lock, order_id, self.config.lock_ttl).await {
                    Ok(Some(guard)) => guard,
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::warn!(order_id = %order_id, error = %e, "capture lock unavailable");
                        continue;
                    }
                };
            let error = GatewayError::Unavailable("capture interrupted before completion".to_string());
            if self.fail_capture(&order, &error).await {
                recovered += 1;
            }
            guard.release().await;
        }
        Ok(recovered)
    }

    /// Drives one candidate through capture. Never returns an error.
    pub async fn capture_one(&self, order: Order) -> CaptureOutcome {
        let order_id = order.id;
        if ensure_allowed(Action::BeginCapture, order.status).is_err() {
            return CaptureOutcome::Skipped(SkipReason::LostRace);
        }
        let policy = match self.deps.pinned_policy(&order).await {
            Ok(policy) => policy,
            Err(e) => return CaptureOutcome::Failed(format!("order {}: {}", order_id, e)),
        };
        if !policy.is_auto_capture_enabled {
            tracing::debug!(order_id = %order_id, "auto capture disabled by policy");
            return CaptureOutcome::Skipped(SkipReason::AutoCaptureDisabled);
        }

        let guard = match CaptureLock::acquire(&self.deps.lock, order_id, self.config.lock_ttl).await
        {
            Ok(Some(guard)) => guard,
            Ok(None) => {
                tracing::debug!(order_id = %order_id, "capture lock held elsewhere");
                return CaptureOutcome::Skipped(SkipReason::LockHeld);
            }
            Err(e) => {
                tracing::warn!(order_id = %order_id, error = %e, "capture lock unavailable");
                return CaptureOutcome::Skipped(SkipReason::LockHeld);
            }
        };

        let outcome = AssertUnwindSafe(self.capture_locked(order))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                tracing::error!(order_id = %order_id, "capture panicked");
                CaptureOutcome::Failed(format!("order {}: capture panicked", order_id))
            });

        guard.release().await;
        outcome
    }

    async fn capture_locked(&self, order: Order) -> CaptureOutcome {
        let order_id = order.id;
        let now = self.deps.clock.now();
        let claimed = self
            .deps
            .transition(
                order_id,
                OrderStatus::Authorized,
                OrderStatus::CronCapturing,
                move |o: &mut Order| {
                    o.capture_attempts += 1;
                    o.capture_claimed_at = Some(now);
                },
            )
            .await;
        let claimed = match claimed {
            Ok(Some(claimed)) => claimed,
            Ok(None) => {
                tracing::debug!(order_id = %order_id, "order no longer authorized, backing off");
                return CaptureOutcome::Skipped(SkipReason::LostRace);
            }
            Err(e) => return CaptureOutcome::Failed(format!("order {}: {}", order_id, e)),
        };

        let attempt = claimed.capture_attempts;
        let result = match claimed.payment_reference.as_deref() {
            Some(reference) => self.call_capture(&claimed, reference).await,
            None => Err(GatewayError::NotReady("order has no payment reference".to_string())),
        };

        match result {
            Ok(receipt) => self.finish_capture(&claimed, receipt).await,
            Err(gateway_error) => {
                self.fail_capture(&claimed, &gateway_error).await;
                CaptureOutcome::Failed(format!(
                    "order {} attempt {}: {}",
                    order_id, attempt, gateway_error
                ))
            }
        }
    }

    async fn call_capture(
        &self,
        order: &Order,
        reference: &str,
    ) -> std::result::Result<GatewayReceipt, GatewayError> {
        let idempotency_key = format!("capture:{}:{}", order.id, order.capture_attempts);
        let call = self
            .deps
            .gateway
            .capture(reference, order.deposit_amount, &idempotency_key);
        match tokio::time::timeout(self.config.gateway_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout),
        }
    }

    async fn finish_capture(&self, order: &Order, receipt: GatewayReceipt) -> CaptureOutcome {
        let order_id = order.id;
        let now = self.deps.clock.now();
        let captured = self
            .deps
            .transition(
                order_id,
                OrderStatus::CronCapturing,
                OrderStatus::Captured,
                move |o: &mut Order| {
                    o.captured_at = Some(now);
                    o.capture_claimed_at = None;
                    o.last_capture_error = None;
                },
            )
            .await;
        let captured = match captured {
            Ok(Some(captured)) => captured,
            Ok(None) => {
                tracing::error!(order_id = %order_id, charge = %receipt.reference, "order moved while its capture was in flight");
                return CaptureOutcome::Failed(format!(
                    "order {}: status changed during capture {}",
                    order_id, receipt.reference
                ));
            }
            Err(e) => {
                tracing::error!(order_id = %order_id, charge = %receipt.reference, error = %e, "captured but could not record status");
                return CaptureOutcome::Failed(format!("order {}: {}", order_id, e));
            }
        };

        let mut bookkeeping_errors = Vec::new();
        let payment = Payment::new(
            order_id,
            PaymentType::Capture,
            receipt.amount,
            receipt.reference.clone(),
            now,
        );
        if let Err(e) = self.deps.ledger.append_payment(payment).await {
            tracing::error!(order_id = %order_id, charge = %receipt.reference, error = %e, "failed to write capture ledger row");
            bookkeeping_errors.push(format!("ledger row for {}: {}", receipt.reference, e));
        }
        if let Err(e) = self.deps.ensure_escrow(&captured).await {
            tracing::error!(order_id = %order_id, error = %e, "failed to open escrow");
            bookkeeping_errors.push(format!("escrow: {}", e));
        }

        tracing::info!(order_id = %order_id, attempt = captured.capture_attempts, amount = %receipt.amount, "deposit captured");
        self.deps
            .notify_parties(
                &captured,
                Notification::DepositCaptured {
                    order_id,
                    amount: receipt.amount,
                },
            )
            .await;
        if bookkeeping_errors.is_empty() {
            CaptureOutcome::Captured
        } else {
            CaptureOutcome::Failed(format!(
                "order {}: captured but not recorded ({})",
                order_id,
                bookkeeping_errors.join("; ")
            ))
        }
    }

    /// Moves a CRON_CAPTURING order back to AUTHORIZED, or to DISPUTED once
    /// its attempts are used up. Returns whether the order was moved.
    async fn fail_capture(&self, order: &Order, error: &GatewayError) -> bool {
        let order_id = order.id;
        let attempts = order.capture_attempts;
        let next = after_capture_failure(attempts);
        let message = error.to_string();
        let rolled_back = self
            .deps
            .transition(
                order_id,
                OrderStatus::CronCapturing,
                next,
                move |o: &mut Order| {
                    o.capture_claimed_at = None;
                    o.last_capture_error = Some(message);
                },
            )
            .await;
        match rolled_back {
            Ok(Some(_)) => {}
            Ok(None) => {
                tracing::error!(order_id = %order_id, "order moved while its failed capture was rolled back");
                return false;
            }
            Err(e) => {
                tracing::error!(order_id = %order_id, error = %e, "failed to roll back capture");
                return false;
            }
        }

        if next == OrderStatus::Disputed {
            tracing::error!(order_id = %order_id, attempts, error = %error, "capture attempts exhausted, order disputed");
            self.deps
                .notify_parties(order, Notification::Disputed { order_id })
                .await;
        } else {
            tracing::warn!(order_id = %order_id, attempts, error = %error, "capture failed, will retry");
            self.deps
                .notifier
                .notify(
                    &order.customer_id,
                    Notification::CaptureFailed { order_id, attempts },
                )
                .await;
        }
        true
    }
}
