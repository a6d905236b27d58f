//! Transition table and guards for the order lifecycle.
//!
//! Everything here is pure. Services consult [`ensure_allowed`] before any
//! side effect and then persist the move with a conditional store update
//! keyed on the status they observed.

use crate::domain::order::{MAX_CAPTURE_ATTEMPTS, OrderStatus};
use crate::error::PaymentError;
use OrderStatus::*;

/// Every legal `(from, to)` edge of the lifecycle.
pub const TRANSITIONS: &[(OrderStatus, OrderStatus)] = &[
    (Pending, Authorized),
    (Pending, Cancelled),
    (Authorized, CronCapturing),
    (CronCapturing, Captured),
    (CronCapturing, Authorized),
    (CronCapturing, Disputed),
    (Authorized, Cancelled),
    (Authorized, CancelledForfeited),
    (Captured, Cancelled),
    (Captured, CancelledForfeited),
    (Captured, InProgress),
    (InProgress, PendingSettlement),
    (PendingSettlement, Completed),
    (Completed, Settled),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Authorize,
    Cancel,
    BeginCapture,
    Start,
    ConfirmCompletion,
    PayRemaining,
    Settle,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Authorize => "authorize",
            Action::Cancel => "cancel",
            Action::BeginCapture => "capture",
            Action::Start => "start",
            Action::ConfirmCompletion => "confirm completion of",
            Action::PayRemaining => "pay the remainder of",
            Action::Settle => "settle",
        }
    }

    /// Statuses from which this action may be taken.
    pub fn sources(&self) -> &'static [OrderStatus] {
        match self {
            Action::Authorize => &[Pending],
            Action::Cancel => &[Pending, Authorized, Captured],
            Action::BeginCapture => &[Authorized],
            Action::Start => &[Captured],
            Action::ConfirmCompletion => &[InProgress],
            Action::PayRemaining => &[PendingSettlement],
            Action::Settle => &[Completed],
        }
    }
}

pub fn can_transition(from: OrderStatus, to: OrderStatus) -> bool {
    TRANSITIONS.contains(&(from, to))
}

/// Fails with `InvalidTransition` naming `current` unless `action` applies.
pub fn ensure_allowed(action: Action, current: OrderStatus) -> Result<(), PaymentError> {
    if action.sources().contains(&current) {
        Ok(())
    } else {
        Err(PaymentError::InvalidTransition {
            current,
            action: action.name(),
        })
    }
}

/// Where a failed capture lands, given the already-incremented attempt count.
pub fn after_capture_failure(capture_attempts: u8) -> OrderStatus {
    if capture_attempts >= MAX_CAPTURE_ATTEMPTS {
        Disputed
    } else {
        Authorized
    }
}
