use crate::domain::ports::{AuthorizationStatus, GatewayReceipt, PaymentGateway};
use crate::error::GatewayError;
use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum GatewayCall {
    Authorization {
        reference: String,
    },
    Capture {
        reference: String,
        amount: Decimal,
        idempotency_key: String,
    },
    CancelAuthorization {
        reference: String,
        idempotency_key: String,
    },
    Refund {
        reference: String,
        amount: Decimal,
        idempotency_key: String,
    },
    Transfer {
        destination: String,
        amount: Decimal,
        idempotency_key: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayOperation {
    Capture,
    CancelAuthorization,
    Refund,
    Transfer,
}

#[derive(Debug, Default)]
struct SandboxState {
    authorizations: HashMap<String, AuthorizationStatus>,
    scripted_failures: HashMap<GatewayOperation, VecDeque<GatewayError>>,
    completed: HashMap<String, GatewayReceipt>,
    calls: Vec<GatewayCall>,
    next_id: u64,
}

/// Deterministic stand-in for the payment processor.
///
/// Captures of unregistered references are approved in full, which lets the
/// CLI drive seeded orders end to end. Failures are scripted per operation
/// and consumed in order. Successful calls are remembered by idempotency
/// key and replayed instead of being applied twice.
#[derive(Debug, Clone, Default)]
pub struct SandboxGateway {
    state: Arc<Mutex<SandboxState>>,
    capture_delay: Option<Duration>,
}

impl SandboxGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every capture sleeps this long before answering.
    pub fn with_capture_delay(mut self, delay: Duration) -> Self {
        self.capture_delay = Some(delay);
        self
    }

    pub fn register_authorization(&self, reference: &str, amount: Decimal) {
        self.insert_authorization(reference, amount, true);
    }

    /// An authorization the customer has not finished confirming.
    pub fn register_incomplete_authorization(&self, reference: &str, amount: Decimal) {
        self.insert_authorization(reference, amount, false);
    }

    fn insert_authorization(&self, reference: &str, amount: Decimal, ready: bool) {
        self.state.lock().authorizations.insert(
            reference.to_string(),
            AuthorizationStatus {
                reference: reference.to_string(),
                amount,
                ready_to_capture: ready,
            },
        );
    }

    pub fn fail_next(&self, operation: GatewayOperation, error: GatewayError) {
        self.state
            .lock()
            .scripted_failures
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.state.lock().calls.clone()
    }

    pub fn capture_calls(&self) -> usize {
        self.count(|c| matches!(c, GatewayCall::Capture { .. }))
    }

    pub fn refund_calls(&self) -> Vec<Decimal> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                GatewayCall::Refund { amount, .. } => Some(*amount),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, predicate: impl Fn(&GatewayCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| predicate(c)).count()
    }

    /// Records the call, then either replays, fails as scripted, or runs `apply`.
    fn execute(
        &self,
        call: GatewayCall,
        operation: GatewayOperation,
        idempotency_key: &str,
        apply: impl FnOnce(&mut SandboxState) -> Result<GatewayReceipt, GatewayError>,
    ) -> Result<GatewayReceipt, GatewayError> {
        let mut state = self.state.lock();
        state.calls.push(call);
        if let Some(receipt) = state.completed.get(idempotency_key) {
            return Ok(receipt.clone());
        }
        if let Some(error) = state
            .scripted_failures
            .get_mut(&operation)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }
        let receipt = apply(&mut *state)?;
        state
            .completed
            .insert(idempotency_key.to_string(), receipt.clone());
        Ok(receipt)
    }
}

fn next_reference(state: &mut SandboxState, prefix: &str) -> String {
    state.next_id += 1;
    format!("{}_{:06}", prefix, state.next_id)
}

#[async_trait]
impl PaymentGateway for SandboxGateway {
    async fn authorization(&self, reference: &str) -> Result<AuthorizationStatus, GatewayError> {
        let mut state = self.state.lock();
        state.calls.push(GatewayCall::Authorization {
            reference: reference.to_string(),
        });
        state
            .authorizations
            .get(reference)
            .cloned()
            .ok_or_else(|| GatewayError::NotReady(format!("unknown authorization {}", reference)))
    }

    async fn capture(
        &self,
        reference: &str,
        amount: Decimal,
        idempotency_key: &str,
    ) -> Result<GatewayReceipt, GatewayError> {
        if let Some(delay) = self.capture_delay {
            tokio::time::sleep(delay).await;
        }
        let call = GatewayCall::Capture {
            reference: reference.to_string(),
            amount,
            idempotency_key: idempotency_key.to_string(),
        };
        self.execute(call, GatewayOperation::Capture, idempotency_key, |state| {
            if let Some(auth) = state.authorizations.get(reference) {
                if !auth.ready_to_capture {
                    return Err(GatewayError::NotReady(reference.to_string()));
                }
                if amount > auth.amount {
                    return Err(GatewayError::Declined(format!(
                        "capture {} exceeds authorized {}",
                        amount, auth.amount
                    )));
                }
            }
            Ok(GatewayReceipt {
                reference: next_reference(state, "ch"),
                amount,
            })
        })
    }

    async fn cancel_authorization(
        &self,
        reference: &str,
        idempotency_key: &str,
    ) -> Result<(), GatewayError> {
        let call = GatewayCall::CancelAuthorization {
            reference: reference.to_string(),
            idempotency_key: idempotency_key.to_string(),
        };
        self.execute(
            call,
            GatewayOperation::CancelAuthorization,
            idempotency_key,
            |state| {
                state.authorizations.remove(reference);
                Ok(GatewayReceipt {
                    reference: reference.to_string(),
                    amount: Decimal::ZERO,
                })
            },
        )
        .map(|_| ())
    }

    async fn refund(
        &self,
        reference: &str,
        amount: Decimal,
        idempotency_key: &str,
    ) -> Result<GatewayReceipt, GatewayError> {
        let call = GatewayCall::Refund {
            reference: reference.to_string(),
            amount,
            idempotency_key: idempotency_key.to_string(),
        };
        self.execute(call, GatewayOperation::Refund, idempotency_key, |state| {
            Ok(GatewayReceipt {
                reference: next_reference(state, "re"),
                amount,
            })
        })
    }

    async fn transfer(
        &self,
        destination: &str,
        amount: Decimal,
        idempotency_key: &str,
    ) -> Result<GatewayReceipt, GatewayError> {
        let call = GatewayCall::Transfer {
            destination: destination.to_string(),
            amount,
            idempotency_key: idempotency_key.to_string(),
        };
        self.execute(call, GatewayOperation::Transfer, idempotency_key, |state| {
            Ok(GatewayReceipt {
                reference: next_reference(state, "tr"),
                amount,
            })
        })
    }
}
