use crate::domain::order::Order;
use crate::error::PaymentError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Provider,
    Admin,
}

impl FromStr for Role {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "customer" => Ok(Role::Customer),
            "provider" => Ok(Role::Provider),
            "admin" => Ok(Role::Admin),
            other => Err(PaymentError::AuthenticationError(format!(
                "unknown role '{}'",
                other
            ))),
        }
    }
}

/// The authenticated identity behind a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: String,
    pub role: Role,
}

impl Caller {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn ensure_customer_of(&self, order: &Order) -> Result<(), PaymentError> {
        if order.customer_id == self.user_id {
            Ok(())
        } else {
            Err(PaymentError::AuthorizationError(format!(
                "only the customer of order {} may do this",
                order.id
            )))
        }
    }

    pub fn ensure_customer_or_admin(&self, order: &Order) -> Result<(), PaymentError> {
        if self.is_admin() {
            return Ok(());
        }
        self.ensure_customer_of(order)
    }

    pub fn ensure_admin(&self) -> Result<(), PaymentError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(PaymentError::AuthorizationError(
                "admin role required".to_string(),
            ))
        }
    }

    pub fn ensure_can_view(&self, order: &Order) -> Result<(), PaymentError> {
        if self.is_admin() || order.is_party(&self.user_id) {
            Ok(())
        } else {
            Err(PaymentError::AuthorizationError(format!(
                "order {} belongs to someone else",
                order.id
            )))
        }
    }
}
