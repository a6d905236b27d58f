use crate::domain::order::OrderStatus;
use thiserror::Error;

/// Failures reported by the external payment gateway.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("payment instrument is not ready to capture: {0}")]
    NotReady(String),
    #[error("authorized amount {authorized} does not match expected {expected}")]
    AmountMismatch {
        expected: rust_decimal::Decimal,
        authorized: rust_decimal::Decimal,
    },
    #[error("gateway declined the request: {0}")]
    Declined(String),
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
    #[error("gateway call timed out")]
    Timeout,
}

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Authentication required: {0}")]
    AuthenticationError(String),
    #[error("Not allowed: {0}")]
    AuthorizationError(String),
    #[error("Not found: {0}")]
    NotFoundError(String),
    #[error("Cannot {action} order in status {current}")]
    InvalidTransition {
        current: OrderStatus,
        action: &'static str,
    },
    #[error("Gateway error: {0}")]
    GatewayError(#[from] GatewayError),
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("Internal error: {0}")]
    InternalError(#[from] Box<dyn std::error::Error + Send + Sync>),
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for PaymentError {
    fn from(err: rocksdb::Error) -> Self {
        PaymentError::StorageError(err.to_string())
    }
}

impl From<serde_json::Error> for PaymentError {
    fn from(err: serde_json::Error) -> Self {
        PaymentError::StorageError(format!("Serialization error: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, PaymentError>;
