use crate::error::PaymentError;
use axum::Json;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);
pub type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn status_for(err: &PaymentError) -> StatusCode {
    match err {
        PaymentError::ValidationError(_)
        | PaymentError::InvalidTransition { .. }
        | PaymentError::GatewayError(_) => StatusCode::BAD_REQUEST,
        PaymentError::AuthenticationError(_) => StatusCode::UNAUTHORIZED,
        PaymentError::AuthorizationError(_) => StatusCode::FORBIDDEN,
        PaymentError::NotFoundError(_) => StatusCode::NOT_FOUND,
        PaymentError::CsvError(_)
        | PaymentError::IoError(_)
        | PaymentError::StorageError(_)
        | PaymentError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Converts a service error into the JSON error body. Server faults are
/// logged and answered with a fixed message.
pub fn api_error(err: PaymentError) -> ApiError {
    let status = status_for(&err);
    let message = match &err {
        PaymentError::GatewayError(e) => format!("Payment could not be processed: {}", e),
        _ if status.is_server_error() => {
            tracing::error!(error = %err, "request failed");
            "Internal server error".to_string()
        }
        _ => err.to_string(),
    };
    (status, Json(ErrorResponse { error: message }))
}
