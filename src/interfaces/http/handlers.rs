use super::AppState;
use super::auth::{caller_from_headers, ensure_cron_authorized};
use super::error::{ApiError, ApiResult, api_error};
use crate::application::orders::CompletionAction;
use crate::application::scheduler::CaptureReport;
use crate::application::settlement::SettlementOutcome;
use crate::domain::caller::Caller;
use crate::domain::ledger::Payment;
use crate::domain::order::{Order, OrderStatus};
use crate::error::PaymentError;
use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeRequest {
    pub external_payment_reference: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub status: OrderStatus,
    pub forfeited_amount: Decimal,
    pub refund_amount: Decimal,
}

fn caller(headers: &HeaderMap) -> Result<Caller, ApiError> {
    caller_from_headers(headers).map_err(api_error)
}

/// Decodes a JSON body, answering 400 for anything malformed.
fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body)
        .map_err(|e| api_error(PaymentError::ValidationError(format!("invalid body: {}", e))))
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Order> {
    let caller = caller(&headers)?;
    let order = state.orders.get_order(&caller, id).await.map_err(api_error)?;
    Ok(Json(order))
}

pub async fn get_payments(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Vec<Payment>> {
    let caller = caller(&headers)?;
    let payments = state.orders.payments(&caller, id).await.map_err(api_error)?;
    Ok(Json(payments))
}

pub async fn authorize_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Order> {
    let caller = caller(&headers)?;
    let request: AuthorizeRequest = parse_body(&body)?;
    let order = state
        .orders
        .authorize(&caller, id, &request.external_payment_reference)
        .await
        .map_err(api_error)?;
    Ok(Json(order))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<CancelResponse> {
    let caller = caller(&headers)?;
    let request: CancelRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CancelRequest::default()
    } else {
        parse_body(&body)?
    };
    let outcome = state
        .orders
        .cancel(&caller, id, request.reason)
        .await
        .map_err(api_error)?;
    Ok(Json(CancelResponse {
        status: outcome.order.status,
        forfeited_amount: outcome.quote.forfeited_amount,
        refund_amount: outcome.quote.refund_amount,
    }))
}

pub async fn start_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Order> {
    let caller = caller(&headers)?;
    let order = state.orders.start(&caller, id).await.map_err(api_error)?;
    Ok(Json(order))
}

pub async fn complete_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Order> {
    let caller = caller(&headers)?;
    let action: CompletionAction = parse_body(&body)?;
    let order = state
        .orders
        .complete(&caller, id, action)
        .await
        .map_err(api_error)?;
    Ok(Json(order))
}

pub async fn settle_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<SettlementOutcome> {
    let caller = caller(&headers)?;
    let outcome = state
        .settlement
        .settle(&caller, id)
        .await
        .map_err(api_error)?;
    Ok(Json(outcome))
}

/// One capture batch. Per-order failures are reported in the body, never
/// as an error status.
pub async fn capture_deposits(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<CaptureReport> {
    ensure_cron_authorized(&headers, state.cron_secret.as_deref()).map_err(api_error)?;
    let report = state.scheduler.run().await.map_err(api_error)?;
    Ok(Json(report))
}
