//! HTTP surface of the order payment service.
//!
//! Identity comes from the `x-user-id` and `x-user-role` headers set by the
//! fronting gateway; the cron endpoint is guarded by a shared secret instead.

pub mod auth;
pub mod error;
pub mod handlers;

use crate::application::orders::OrderService;
use crate::application::scheduler::CaptureScheduler;
use crate::application::settlement::SettlementEngine;
use axum::Router;
use axum::routing::{get, post};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub orders: Arc<OrderService>,
    pub scheduler: Arc<CaptureScheduler>,
    pub settlement: Arc<SettlementEngine>,
    pub cron_secret: Option<String>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/orders/{id}", get(handlers::get_order))
        .route("/orders/{id}/payments", get(handlers::get_payments))
        .route("/orders/{id}/authorize", post(handlers::authorize_order))
        .route("/orders/{id}/cancel", post(handlers::cancel_order))
        .route("/orders/{id}/start", post(handlers::start_order))
        .route("/orders/{id}/complete", post(handlers::complete_order))
        .route("/orders/{id}/settle", post(handlers::settle_order))
        .route("/cron/capture-deposits", post(handlers::capture_deposits))
        .with_state(state)
}
