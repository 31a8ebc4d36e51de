//! HTTP surface: payment initiation, status polling, the gateway
//! callback and health endpoints.

pub mod callback;
pub mod health;
pub mod payments;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};

use crate::middleware::logging::{request_logging_middleware, UuidRequestId};
use crate::services::{CallbackProcessor, PaymentService};

/// Shared state for all handlers.
pub struct AppState {
    pub payments: Arc<PaymentService>,
    pub callbacks: Arc<CallbackProcessor>,
    pub pool: PgPool,
}

/// Build the application router with request-id and logging layers.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/payments/mpesa/initiate", post(payments::initiate_payment))
        .route(
            "/api/payments/mpesa/status/{checkout_request_id}",
            get(payments::payment_status),
        )
        .route("/api/payments/mpesa/callback", post(callback::mpesa_callback))
        .route("/health", get(health::health))
        .route("/health/ready", get(health::ready))
        .route("/health/live", get(health::live))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
        .with_state(state)
}
