//! Health endpoints: liveness, readiness and an overall status view.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

use crate::api::AppState;
use crate::database;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let database_up = database::health_check(&state.pool).await.is_ok();
    let (status_code, status, database) = if database_up {
        (StatusCode::OK, "healthy", "up")
    } else {
        warn!("Health check: database unreachable");
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy", "down")
    };

    (
        status_code,
        Json(HealthResponse {
            status,
            database,
            timestamp: chrono::Utc::now(),
        }),
    )
}

/// GET /health/ready
pub async fn ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match database::health_check(&state.pool).await {
        Ok(()) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// GET /health/live
pub async fn live() -> impl IntoResponse {
    StatusCode::OK
}
