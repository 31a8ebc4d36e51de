use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::api::AppState;
use crate::error::AppResult;

#[derive(Debug, Deserialize)]
pub struct InitiateRequest {
    pub phone_number: String,
    pub order_id: i64,
}

#[derive(Debug, Serialize)]
pub struct InitiateResponse {
    pub success: bool,
    pub checkout_request_id: String,
    pub customer_message: String,
    pub order_id: i64,
}

/// POST /api/payments/mpesa/initiate
pub async fn initiate_payment(
    State(state): State<Arc<AppState>>,
    Json(request): Json<InitiateRequest>,
) -> AppResult<Json<InitiateResponse>> {
    info!(order_id = request.order_id, "Payment initiation requested");

    let initiated = state
        .payments
        .initiate(request.order_id, &request.phone_number)
        .await?;

    Ok(Json(InitiateResponse {
        success: true,
        checkout_request_id: initiated.checkout_request_id,
        customer_message: initiated.customer_message,
        order_id: initiated.order_id,
    }))
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub checkout_request_id: String,
    pub order_id: i64,
    pub status: String,
    pub result_desc: Option<String>,
    pub receipt: Option<String>,
}

/// GET /api/payments/mpesa/status/{checkout_request_id}
pub async fn payment_status(
    State(state): State<Arc<AppState>>,
    Path(checkout_request_id): Path<String>,
) -> AppResult<Json<StatusResponse>> {
    let view = state.payments.check_status(&checkout_request_id).await?;

    Ok(Json(StatusResponse {
        checkout_request_id: view.checkout_request_id,
        order_id: view.order_id,
        status: view.status.to_string(),
        result_desc: view.result_desc,
        receipt: view.receipt,
    }))
}
