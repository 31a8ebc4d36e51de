use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{info, warn};

use crate::api::AppState;
use crate::mpesa::types::CallbackAck;

/// POST /api/payments/mpesa/callback
///
/// The gateway retries deliveries that are not acknowledged, so this
/// handler answers `{ResultCode: 0, ResultDesc: "Accepted"}` for every
/// payload that parses as JSON. Only malformed JSON is rejected, with
/// `ResultCode: 1`.
pub async fn mpesa_callback(
    State(state): State<Arc<AppState>>,
    body: String,
) -> impl IntoResponse {
    let payload: JsonValue = match serde_json::from_str(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "Callback body is not valid JSON");
            return (StatusCode::OK, Json(CallbackAck::rejected("Invalid JSON")));
        }
    };

    info!("Received payment callback");
    let ack = state.callbacks.handle(&payload).await;
    (StatusCode::OK, Json(ack))
}
