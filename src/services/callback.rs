//! Callback reconciliation for gateway result deliveries.
//!
//! The callback endpoint is unauthenticated and the gateway retries on
//! anything but an ack, so this processor is strictly defensive: every
//! parseable payload is acknowledged, whatever happens internally. The
//! checkout reference is the only value trusted for correlation.

use crate::mpesa::types::{CallbackAck, CallbackEnvelope, MetadataItem, StkCallback};
use crate::services::payment::{PaymentService, ResultValues, Transition};
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value as JsonValue;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct CallbackProcessor {
    payments: Arc<PaymentService>,
}

impl CallbackProcessor {
    pub fn new(payments: Arc<PaymentService>) -> Self {
        Self { payments }
    }

    /// Reconcile one callback delivery. Always returns the accepted ack;
    /// the transport layer only rejects payloads that fail JSON parsing.
    pub async fn handle(&self, payload: &JsonValue) -> CallbackAck {
        let envelope: CallbackEnvelope = match serde_json::from_value(payload.clone()) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Callback payload has unexpected shape");
                return CallbackAck::accepted();
            }
        };

        let Some(callback) = envelope.body.and_then(|b| b.stk_callback) else {
            warn!("Callback payload missing Body.stkCallback");
            return CallbackAck::accepted();
        };

        let Some(checkout_request_id) = callback.checkout_request_id.clone() else {
            warn!("Callback missing CheckoutRequestID, cannot correlate");
            return CallbackAck::accepted();
        };

        let Some(result_code) = callback.result_code else {
            warn!(%checkout_request_id, "Callback missing ResultCode");
            return CallbackAck::accepted();
        };

        let result_desc = callback.result_desc.clone().unwrap_or_default();
        let values = extract_values(&callback);

        match self
            .payments
            .apply_result(&checkout_request_id, result_code, &result_desc, values)
            .await
        {
            Ok(Transition::Applied(tx)) => {
                info!(
                    %checkout_request_id,
                    order_id = tx.order_id,
                    status = %tx.status,
                    "Callback reconciled"
                );
            }
            Ok(Transition::AlreadyTerminal) => {
                info!(%checkout_request_id, "Duplicate callback delivery ignored");
            }
            Ok(Transition::NotFound) => {
                warn!(%checkout_request_id, "Callback for unknown transaction");
            }
            Err(e) => {
                // Ack anyway: a retry would hit the same fault, and the
                // poller can reconcile later.
                error!(%checkout_request_id, error = %e, "Callback reconciliation failed");
            }
        }

        CallbackAck::accepted()
    }
}

/// Pull the known metadata values out of `CallbackMetadata.Item`,
/// matching by `Name` regardless of order.
fn extract_values(callback: &StkCallback) -> ResultValues {
    let mut values = ResultValues::default();
    let Some(metadata) = callback.callback_metadata.as_ref() else {
        return values;
    };

    for item in &metadata.item {
        match item.name.as_str() {
            "Amount" => values.amount = item_decimal(item),
            "MpesaReceiptNumber" => values.receipt = item_string(item),
            "TransactionDate" => values.transaction_date = item_date(item),
            "PhoneNumber" => values.phone_number = item_string(item),
            _ => {}
        }
    }
    values
}

fn item_string(item: &MetadataItem) -> Option<String> {
    match item.value.as_ref()? {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn item_decimal(item: &MetadataItem) -> Option<BigDecimal> {
    match item.value.as_ref()? {
        JsonValue::Number(n) => BigDecimal::from_str(&n.to_string()).ok(),
        JsonValue::String(s) => BigDecimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

/// Transaction dates arrive as `YYYYMMDDHHMMSS`, usually as a JSON
/// number. Unparseable values are dropped; the state machine falls back
/// to the reconciliation time.
fn item_date(item: &MetadataItem) -> Option<DateTime<Utc>> {
    let raw = item_string(item)?;
    let naive = NaiveDateTime::parse_from_str(&raw, "%Y%m%d%H%M%S").ok()?;
    Some(naive.and_utc())
}
