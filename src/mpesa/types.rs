//! Wire types for the Daraja API.
//!
//! Responses are parsed defensively: every field the gateway may omit is an
//! `Option`, and result codes are accepted as either JSON numbers or
//! strings (the push/query endpoints and the callback disagree on this).

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

/// OAuth token exchange response: `{access_token, expires_in}`.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default, deserialize_with = "de_opt_i64")]
    pub expires_in: Option<i64>,
}

/// STK push request body.
#[derive(Debug, Serialize)]
pub struct StkPushRequest {
    #[serde(rename = "BusinessShortCode")]
    pub business_short_code: String,
    #[serde(rename = "Password")]
    pub password: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "TransactionType")]
    pub transaction_type: String,
    #[serde(rename = "Amount")]
    pub amount: u64,
    #[serde(rename = "PartyA")]
    pub party_a: String,
    #[serde(rename = "PartyB")]
    pub party_b: String,
    #[serde(rename = "PhoneNumber")]
    pub phone_number: String,
    #[serde(rename = "CallBackURL")]
    pub callback_url: String,
    #[serde(rename = "AccountReference")]
    pub account_reference: String,
    #[serde(rename = "TransactionDesc")]
    pub transaction_desc: String,
}

/// STK push response body.
#[derive(Debug, Deserialize)]
pub struct StkPushResponse {
    #[serde(rename = "ResponseCode", default)]
    pub response_code: Option<String>,
    #[serde(rename = "ResponseDescription", default)]
    pub response_description: Option<String>,
    #[serde(rename = "CheckoutRequestID", default)]
    pub checkout_request_id: Option<String>,
    #[serde(rename = "MerchantRequestID", default)]
    pub merchant_request_id: Option<String>,
    #[serde(rename = "CustomerMessage", default)]
    pub customer_message: Option<String>,
}

/// Accepted STK push, parsed into the fields the state machine needs.
#[derive(Debug, Clone)]
pub struct StkPushAccepted {
    pub checkout_request_id: String,
    pub merchant_request_id: String,
    pub customer_message: String,
}

/// STK push status query request body.
#[derive(Debug, Serialize)]
pub struct StkQueryRequest {
    #[serde(rename = "BusinessShortCode")]
    pub business_short_code: String,
    #[serde(rename = "Password")]
    pub password: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
}

/// STK push status query response body.
#[derive(Debug, Deserialize)]
pub struct StkQueryResponse {
    #[serde(rename = "ResultCode", default, deserialize_with = "de_opt_i64")]
    pub result_code: Option<i64>,
    #[serde(rename = "ResultDesc", default)]
    pub result_desc: Option<String>,
    #[serde(rename = "CheckoutRequestID", default)]
    pub checkout_request_id: Option<String>,
    #[serde(rename = "MerchantRequestID", default)]
    pub merchant_request_id: Option<String>,
}

/// Parsed query result.
#[derive(Debug, Clone)]
pub struct StkQueryResult {
    pub result_code: i64,
    pub result_desc: String,
    pub checkout_request_id: String,
    pub merchant_request_id: Option<String>,
}

/// Callback envelope: `Body.stkCallback.{...}`.
#[derive(Debug, Deserialize)]
pub struct CallbackEnvelope {
    #[serde(rename = "Body", default)]
    pub body: Option<CallbackBody>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackBody {
    #[serde(rename = "stkCallback", default)]
    pub stk_callback: Option<StkCallback>,
}

#[derive(Debug, Deserialize)]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID", default)]
    pub merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID", default)]
    pub checkout_request_id: Option<String>,
    #[serde(rename = "ResultCode", default, deserialize_with = "de_opt_i64")]
    pub result_code: Option<i64>,
    #[serde(rename = "ResultDesc", default)]
    pub result_desc: Option<String>,
    #[serde(rename = "CallbackMetadata", default)]
    pub callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Deserialize, Default)]
pub struct CallbackMetadata {
    #[serde(rename = "Item", default)]
    pub item: Vec<MetadataItem>,
}

#[derive(Debug, Deserialize)]
pub struct MetadataItem {
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Value", default)]
    pub value: Option<JsonValue>,
}

/// Acknowledgment returned to the gateway for every callback delivery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallbackAck {
    #[serde(rename = "ResultCode")]
    pub result_code: i64,
    #[serde(rename = "ResultDesc")]
    pub result_desc: String,
}

impl CallbackAck {
    /// The ack the gateway expects for any recognized/handled delivery.
    pub fn accepted() -> Self {
        Self {
            result_code: 0,
            result_desc: "Accepted".to_string(),
        }
    }

    /// Only for payloads that fail JSON parsing at the transport layer.
    pub fn rejected(desc: impl Into<String>) -> Self {
        Self {
            result_code: 1,
            result_desc: desc.into(),
        }
    }
}

/// Accept an integer field encoded as either a JSON number or a string.
fn de_opt_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    Ok(match value {
        Some(JsonValue::Number(n)) => n.as_i64(),
        Some(JsonValue::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_response_accepts_string_result_code() {
        let body = serde_json::json!({
            "ResponseCode": "0",
            "ResponseDescription": "The service request has been accepted successsfully",
            "MerchantRequestID": "22205-34066-1",
            "CheckoutRequestID": "ws_CO_191220191020363925",
            "ResultCode": "1032",
            "ResultDesc": "Request cancelled by user"
        });
        let parsed: StkQueryResponse = serde_json::from_value(body).expect("should parse");
        assert_eq!(parsed.result_code, Some(1032));
    }

    #[test]
    fn callback_parses_nested_payload() {
        let body = serde_json::json!({
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "29115-34620561-1",
                    "CheckoutRequestID": "ws_CO_191220191020363925",
                    "ResultCode": 0,
                    "ResultDesc": "The service request is processed successfully.",
                    "CallbackMetadata": {
                        "Item": [
                            {"Name": "Amount", "Value": 1.00},
                            {"Name": "MpesaReceiptNumber", "Value": "NLJ7RT61SV"},
                            {"Name": "TransactionDate", "Value": 20191219102115_i64},
                            {"Name": "PhoneNumber", "Value": 254708374149_i64}
                        ]
                    }
                }
            }
        });
        let parsed: CallbackEnvelope = serde_json::from_value(body).expect("should parse");
        let callback = parsed.body.unwrap().stk_callback.unwrap();
        assert_eq!(callback.result_code, Some(0));
        assert_eq!(
            callback.checkout_request_id.as_deref(),
            Some("ws_CO_191220191020363925")
        );
        assert_eq!(callback.callback_metadata.unwrap().item.len(), 4);
    }

    #[test]
    fn callback_tolerates_missing_fields() {
        let parsed: CallbackEnvelope =
            serde_json::from_value(serde_json::json!({"Body": {}})).expect("should parse");
        assert!(parsed.body.unwrap().stk_callback.is_none());

        let parsed: CallbackEnvelope =
            serde_json::from_value(serde_json::json!({})).expect("should parse");
        assert!(parsed.body.is_none());
    }

    #[test]
    fn push_request_serializes_with_gateway_field_names() {
        let request = StkPushRequest {
            business_short_code: "174379".to_string(),
            password: "cGFzc3dvcmQ=".to_string(),
            timestamp: "20240101120000".to_string(),
            transaction_type: "CustomerPayBillOnline".to_string(),
            amount: 100,
            party_a: "254712345678".to_string(),
            party_b: "174379".to_string(),
            phone_number: "254712345678".to_string(),
            callback_url: "https://example.com/callback".to_string(),
            account_reference: "Order-7".to_string(),
            transaction_desc: "Payment for Order #7".to_string(),
        };
        let json = serde_json::to_value(&request).expect("should serialize");
        assert_eq!(json["BusinessShortCode"], "174379");
        assert_eq!(json["TransactionType"], "CustomerPayBillOnline");
        assert_eq!(json["Amount"], 100);
        assert_eq!(json["CallBackURL"], "https://example.com/callback");
    }

    #[test]
    fn callback_ack_serializes_gateway_shape() {
        let ack = serde_json::to_value(CallbackAck::accepted()).expect("should serialize");
        assert_eq!(ack["ResultCode"], 0);
        assert_eq!(ack["ResultDesc"], "Accepted");
    }
}
