//! STK push client for the Daraja API.
//!
//! `StkGateway` is the seam the payment service depends on; `DarajaClient`
//! is the production implementation talking to the real gateway.

use crate::config::MpesaConfig;
use crate::mpesa::error::{MpesaError, MpesaResult};
use crate::mpesa::phone::PhoneNumber;
use crate::mpesa::token::TokenManager;
use crate::mpesa::types::{
    StkPushAccepted, StkPushRequest, StkPushResponse, StkQueryRequest, StkQueryResponse,
    StkQueryResult,
};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bigdecimal::{BigDecimal, RoundingMode, ToPrimitive};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

const STK_PUSH_PATH: &str = "/mpesa/stkpush/v1/processrequest";
const STK_QUERY_PATH: &str = "/mpesa/stkpushquery/v1/query";
const TRANSACTION_TYPE: &str = "CustomerPayBillOnline";

/// Gateway password timestamp, `YYYYMMDDHHMMSS`.
pub fn stk_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d%H%M%S").to_string()
}

/// STK password: `base64(shortcode + passkey + timestamp)`.
pub fn stk_password(shortcode: &str, passkey: &str, timestamp: &str) -> String {
    BASE64.encode(format!("{}{}{}", shortcode, passkey, timestamp))
}

/// The gateway only takes whole shillings: floor the order total, and
/// never charge less than 1. Totals beyond `u64` saturate rather than
/// silently collapsing to the minimum.
pub fn charge_amount(total: &BigDecimal) -> u64 {
    let floored = total.with_scale_round(0, RoundingMode::Floor);
    if floored < BigDecimal::from(0) {
        return 1;
    }
    floored.to_u64().unwrap_or(u64::MAX).max(1)
}

/// Operations the payment service needs from the STK gateway.
#[async_trait]
pub trait StkGateway: Send + Sync {
    /// Prompt the subscriber to authorize a payment for an order.
    async fn initiate_stk_push(
        &self,
        phone: &PhoneNumber,
        amount: &BigDecimal,
        order_id: i64,
    ) -> MpesaResult<StkPushAccepted>;

    /// Ask the gateway for the current result of a push.
    async fn query_status(&self, checkout_request_id: &str) -> MpesaResult<StkQueryResult>;
}

/// Production STK gateway backed by the Daraja HTTP API.
pub struct DarajaClient {
    config: MpesaConfig,
    tokens: Arc<TokenManager>,
    http: reqwest::Client,
}

impl DarajaClient {
    pub fn new(config: MpesaConfig, tokens: Arc<TokenManager>) -> MpesaResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| MpesaError::Network {
                message: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            config,
            tokens,
            http,
        })
    }

    fn password_at(&self, at: DateTime<Utc>) -> (String, String) {
        let timestamp = stk_timestamp(at);
        let password = stk_password(
            &self.config.business_shortcode,
            &self.config.passkey,
            &timestamp,
        );
        (password, timestamp)
    }

    async fn post_json<Req, Resp>(&self, path: &str, request: &Req) -> MpesaResult<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let token = self.tokens.bearer_token().await?;
        let url = format!("{}{}", self.config.base_url, path);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&token)
            .json(request)
            .send()
            .await
            .map_err(|e| MpesaError::from_reqwest(e, self.config.timeout_secs))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            self.tokens.invalidate().await;
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), path, "Gateway returned an error");
            return Err(MpesaError::GatewayHttp {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<Resp>()
            .await
            .map_err(|e| MpesaError::MalformedResponse {
                message: format!("failed to parse gateway response: {}", e),
            })
    }
}

#[async_trait]
impl StkGateway for DarajaClient {
    async fn initiate_stk_push(
        &self,
        phone: &PhoneNumber,
        amount: &BigDecimal,
        order_id: i64,
    ) -> MpesaResult<StkPushAccepted> {
        let (password, timestamp) = self.password_at(Utc::now());
        let request = StkPushRequest {
            business_short_code: self.config.business_shortcode.clone(),
            password,
            timestamp,
            transaction_type: TRANSACTION_TYPE.to_string(),
            amount: charge_amount(amount),
            party_a: phone.as_str().to_string(),
            party_b: self.config.business_shortcode.clone(),
            phone_number: phone.as_str().to_string(),
            callback_url: self.config.callback_url.clone(),
            account_reference: format!("Order-{}", order_id),
            transaction_desc: format!("Payment for Order #{}", order_id),
        };

        let response: StkPushResponse = self.post_json(STK_PUSH_PATH, &request).await?;

        match response.response_code.as_deref() {
            Some("0") => {
                let checkout_request_id = response.checkout_request_id.ok_or_else(|| {
                    MpesaError::MalformedResponse {
                        message: "accepted push missing CheckoutRequestID".to_string(),
                    }
                })?;
                info!(order_id, checkout_request_id, "STK push accepted");
                Ok(StkPushAccepted {
                    checkout_request_id,
                    merchant_request_id: response.merchant_request_id.unwrap_or_default(),
                    customer_message: response
                        .customer_message
                        .unwrap_or_else(|| "Payment request sent to your phone".to_string()),
                })
            }
            code => {
                let error_message = response
                    .response_description
                    .unwrap_or_else(|| "gateway declined the push request".to_string());
                warn!(order_id, code = ?code, %error_message, "STK push rejected");
                Err(MpesaError::GatewayRejected {
                    error_code: code.map(str::to_string),
                    error_message,
                    customer_message: response
                        .customer_message
                        .unwrap_or_else(|| "Payment request failed. Please try again.".to_string()),
                })
            }
        }
    }

    async fn query_status(&self, checkout_request_id: &str) -> MpesaResult<StkQueryResult> {
        let (password, timestamp) = self.password_at(Utc::now());
        let request = StkQueryRequest {
            business_short_code: self.config.business_shortcode.clone(),
            password,
            timestamp,
            checkout_request_id: checkout_request_id.to_string(),
        };

        let response: StkQueryResponse = self.post_json(STK_QUERY_PATH, &request).await?;

        let result_code = response
            .result_code
            .ok_or_else(|| MpesaError::MalformedResponse {
                message: "query response missing ResultCode".to_string(),
            })?;

        Ok(StkQueryResult {
            result_code,
            result_desc: response.result_desc.unwrap_or_default(),
            checkout_request_id: response
                .checkout_request_id
                .unwrap_or_else(|| checkout_request_id.to_string()),
            merchant_request_id: response.merchant_request_id,
        })
    }
}
