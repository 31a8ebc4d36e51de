//! Shared test harness: a scriptable gateway mock plus in-memory
//! storage wiring for the payment service.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;

use dukapay_backend::database::InMemoryTransactionStore;
use dukapay_backend::mpesa::types::{StkPushAccepted, StkQueryResult};
use dukapay_backend::mpesa::{MpesaError, MpesaResult, PhoneNumber, StkGateway};
use dukapay_backend::orders::{InMemoryOrderProjector, OrderSummary, PAYMENT_STATUS_UNPAID};
use dukapay_backend::services::{CallbackProcessor, PaymentService};

/// A recorded STK push call.
#[derive(Debug, Clone)]
pub struct PushCall {
    pub phone: String,
    pub amount: BigDecimal,
    pub order_id: i64,
}

/// Gateway double: scripted responses, recorded calls.
#[derive(Default)]
pub struct MockGateway {
    push_responses: Mutex<VecDeque<MpesaResult<StkPushAccepted>>>,
    query_responses: Mutex<VecDeque<MpesaResult<StkQueryResult>>>,
    push_calls: Mutex<Vec<PushCall>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push_push_response(&self, response: MpesaResult<StkPushAccepted>) {
        self.push_responses.lock().await.push_back(response);
    }

    pub async fn push_query_response(&self, response: MpesaResult<StkQueryResult>) {
        self.query_responses.lock().await.push_back(response);
    }

    pub async fn push_calls(&self) -> Vec<PushCall> {
        self.push_calls.lock().await.clone()
    }
}

#[async_trait]
impl StkGateway for MockGateway {
    async fn initiate_stk_push(
        &self,
        phone: &PhoneNumber,
        amount: &BigDecimal,
        order_id: i64,
    ) -> MpesaResult<StkPushAccepted> {
        self.push_calls.lock().await.push(PushCall {
            phone: phone.as_str().to_string(),
            amount: amount.clone(),
            order_id,
        });
        self.push_responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| {
                Err(MpesaError::Network {
                    message: "no scripted push response".to_string(),
                })
            })
    }

    async fn query_status(&self, checkout_request_id: &str) -> MpesaResult<StkQueryResult> {
        self.query_responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| {
                Err(MpesaError::Network {
                    message: format!("no scripted query response for {}", checkout_request_id),
                })
            })
    }
}

pub fn accepted_push(checkout_request_id: &str) -> StkPushAccepted {
    StkPushAccepted {
        checkout_request_id: checkout_request_id.to_string(),
        merchant_request_id: "29115-34620561-1".to_string(),
        customer_message: "Success. Request accepted for processing".to_string(),
    }
}

pub fn query_result(checkout_request_id: &str, result_code: i64, desc: &str) -> StkQueryResult {
    StkQueryResult {
        result_code,
        result_desc: desc.to_string(),
        checkout_request_id: checkout_request_id.to_string(),
        merchant_request_id: Some("29115-34620561-1".to_string()),
    }
}

pub fn order(id: i64, total: &str) -> OrderSummary {
    OrderSummary {
        id,
        total: BigDecimal::from_str(total).unwrap(),
        payment_status: PAYMENT_STATUS_UNPAID.to_string(),
        complete: false,
    }
}

/// Fully wired service over mocks and in-memory storage.
pub struct Harness {
    pub gateway: Arc<MockGateway>,
    pub store: Arc<InMemoryTransactionStore>,
    pub orders: Arc<InMemoryOrderProjector>,
    pub payments: Arc<PaymentService>,
}

impl Harness {
    pub fn new() -> Self {
        let gateway = Arc::new(MockGateway::new());
        let store = Arc::new(InMemoryTransactionStore::new());
        let orders = Arc::new(InMemoryOrderProjector::new());
        let payments = Arc::new(PaymentService::new(
            gateway.clone(),
            store.clone(),
            orders.clone(),
        ));
        Self {
            gateway,
            store,
            orders,
            payments,
        }
    }

    pub fn callbacks(&self) -> CallbackProcessor {
        CallbackProcessor::new(self.payments.clone())
    }
}
