//! Payment orchestration: STK push initiation, the transaction state
//! machine, and the status poller.
//!
//! The state machine is deliberately small. PENDING is the only live
//! state; every other state is terminal and absorbs further results, so
//! the callback and polling paths can race freely.

use crate::database::transactions::{
    NewTransaction, TerminalOutcome, TransactionStatus, TransactionStore,
};
use crate::database::MpesaTransaction;
use crate::error::{AppError, AppErrorKind, AppResult, DomainError};
use crate::mpesa::{PhoneNumber, StkGateway};
use crate::orders::OrderPaymentProjector;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Result codes the gateway uses for a user-side abandon: request
/// cancelled on the handset, and the push timing out unanswered.
const RESULT_CODE_CANCELLED: i64 = 1032;
const RESULT_CODE_PUSH_TIMEOUT: i64 = 1037;

/// Classify a gateway result code into a terminal state.
pub fn classify_result_code(result_code: i64) -> TransactionStatus {
    match result_code {
        0 => TransactionStatus::Success,
        RESULT_CODE_CANCELLED | RESULT_CODE_PUSH_TIMEOUT => TransactionStatus::Cancelled,
        _ => TransactionStatus::Failed,
    }
}

/// Values carried alongside a gateway result (callback metadata).
#[derive(Debug, Clone, Default)]
pub struct ResultValues {
    pub amount: Option<BigDecimal>,
    pub receipt: Option<String>,
    pub transaction_date: Option<DateTime<Utc>>,
    pub phone_number: Option<String>,
}

/// Outcome of feeding a gateway result into the state machine.
#[derive(Debug)]
pub enum Transition {
    /// The transaction moved from PENDING to a terminal state.
    Applied(MpesaTransaction),
    /// The transaction was already terminal; nothing changed.
    AlreadyTerminal,
    /// No transaction carries this checkout reference.
    NotFound,
}

/// A freshly initiated push, as returned to the caller.
#[derive(Debug, Clone)]
pub struct InitiatedPayment {
    pub order_id: i64,
    pub checkout_request_id: String,
    pub customer_message: String,
}

/// Point-in-time view of a transaction for the status endpoint.
#[derive(Debug, Clone)]
pub struct StatusView {
    pub checkout_request_id: String,
    pub order_id: i64,
    pub status: TransactionStatus,
    pub result_desc: Option<String>,
    pub receipt: Option<String>,
}

impl StatusView {
    fn from_transaction(tx: &MpesaTransaction) -> Self {
        Self {
            checkout_request_id: tx.checkout_request_id.clone(),
            order_id: tx.order_id,
            status: tx.status,
            result_desc: tx.result_desc.clone(),
            receipt: tx.mpesa_receipt.clone(),
        }
    }
}

pub struct PaymentService {
    gateway: Arc<dyn StkGateway>,
    store: Arc<dyn TransactionStore>,
    orders: Arc<dyn OrderPaymentProjector>,
    // Per-checkout-reference locks serializing result application.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PaymentService {
    pub fn new(
        gateway: Arc<dyn StkGateway>,
        store: Arc<dyn TransactionStore>,
        orders: Arc<dyn OrderPaymentProjector>,
    ) -> Self {
        Self {
            gateway,
            store,
            orders,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Start an STK push for an order.
    ///
    /// The gateway call happens before any transaction row exists, so a
    /// declined or failed push leaves no record. The PENDING insert is
    /// what closes the race: a concurrent initiation for the same order
    /// loses on the unique index and reports the conflict.
    pub async fn initiate(&self, order_id: i64, raw_phone: &str) -> AppResult<InitiatedPayment> {
        let order = self
            .orders
            .load_order(order_id)
            .await?
            .ok_or_else(|| AppError::new(AppErrorKind::Domain(DomainError::OrderNotFound { order_id })))?;

        let phone = PhoneNumber::normalize(raw_phone)?;

        if let Some(active) = self.store.find_active_for_order(order_id).await? {
            return Err(active_conflict(order_id, &active));
        }

        let accepted = self
            .gateway
            .initiate_stk_push(&phone, &order.total, order_id)
            .await?;

        let inserted = self
            .store
            .insert_pending(NewTransaction {
                order_id,
                checkout_request_id: accepted.checkout_request_id.clone(),
                merchant_request_id: Some(accepted.merchant_request_id.clone()),
                phone_number: phone.as_str().to_string(),
                amount: order.total.clone(),
            })
            .await;

        match inserted {
            Ok(tx) => {
                info!(
                    order_id,
                    checkout_request_id = %tx.checkout_request_id,
                    "Payment initiated"
                );
                Ok(InitiatedPayment {
                    order_id,
                    checkout_request_id: tx.checkout_request_id,
                    customer_message: accepted.customer_message,
                })
            }
            Err(e) if e.is_unique_violation() => {
                // Lost the race to a concurrent initiation.
                warn!(order_id, "Concurrent payment initiation detected");
                match self.store.find_active_for_order(order_id).await? {
                    Some(active) => Err(active_conflict(order_id, &active)),
                    None => Err(AppError::new(AppErrorKind::Domain(
                        DomainError::PaymentInProgress {
                            order_id,
                            checkout_request_id: accepted.checkout_request_id,
                        },
                    ))),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Feed a gateway result (from callback or poll) into the state
    /// machine. Serialized per checkout reference; terminal rows no-op.
    pub async fn apply_result(
        &self,
        checkout_request_id: &str,
        result_code: i64,
        result_desc: &str,
        values: ResultValues,
    ) -> AppResult<Transition> {
        let guard = self.lock_for(checkout_request_id).await;
        let result = self
            .apply_result_locked(checkout_request_id, result_code, result_desc, values)
            .await;
        drop(guard);
        self.release_lock(checkout_request_id).await;
        result
    }

    async fn apply_result_locked(
        &self,
        checkout_request_id: &str,
        result_code: i64,
        result_desc: &str,
        values: ResultValues,
    ) -> AppResult<Transition> {
        let Some(existing) = self.store.find_by_checkout_id(checkout_request_id).await? else {
            return Ok(Transition::NotFound);
        };
        if existing.status.is_terminal() {
            return Ok(Transition::AlreadyTerminal);
        }

        let status = classify_result_code(result_code);
        let transaction_date = match status {
            // A successful payment always gets a timestamp, even when the
            // metadata omitted or mangled it.
            TransactionStatus::Success => Some(values.transaction_date.unwrap_or_else(Utc::now)),
            _ => values.transaction_date,
        };

        let updated = self
            .store
            .mark_terminal(
                checkout_request_id,
                TerminalOutcome {
                    status,
                    result_code,
                    result_desc: result_desc.to_string(),
                    mpesa_receipt: values.receipt.clone(),
                    transaction_date,
                },
            )
            .await?;

        let Some(tx) = updated else {
            // Another path transitioned it between our read and the update.
            return Ok(Transition::AlreadyTerminal);
        };

        info!(
            checkout_request_id,
            order_id = tx.order_id,
            result_code,
            status = %tx.status,
            "Payment result applied"
        );

        match tx.status {
            TransactionStatus::Success => {
                let receipt = tx.mpesa_receipt.clone().unwrap_or_default();
                self.orders.mark_paid(tx.order_id, &receipt).await?;
            }
            TransactionStatus::Failed
            | TransactionStatus::Cancelled
            | TransactionStatus::Timeout => {
                self.orders.mark_payment_failed(tx.order_id).await?;
            }
            TransactionStatus::Pending => {}
        }

        Ok(Transition::Applied(tx))
    }

    /// Current status of a push, polling the gateway if it is still
    /// PENDING. Terminal rows are answered from storage without a
    /// network call.
    pub async fn check_status(&self, checkout_request_id: &str) -> AppResult<StatusView> {
        let tx = self
            .store
            .find_by_checkout_id(checkout_request_id)
            .await?
            .ok_or_else(|| {
                AppError::new(AppErrorKind::Domain(DomainError::TransactionNotFound {
                    checkout_request_id: checkout_request_id.to_string(),
                }))
            })?;

        if tx.status.is_terminal() {
            return Ok(StatusView::from_transaction(&tx));
        }

        // No lock is held here; the query is a network call.
        let result = self.gateway.query_status(checkout_request_id).await?;

        match self
            .apply_result(
                checkout_request_id,
                result.result_code,
                &result.result_desc,
                ResultValues::default(),
            )
            .await?
        {
            Transition::Applied(updated) => Ok(StatusView::from_transaction(&updated)),
            Transition::AlreadyTerminal | Transition::NotFound => {
                let refreshed = self
                    .store
                    .find_by_checkout_id(checkout_request_id)
                    .await?
                    .ok_or_else(|| {
                        AppError::new(AppErrorKind::Domain(DomainError::TransactionNotFound {
                            checkout_request_id: checkout_request_id.to_string(),
                        }))
                    })?;
                Ok(StatusView::from_transaction(&refreshed))
            }
        }
    }

    async fn lock_for(&self, checkout_request_id: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(checkout_request_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Drop the lock entry once nothing else holds it, so the map does
    /// not grow by one entry per payment ever seen.
    async fn release_lock(&self, checkout_request_id: &str) {
        let mut locks = self.locks.lock().await;
        if let Some(lock) = locks.get(checkout_request_id) {
            // Strong count 1 means the map holds the only reference:
            // no guard is alive and no other caller is waiting.
            if Arc::strong_count(lock) == 1 {
                locks.remove(checkout_request_id);
            }
        }
    }

    #[cfg(test)]
    async fn lock_count(&self) -> usize {
        self.locks.lock().await.len()
    }
}

fn active_conflict(order_id: i64, active: &MpesaTransaction) -> AppError {
    let kind = match active.status {
        TransactionStatus::Success => {
            error!(
                order_id,
                checkout_request_id = %active.checkout_request_id,
                "Initiation attempted for an already paid order"
            );
            AppErrorKind::Domain(DomainError::OrderAlreadyPaid { order_id })
        }
        _ => AppErrorKind::Domain(DomainError::PaymentInProgress {
            order_id,
            checkout_request_id: active.checkout_request_id.clone(),
        }),
    };
    AppError::new(kind)
}
