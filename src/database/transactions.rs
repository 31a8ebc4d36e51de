//! Persistence for STK push transactions.
//!
//! The `TransactionStore` trait is the seam between the payment service
//! and storage. `PgTransactionStore` is the production implementation;
//! `InMemoryTransactionStore` backs tests and local development.
//!
//! Two invariants live in the schema and are mirrored here:
//! - `checkout_request_id` is globally unique (correlation key).
//! - at most one transaction per order may be PENDING or SUCCESS at a
//!   time, enforced by a partial unique index so the check-then-create
//!   is atomic under concurrency.

use crate::database::error::DatabaseError;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Lifecycle of an STK push transaction. PENDING is the only
/// non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
    Cancelled,
    Timeout,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Success => "SUCCESS",
            TransactionStatus::Failed => "FAILED",
            TransactionStatus::Cancelled => "CANCELLED",
            TransactionStatus::Timeout => "TIMEOUT",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DatabaseError> {
        match s {
            "PENDING" => Ok(TransactionStatus::Pending),
            "SUCCESS" => Ok(TransactionStatus::Success),
            "FAILED" => Ok(TransactionStatus::Failed),
            "CANCELLED" => Ok(TransactionStatus::Cancelled),
            "TIMEOUT" => Ok(TransactionStatus::Timeout),
            other => Err(DatabaseError::Query {
                message: format!("unknown transaction status {:?}", other),
            }),
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored STK push transaction.
#[derive(Debug, Clone)]
pub struct MpesaTransaction {
    pub id: i64,
    pub order_id: i64,
    pub checkout_request_id: String,
    pub merchant_request_id: Option<String>,
    pub phone_number: String,
    pub amount: BigDecimal,
    pub status: TransactionStatus,
    pub result_code: Option<i64>,
    pub result_desc: Option<String>,
    pub mpesa_receipt: Option<String>,
    pub transaction_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for a new PENDING transaction.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub order_id: i64,
    pub checkout_request_id: String,
    pub merchant_request_id: Option<String>,
    pub phone_number: String,
    pub amount: BigDecimal,
}

/// The terminal outcome applied by a callback or status poll.
#[derive(Debug, Clone)]
pub struct TerminalOutcome {
    pub status: TransactionStatus,
    pub result_code: i64,
    pub result_desc: String,
    pub mpesa_receipt: Option<String>,
    pub transaction_date: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Insert a new PENDING transaction. Fails with a unique violation
    /// if the order already has an active (PENDING or SUCCESS) one.
    async fn insert_pending(&self, new: NewTransaction)
        -> Result<MpesaTransaction, DatabaseError>;

    async fn find_by_checkout_id(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<MpesaTransaction>, DatabaseError>;

    /// The order's PENDING or SUCCESS transaction, if any.
    async fn find_active_for_order(
        &self,
        order_id: i64,
    ) -> Result<Option<MpesaTransaction>, DatabaseError>;

    /// Move a PENDING transaction to a terminal state. Returns `None`
    /// when the transaction is already terminal (or unknown), which makes
    /// duplicate callback deliveries a no-op.
    async fn mark_terminal(
        &self,
        checkout_request_id: &str,
        outcome: TerminalOutcome,
    ) -> Result<Option<MpesaTransaction>, DatabaseError>;
}

#[derive(Debug, FromRow)]
struct TransactionRow {
    id: i64,
    order_id: i64,
    checkout_request_id: String,
    merchant_request_id: Option<String>,
    phone_number: String,
    amount: BigDecimal,
    status: String,
    result_code: Option<i64>,
    result_desc: Option<String>,
    mpesa_receipt: Option<String>,
    transaction_date: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TransactionRow {
    fn into_transaction(self) -> Result<MpesaTransaction, DatabaseError> {
        Ok(MpesaTransaction {
            id: self.id,
            order_id: self.order_id,
            checkout_request_id: self.checkout_request_id,
            merchant_request_id: self.merchant_request_id,
            phone_number: self.phone_number,
            amount: self.amount,
            status: TransactionStatus::parse(&self.status)?,
            result_code: self.result_code,
            result_desc: self.result_desc,
            mpesa_receipt: self.mpesa_receipt,
            transaction_date: self.transaction_date,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const TRANSACTION_COLUMNS: &str = "id, order_id, checkout_request_id, merchant_request_id, \
     phone_number, amount, status, result_code, result_desc, mpesa_receipt, \
     transaction_date, created_at, updated_at";

/// Postgres-backed transaction store.
pub struct PgTransactionStore {
    pool: PgPool,
}

impl PgTransactionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionStore for PgTransactionStore {
    async fn insert_pending(
        &self,
        new: NewTransaction,
    ) -> Result<MpesaTransaction, DatabaseError> {
        let query = format!(
            "INSERT INTO mpesa_transactions \
             (order_id, checkout_request_id, merchant_request_id, phone_number, amount, status) \
             VALUES ($1, $2, $3, $4, $5, 'PENDING') \
             RETURNING {}",
            TRANSACTION_COLUMNS
        );
        let row = sqlx::query_as::<_, TransactionRow>(&query)
            .bind(new.order_id)
            .bind(&new.checkout_request_id)
            .bind(&new.merchant_request_id)
            .bind(&new.phone_number)
            .bind(&new.amount)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        row.into_transaction()
    }

    async fn find_by_checkout_id(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<MpesaTransaction>, DatabaseError> {
        let query = format!(
            "SELECT {} FROM mpesa_transactions WHERE checkout_request_id = $1",
            TRANSACTION_COLUMNS
        );
        let row = sqlx::query_as::<_, TransactionRow>(&query)
            .bind(checkout_request_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        row.map(TransactionRow::into_transaction).transpose()
    }

    async fn find_active_for_order(
        &self,
        order_id: i64,
    ) -> Result<Option<MpesaTransaction>, DatabaseError> {
        let query = format!(
            "SELECT {} FROM mpesa_transactions \
             WHERE order_id = $1 AND status IN ('PENDING', 'SUCCESS') \
             ORDER BY created_at DESC LIMIT 1",
            TRANSACTION_COLUMNS
        );
        let row = sqlx::query_as::<_, TransactionRow>(&query)
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        row.map(TransactionRow::into_transaction).transpose()
    }

    async fn mark_terminal(
        &self,
        checkout_request_id: &str,
        outcome: TerminalOutcome,
    ) -> Result<Option<MpesaTransaction>, DatabaseError> {
        // Conditional on PENDING so replays of the same outcome are no-ops.
        let query = format!(
            "UPDATE mpesa_transactions \
             SET status = $2, result_code = $3, result_desc = $4, \
                 mpesa_receipt = $5, transaction_date = $6, updated_at = NOW() \
             WHERE checkout_request_id = $1 AND status = 'PENDING' \
             RETURNING {}",
            TRANSACTION_COLUMNS
        );
        let row = sqlx::query_as::<_, TransactionRow>(&query)
            .bind(checkout_request_id)
            .bind(outcome.status.as_str())
            .bind(outcome.result_code)
            .bind(&outcome.result_desc)
            .bind(&outcome.mpesa_receipt)
            .bind(outcome.transaction_date)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        row.map(TransactionRow::into_transaction).transpose()
    }
}

/// In-memory transaction store with the same invariants as the Postgres
/// schema. Keyed by checkout request id.
#[derive(Default)]
pub struct InMemoryTransactionStore {
    inner: Mutex<InMemoryState>,
}

#[derive(Default)]
struct InMemoryState {
    transactions: HashMap<String, MpesaTransaction>,
    next_id: i64,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all stored transactions, for test assertions.
    pub async fn all(&self) -> Vec<MpesaTransaction> {
        let state = self.inner.lock().await;
        let mut transactions: Vec<_> = state.transactions.values().cloned().collect();
        transactions.sort_by_key(|t| t.id);
        transactions
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn insert_pending(
        &self,
        new: NewTransaction,
    ) -> Result<MpesaTransaction, DatabaseError> {
        let mut state = self.inner.lock().await;

        if state.transactions.contains_key(&new.checkout_request_id) {
            return Err(DatabaseError::UniqueViolation {
                constraint: "mpesa_transactions_checkout_request_id_key".to_string(),
            });
        }
        let has_active = state.transactions.values().any(|t| {
            t.order_id == new.order_id
                && matches!(
                    t.status,
                    TransactionStatus::Pending | TransactionStatus::Success
                )
        });
        if has_active {
            return Err(DatabaseError::UniqueViolation {
                constraint: "mpesa_transactions_one_active_per_order".to_string(),
            });
        }

        state.next_id += 1;
        let now = Utc::now();
        let transaction = MpesaTransaction {
            id: state.next_id,
            order_id: new.order_id,
            checkout_request_id: new.checkout_request_id.clone(),
            merchant_request_id: new.merchant_request_id,
            phone_number: new.phone_number,
            amount: new.amount,
            status: TransactionStatus::Pending,
            result_code: None,
            result_desc: None,
            mpesa_receipt: None,
            transaction_date: None,
            created_at: now,
            updated_at: now,
        };
        state
            .transactions
            .insert(new.checkout_request_id, transaction.clone());
        Ok(transaction)
    }

    async fn find_by_checkout_id(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<MpesaTransaction>, DatabaseError> {
        let state = self.inner.lock().await;
        Ok(state.transactions.get(checkout_request_id).cloned())
    }

    async fn find_active_for_order(
        &self,
        order_id: i64,
    ) -> Result<Option<MpesaTransaction>, DatabaseError> {
        let state = self.inner.lock().await;
        Ok(state
            .transactions
            .values()
            .filter(|t| {
                t.order_id == order_id
                    && matches!(
                        t.status,
                        TransactionStatus::Pending | TransactionStatus::Success
                    )
            })
            .max_by_key(|t| t.created_at)
            .cloned())
    }

    async fn mark_terminal(
        &self,
        checkout_request_id: &str,
        outcome: TerminalOutcome,
    ) -> Result<Option<MpesaTransaction>, DatabaseError> {
        let mut state = self.inner.lock().await;
        let Some(transaction) = state.transactions.get_mut(checkout_request_id) else {
            return Ok(None);
        };
        if transaction.status != TransactionStatus::Pending {
            return Ok(None);
        }
        transaction.status = outcome.status;
        transaction.result_code = Some(outcome.result_code);
        transaction.result_desc = Some(outcome.result_desc);
        transaction.mpesa_receipt = outcome.mpesa_receipt;
        transaction.transaction_date = outcome.transaction_date;
        transaction.updated_at = Utc::now();
        Ok(Some(transaction.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn new_transaction(order_id: i64, checkout: &str) -> NewTransaction {
        NewTransaction {
            order_id,
            checkout_request_id: checkout.to_string(),
            merchant_request_id: Some("29115-34620561-1".to_string()),
            phone_number: "254712345678".to_string(),
            amount: BigDecimal::from_str("100.00").unwrap(),
        }
    }

    fn success_outcome() -> TerminalOutcome {
        TerminalOutcome {
            status: TransactionStatus::Success,
            result_code: 0,
            result_desc: "The service request is processed successfully.".to_string(),
            mpesa_receipt: Some("NLJ7RT61SV".to_string()),
            transaction_date: Some(Utc::now()),
        }
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            TransactionStatus::Pending,
            TransactionStatus::Success,
            TransactionStatus::Failed,
            TransactionStatus::Cancelled,
            TransactionStatus::Timeout,
        ] {
            assert_eq!(TransactionStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(TransactionStatus::parse("UNKNOWN").is_err());
    }

    #[test]
    fn only_pending_is_non_terminal() {
        assert!(!TransactionStatus::Pending.is_terminal());
        assert!(TransactionStatus::Success.is_terminal());
        assert!(TransactionStatus::Timeout.is_terminal());
    }

    #[tokio::test]
    async fn insert_rejects_second_active_for_same_order() {
        let store = InMemoryTransactionStore::new();
        store
            .insert_pending(new_transaction(1, "ws_CO_aaa"))
            .await
            .unwrap();

        let err = store
            .insert_pending(new_transaction(1, "ws_CO_bbb"))
            .await
            .unwrap_err();
        assert!(err.is_unique_violation());

        // A different order is unaffected.
        store
            .insert_pending(new_transaction(2, "ws_CO_ccc"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn failed_transaction_frees_the_order() {
        let store = InMemoryTransactionStore::new();
        store
            .insert_pending(new_transaction(1, "ws_CO_aaa"))
            .await
            .unwrap();
        store
            .mark_terminal(
                "ws_CO_aaa",
                TerminalOutcome {
                    status: TransactionStatus::Failed,
                    result_code: 1,
                    result_desc: "Insufficient balance".to_string(),
                    mpesa_receipt: None,
                    transaction_date: None,
                },
            )
            .await
            .unwrap()
            .expect("should transition");

        assert!(store.find_active_for_order(1).await.unwrap().is_none());
        store
            .insert_pending(new_transaction(1, "ws_CO_bbb"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn mark_terminal_is_idempotent() {
        let store = InMemoryTransactionStore::new();
        store
            .insert_pending(new_transaction(1, "ws_CO_aaa"))
            .await
            .unwrap();

        let first = store
            .mark_terminal("ws_CO_aaa", success_outcome())
            .await
            .unwrap();
        assert!(first.is_some());

        let second = store
            .mark_terminal("ws_CO_aaa", success_outcome())
            .await
            .unwrap();
        assert!(second.is_none());

        let stored = store
            .find_by_checkout_id("ws_CO_aaa")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, TransactionStatus::Success);
        assert_eq!(stored.mpesa_receipt.as_deref(), Some("NLJ7RT61SV"));
    }

    #[tokio::test]
    async fn mark_terminal_unknown_checkout_is_none() {
        let store = InMemoryTransactionStore::new();
        let result = store
            .mark_terminal("ws_CO_missing", success_outcome())
            .await
            .unwrap();
        assert!(result.is_none());
    }
}
