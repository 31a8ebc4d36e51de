//! Order projection: the slice of the order model the payment flow
//! reads and writes.
//!
//! Payments never own orders. They load the total for a push, and they
//! project terminal payment outcomes back onto the order row.

use crate::database::error::DatabaseError;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use sqlx::{FromRow, PgPool};
use tokio::sync::Mutex;

/// The order fields the payment flow needs.
#[derive(Debug, Clone, FromRow)]
pub struct OrderSummary {
    pub id: i64,
    pub total: BigDecimal,
    pub payment_status: String,
    pub complete: bool,
}

pub const PAYMENT_STATUS_UNPAID: &str = "UNPAID";
pub const PAYMENT_STATUS_PAID: &str = "PAID";
pub const PAYMENT_STATUS_FAILED: &str = "FAILED";

#[async_trait]
pub trait OrderPaymentProjector: Send + Sync {
    async fn load_order(&self, order_id: i64) -> Result<Option<OrderSummary>, DatabaseError>;

    /// Mark the order paid and complete, recording the gateway receipt.
    async fn mark_paid(&self, order_id: i64, receipt: &str) -> Result<(), DatabaseError>;

    /// Record that the payment attempt ended without a payment.
    async fn mark_payment_failed(&self, order_id: i64) -> Result<(), DatabaseError>;
}

/// Postgres-backed projector.
pub struct PgOrderProjector {
    pool: PgPool,
}

impl PgOrderProjector {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderPaymentProjector for PgOrderProjector {
    async fn load_order(&self, order_id: i64) -> Result<Option<OrderSummary>, DatabaseError> {
        let order = sqlx::query_as::<_, OrderSummary>(
            "SELECT id, total, payment_status, complete FROM orders WHERE id = $1",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(order)
    }

    async fn mark_paid(&self, order_id: i64, receipt: &str) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE orders \
             SET payment_status = $2, complete = TRUE, payment_receipt = $3, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(order_id)
        .bind(PAYMENT_STATUS_PAID)
        .bind(receipt)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    async fn mark_payment_failed(&self, order_id: i64) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE orders SET payment_status = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(order_id)
        .bind(PAYMENT_STATUS_FAILED)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }
}

/// What a projection call recorded, for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    Paid { order_id: i64, receipt: String },
    PaymentFailed { order_id: i64 },
}

/// In-memory projector, seedable with orders.
#[derive(Default)]
pub struct InMemoryOrderProjector {
    inner: Mutex<InMemoryOrders>,
}

#[derive(Default)]
struct InMemoryOrders {
    orders: Vec<OrderSummary>,
    projections: Vec<Projection>,
}

impl InMemoryOrderProjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed(&self, order: OrderSummary) {
        let mut inner = self.inner.lock().await;
        inner.orders.push(order);
    }

    pub async fn projections(&self) -> Vec<Projection> {
        let inner = self.inner.lock().await;
        inner.projections.clone()
    }
}

#[async_trait]
impl OrderPaymentProjector for InMemoryOrderProjector {
    async fn load_order(&self, order_id: i64) -> Result<Option<OrderSummary>, DatabaseError> {
        let inner = self.inner.lock().await;
        Ok(inner.orders.iter().find(|o| o.id == order_id).cloned())
    }

    async fn mark_paid(&self, order_id: i64, receipt: &str) -> Result<(), DatabaseError> {
        let mut inner = self.inner.lock().await;
        if let Some(order) = inner.orders.iter_mut().find(|o| o.id == order_id) {
            order.payment_status = PAYMENT_STATUS_PAID.to_string();
            order.complete = true;
        }
        inner.projections.push(Projection::Paid {
            order_id,
            receipt: receipt.to_string(),
        });
        Ok(())
    }

    async fn mark_payment_failed(&self, order_id: i64) -> Result<(), DatabaseError> {
        let mut inner = self.inner.lock().await;
        if let Some(order) = inner.orders.iter_mut().find(|o| o.id == order_id) {
            order.payment_status = PAYMENT_STATUS_FAILED.to_string();
        }
        inner.projections.push(Projection::PaymentFailed { order_id });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[tokio::test]
    async fn projector_records_paid_projection() {
        let projector = InMemoryOrderProjector::new();
        projector
            .seed(OrderSummary {
                id: 7,
                total: BigDecimal::from_str("100.00").unwrap(),
                payment_status: PAYMENT_STATUS_UNPAID.to_string(),
                complete: false,
            })
            .await;

        projector.mark_paid(7, "NLJ7RT61SV").await.unwrap();

        let order = projector.load_order(7).await.unwrap().unwrap();
        assert_eq!(order.payment_status, PAYMENT_STATUS_PAID);
        assert!(order.complete);
        assert_eq!(
            projector.projections().await,
            vec![Projection::Paid {
                order_id: 7,
                receipt: "NLJ7RT61SV".to_string()
            }]
        );
    }
}
