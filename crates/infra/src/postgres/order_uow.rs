//! Postgres-backed unit of work for the order service.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};

use postbox_core::{CustomerId, OrderId, StoreError};
use postbox_events::ItemLine;
use postbox_order::{Order, OrderStatus, OrderUnitOfWork, OrderUnitOfWorkFactory};

use super::map_sqlx_error;

/// Opens one transaction per unit-of-work scope.
#[derive(Debug, Clone)]
pub struct PgOrderUowFactory {
    pool: PgPool,
}

impl PgOrderUowFactory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderUnitOfWorkFactory for PgOrderUowFactory {
    type Uow = PgOrderUow;

    async fn begin(&self) -> Result<PgOrderUow, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;
        Ok(PgOrderUow { tx })
    }
}

/// One open transaction; dropping it without commit rolls back.
pub struct PgOrderUow {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl OrderUnitOfWork for PgOrderUow {
    async fn get_order(&mut self, order_id: &OrderId) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT order_id, customer_id, items, amount, status, fail_reason, version
            FROM orders
            WHERE order_id = $1
            "#,
        )
        .bind(order_id.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("get_order", e))?;

        row.map(|r| order_from_row(&r)).transpose()
    }

    async fn upsert_order(&mut self, order: &Order) -> Result<(), StoreError> {
        let items = serde_json::to_value(order.items())
            .map_err(|e| StoreError::backend(format!("encode order items: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO orders (order_id, customer_id, items, amount, status, fail_reason, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (order_id) DO UPDATE SET
                items = EXCLUDED.items,
                amount = EXCLUDED.amount,
                status = EXCLUDED.status,
                fail_reason = EXCLUDED.fail_reason,
                version = EXCLUDED.version
            "#,
        )
        .bind(order.order_id().as_str())
        .bind(order.customer_id().as_str())
        .bind(items)
        .bind(order.total_amount())
        .bind(order.status().as_str())
        .bind(order.fail_reason())
        .bind(order.version() as i64)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("upsert_order", e))?;

        Ok(())
    }

    async fn outbox_put(&mut self, event_type: &str, payload: JsonValue) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO outbox (event_type, payload) VALUES ($1, $2)")
            .bind(event_type)
            .bind(payload)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("outbox_put", e))?;

        Ok(())
    }

    async fn inbox_exists(&mut self, event_key: &str) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 AS present FROM processed_inbox WHERE event_key = $1")
            .bind(event_key)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("inbox_exists", e))?;

        Ok(row.is_some())
    }

    async fn inbox_add(&mut self, event_key: &str) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO processed_inbox (event_key) VALUES ($1)")
            .bind(event_key)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("inbox_add", e))?;

        Ok(())
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))
    }
}

fn order_from_row(row: &PgRow) -> Result<Order, StoreError> {
    let read = |e: sqlx::Error| StoreError::backend(format!("read orders row: {e}"));

    let order_id: String = row.try_get("order_id").map_err(read)?;
    let customer_id: String = row.try_get("customer_id").map_err(read)?;
    let items: JsonValue = row.try_get("items").map_err(read)?;
    let amount: f64 = row.try_get("amount").map_err(read)?;
    let status: String = row.try_get("status").map_err(read)?;
    let fail_reason: Option<String> = row.try_get("fail_reason").map_err(read)?;
    let version: i64 = row.try_get("version").map_err(read)?;

    let items: Vec<ItemLine> = serde_json::from_value(items)
        .map_err(|e| StoreError::backend(format!("decode order items: {e}")))?;
    let status: OrderStatus = status
        .parse()
        .map_err(|e| StoreError::backend(format!("decode order status: {e}")))?;
    let order_id =
        OrderId::new(order_id).map_err(|e| StoreError::backend(format!("stored order_id: {e}")))?;
    let customer_id = CustomerId::new(customer_id)
        .map_err(|e| StoreError::backend(format!("stored customer_id: {e}")))?;

    Ok(Order::hydrate(
        order_id,
        customer_id,
        items,
        amount,
        status,
        fail_reason,
        version as u64,
    ))
}
