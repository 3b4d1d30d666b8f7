//! Postgres-backed unit of work for the processor service.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};

use postbox_core::{OrderId, StoreError};
use postbox_processor::{
    ProcessingState, ProcessingStatus, ProcessorUnitOfWork, ProcessorUnitOfWorkFactory,
};

use super::map_sqlx_error;

/// Opens one transaction per unit-of-work scope.
#[derive(Debug, Clone)]
pub struct PgProcessorUowFactory {
    pool: PgPool,
}

impl PgProcessorUowFactory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProcessorUnitOfWorkFactory for PgProcessorUowFactory {
    type Uow = PgProcessorUow;

    async fn begin(&self) -> Result<PgProcessorUow, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;
        Ok(PgProcessorUow { tx })
    }
}

/// One open transaction; dropping it without commit rolls back.
pub struct PgProcessorUow {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl ProcessorUnitOfWork for PgProcessorUow {
    async fn get_state(
        &mut self,
        order_id: &OrderId,
    ) -> Result<Option<ProcessingState>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT order_id, version, status, attempt_count, last_error
            FROM processing_states
            WHERE order_id = $1
            "#,
        )
        .bind(order_id.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("get_state", e))?;

        row.map(|r| state_from_row(&r)).transpose()
    }

    async fn upsert_state(&mut self, state: &ProcessingState) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO processing_states (order_id, version, status, attempt_count, last_error)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (order_id) DO UPDATE SET
                version = EXCLUDED.version,
                status = EXCLUDED.status,
                attempt_count = EXCLUDED.attempt_count,
                last_error = EXCLUDED.last_error
            "#,
        )
        .bind(state.order_id().as_str())
        .bind(state.version() as i64)
        .bind(state.status().as_str())
        .bind(state.attempt_count() as i32)
        .bind(state.last_error())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("upsert_state", e))?;

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

fn state_from_row(row: &PgRow) -> Result<ProcessingState, StoreError> {
    let read = |e: sqlx::Error| StoreError::backend(format!("read processing_states row: {e}"));

    let order_id: String = row.try_get("order_id").map_err(read)?;
    let version: i64 = row.try_get("version").map_err(read)?;
    let status: String = row.try_get("status").map_err(read)?;
    let attempt_count: i32 = row.try_get("attempt_count").map_err(read)?;
    let last_error: Option<String> = row.try_get("last_error").map_err(read)?;

    let status: ProcessingStatus = status
        .parse()
        .map_err(|e| StoreError::backend(format!("decode processing status: {e}")))?;
    let order_id =
        OrderId::new(order_id).map_err(|e| StoreError::backend(format!("stored order_id: {e}")))?;

    Ok(ProcessingState::hydrate(
        order_id,
        version as u64,
        status,
        attempt_count as u32,
        last_error,
    ))
}
