//! Postgres-backed publisher-side view of the outbox table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Row};

use postbox_core::StoreError;

use super::map_sqlx_error;
use crate::outbox::{FailureDisposition, OutboxRow, OutboxStore};

/// Publisher-side store. Marks and failure bookkeeping each run in their own
/// implicit transaction, separate from the publish itself.
#[derive(Debug, Clone)]
pub struct PgOutboxStore {
    pool: PgPool,
}

impl PgOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OutboxStore for PgOutboxStore {
    async fn fetch_unpublished(&self, limit: u32) -> Result<Vec<OutboxRow>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, event_type, payload, published_at, retry_count, dlq_at
            FROM outbox
            WHERE published_at IS NULL AND dlq_at IS NULL
            ORDER BY id ASC
            LIMIT $1
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_unpublished", e))?;

        let read = |e: sqlx::Error| StoreError::backend(format!("read outbox row: {e}"));

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.try_get("id").map_err(read)?;
            let event_type: String = row.try_get("event_type").map_err(read)?;
            let payload: JsonValue = row.try_get("payload").map_err(read)?;
            let published_at: Option<DateTime<Utc>> = row.try_get("published_at").map_err(read)?;
            let retry_count: i32 = row.try_get("retry_count").map_err(read)?;
            let dlq_at: Option<DateTime<Utc>> = row.try_get("dlq_at").map_err(read)?;

            out.push(OutboxRow {
                id,
                event_type,
                payload,
                published_at,
                retry_count: retry_count.max(0) as u32,
                dlq_at,
            });
        }

        Ok(out)
    }

    async fn mark_published(&self, id: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE outbox SET published_at = NOW() WHERE id = $1 AND published_at IS NULL")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("mark_published", e))?;

        Ok(())
    }

    async fn record_failure(
        &self,
        id: i64,
        max_retries: u32,
    ) -> Result<FailureDisposition, StoreError> {
        let row = sqlx::query(
            "UPDATE outbox SET retry_count = retry_count + 1 WHERE id = $1 RETURNING retry_count",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("record_failure", e))?;

        let retry_count: i32 = row
            .try_get("retry_count")
            .map_err(|e| StoreError::backend(format!("read retry_count: {e}")))?;
        let retry_count = retry_count.max(0) as u32;

        if retry_count >= max_retries {
            sqlx::query("UPDATE outbox SET dlq_at = NOW() WHERE id = $1 AND dlq_at IS NULL")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("mark_dlq", e))?;

            Ok(FailureDisposition::DeadLetter { retry_count })
        } else {
            Ok(FailureDisposition::Retry { retry_count })
        }
    }
}
