//! Postgres adapters for both services.
//!
//! ## Error mapping
//!
//! SQLx errors map to [`StoreError`] as follows: unique violations
//! (SQLSTATE `23505`) become [`StoreError::Duplicate`], which the use cases
//! recover from by re-checking the inbox; everything else becomes
//! [`StoreError::Backend`] and rolls the unit of work back.

mod order_uow;
mod outbox_store;
mod processor_uow;

pub use order_uow::{PgOrderUow, PgOrderUowFactory};
pub use outbox_store::PgOutboxStore;
pub use processor_uow::{PgProcessorUow, PgProcessorUowFactory};

use sqlx::PgPool;
use tracing::instrument;

use postbox_core::StoreError;

pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            if db_err.code().as_deref() == Some("23505") {
                StoreError::duplicate(format!("{operation}: {}", db_err.message()))
            } else {
                StoreError::backend(format!(
                    "database error in {operation}: {}",
                    db_err.message()
                ))
            }
        }
        other => StoreError::backend(format!("sqlx error in {operation}: {other}")),
    }
}

/// Create the order service tables if they do not exist yet.
///
/// Mirrors the startup behavior of the services: real deployments may manage
/// the schema externally, in which case these statements are no-ops.
#[instrument(skip(pool), err)]
pub async fn ensure_order_schema(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS orders (
            order_id    TEXT PRIMARY KEY,
            customer_id TEXT NOT NULL,
            items       JSONB NOT NULL,
            amount      DOUBLE PRECISION NOT NULL,
            status      TEXT NOT NULL,
            fail_reason TEXT,
            version     BIGINT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| map_sqlx_error("ensure_order_schema", e))?;

    ensure_messaging_tables(pool).await
}

/// Create the processor service tables if they do not exist yet.
#[instrument(skip(pool), err)]
pub async fn ensure_processor_schema(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS processing_states (
            order_id      TEXT PRIMARY KEY,
            version       BIGINT NOT NULL,
            status        TEXT NOT NULL,
            attempt_count INTEGER NOT NULL,
            last_error    TEXT
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| map_sqlx_error("ensure_processor_schema", e))?;

    ensure_messaging_tables(pool).await
}

async fn ensure_messaging_tables(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS outbox (
            id           BIGSERIAL PRIMARY KEY,
            event_type   TEXT NOT NULL,
            payload      JSONB NOT NULL,
            published_at TIMESTAMPTZ,
            retry_count  INTEGER NOT NULL DEFAULT 0,
            dlq_at       TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| map_sqlx_error("ensure_outbox_table", e))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS processed_inbox (
            event_key TEXT PRIMARY KEY
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| map_sqlx_error("ensure_inbox_table", e))?;

    Ok(())
}
