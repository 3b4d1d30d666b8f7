//! Outbox rows and the store contract the publisher pump drives.
//!
//! Rows are produced only inside a unit-of-work commit and consumed only by
//! the pump. A row with a non-null `published_at` is immutable and never
//! fetched again; a row with a non-null `dlq_at` has been routed to the dead
//! letter exchange and is likewise terminal.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use postbox_core::StoreError;

/// One durable outbound event, colocated with the service's primary data.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxRow {
    pub id: i64,
    /// Routing key on the events exchange.
    pub event_type: String,
    pub payload: JsonValue,
    pub published_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub dlq_at: Option<DateTime<Utc>>,
}

/// What [`OutboxStore::record_failure`] decided for a failed row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Retry on a later cycle.
    Retry { retry_count: u32 },
    /// Retries exhausted; `dlq_at` is set and the pump must publish the row
    /// to the dead letter exchange.
    DeadLetter { retry_count: u32 },
}

/// Publisher-side view of the outbox table.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Up to `limit` rows with `published_at IS NULL AND dlq_at IS NULL`,
    /// ordered by id ascending (insertion order).
    async fn fetch_unpublished(&self, limit: u32) -> Result<Vec<OutboxRow>, StoreError>;

    /// Record a broker acknowledgement. The row becomes immutable.
    async fn mark_published(&self, id: i64) -> Result<(), StoreError>;

    /// Record a publish failure: increments `retry_count`, and sets `dlq_at`
    /// once `retry_count` reaches `max_retries`.
    async fn record_failure(
        &self,
        id: i64,
        max_retries: u32,
    ) -> Result<FailureDisposition, StoreError>;
}

#[async_trait]
impl<S> OutboxStore for Arc<S>
where
    S: OutboxStore + ?Sized,
{
    async fn fetch_unpublished(&self, limit: u32) -> Result<Vec<OutboxRow>, StoreError> {
        (**self).fetch_unpublished(limit).await
    }

    async fn mark_published(&self, id: i64) -> Result<(), StoreError> {
        (**self).mark_published(id).await
    }

    async fn record_failure(
        &self,
        id: i64,
        max_retries: u32,
    ) -> Result<FailureDisposition, StoreError> {
        (**self).record_failure(id, max_retries).await
    }
}
