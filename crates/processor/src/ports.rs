//! Storage ports for the processor service.
//!
//! Same unit-of-work contract as the order side, bound to the processing
//! state repository instead: one transaction scoping state, outbox, and
//! inbox writes, with commit-or-rollback semantics.

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use postbox_core::{OrderId, StoreError};

use crate::processing::ProcessingState;

/// One transactional scope over the processor service database.
///
/// Dropping a unit of work without calling [`commit`](Self::commit) rolls the
/// scope back.
#[async_trait]
pub trait ProcessorUnitOfWork: Send {
    async fn get_state(&mut self, order_id: &OrderId)
        -> Result<Option<ProcessingState>, StoreError>;

    async fn upsert_state(&mut self, state: &ProcessingState) -> Result<(), StoreError>;

    /// Append an outbox row (`published_at = NULL`, `retry_count = 0`).
    async fn outbox_put(&mut self, event_type: &str, payload: JsonValue) -> Result<(), StoreError>;

    async fn inbox_exists(&mut self, event_key: &str) -> Result<bool, StoreError>;

    /// Record an event key. A duplicate insert fails with
    /// [`StoreError::Duplicate`].
    async fn inbox_add(&mut self, event_key: &str) -> Result<(), StoreError>;

    async fn commit(self) -> Result<(), StoreError>;
}

/// Opens fresh unit-of-work scopes.
#[async_trait]
pub trait ProcessorUnitOfWorkFactory: Send + Sync {
    type Uow: ProcessorUnitOfWork;

    async fn begin(&self) -> Result<Self::Uow, StoreError>;
}
