//! Storage ports for the order service.
//!
//! A unit of work scopes one database transaction and binds the order
//! repository, the outbox writer, and the inbox store to it. Outbox rows
//! written inside a scope become visible to the publisher if and only if the
//! scope commits; this is the sole atomicity primitive the service relies on.

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use postbox_core::{OrderId, StoreError};

use crate::order::Order;

/// One transactional scope over the order service database.
///
/// Dropping a unit of work without calling [`commit`](Self::commit) rolls the
/// scope back.
#[async_trait]
pub trait OrderUnitOfWork: Send {
    /// Load an order by id, or `None` if absent.
    async fn get_order(&mut self, order_id: &OrderId) -> Result<Option<Order>, StoreError>;

    /// Insert or update an order by primary key.
    async fn upsert_order(&mut self, order: &Order) -> Result<(), StoreError>;

    /// Append an outbox row (`published_at = NULL`, `retry_count = 0`).
    async fn outbox_put(&mut self, event_type: &str, payload: JsonValue) -> Result<(), StoreError>;

    /// Whether an event key was already applied by a committed scope.
    async fn inbox_exists(&mut self, event_key: &str) -> Result<bool, StoreError>;

    /// Record an event key. A duplicate insert fails with
    /// [`StoreError::Duplicate`].
    async fn inbox_add(&mut self, event_key: &str) -> Result<(), StoreError>;

    /// Commit the scope.
    async fn commit(self) -> Result<(), StoreError>;
}

/// Opens fresh unit-of-work scopes.
#[async_trait]
pub trait OrderUnitOfWorkFactory: Send + Sync {
    type Uow: OrderUnitOfWork;

    async fn begin(&self) -> Result<Self::Uow, StoreError>;
}
