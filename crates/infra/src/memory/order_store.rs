//! In-memory order service database and unit of work.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use postbox_core::{OrderId, StoreError};
use postbox_order::{Order, OrderUnitOfWork, OrderUnitOfWorkFactory};

use super::MessagingTables;
use crate::outbox::{FailureDisposition, OutboxRow, OutboxStore};

#[derive(Debug, Default)]
struct OrderTables {
    orders: HashMap<String, Order>,
    messaging: MessagingTables,
}

/// Shared in-memory database for the order service.
#[derive(Debug, Default, Clone)]
pub struct InMemoryOrderDb {
    state: Arc<Mutex<OrderTables>>,
}

impl InMemoryOrderDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed order by id (diagnostics/tests).
    pub fn order(&self, order_id: &str) -> Option<Order> {
        self.state.lock().unwrap().orders.get(order_id).cloned()
    }

    /// Snapshot of the outbox table (diagnostics/tests).
    pub fn outbox_rows(&self) -> Vec<OutboxRow> {
        self.state.lock().unwrap().messaging.outbox.clone()
    }

    pub fn inbox_contains(&self, event_key: &str) -> bool {
        self.state.lock().unwrap().messaging.inbox.contains(event_key)
    }

    pub fn inbox_len(&self) -> usize {
        self.state.lock().unwrap().messaging.inbox.len()
    }
}

#[async_trait]
impl OutboxStore for InMemoryOrderDb {
    async fn fetch_unpublished(&self, limit: u32) -> Result<Vec<OutboxRow>, StoreError> {
        Ok(self.state.lock().unwrap().messaging.fetch_unpublished(limit))
    }

    async fn mark_published(&self, id: i64) -> Result<(), StoreError> {
        self.state.lock().unwrap().messaging.mark_published(id)
    }

    async fn record_failure(
        &self,
        id: i64,
        max_retries: u32,
    ) -> Result<FailureDisposition, StoreError> {
        self.state
            .lock()
            .unwrap()
            .messaging
            .record_failure(id, max_retries)
    }
}

/// Opens in-memory unit-of-work scopes over one [`InMemoryOrderDb`].
#[derive(Debug, Clone)]
pub struct InMemoryOrderUowFactory {
    db: InMemoryOrderDb,
}

impl InMemoryOrderUowFactory {
    pub fn new(db: InMemoryOrderDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl OrderUnitOfWorkFactory for InMemoryOrderUowFactory {
    type Uow = InMemoryOrderUow;

    async fn begin(&self) -> Result<InMemoryOrderUow, StoreError> {
        Ok(InMemoryOrderUow {
            db: self.db.clone(),
            staged_orders: Vec::new(),
            staged_outbox: Vec::new(),
            staged_inbox: Vec::new(),
        })
    }
}

/// Staged writes applied atomically on commit; dropped without commit, the
/// scope leaves the database untouched.
#[derive(Debug)]
pub struct InMemoryOrderUow {
    db: InMemoryOrderDb,
    staged_orders: Vec<Order>,
    staged_outbox: Vec<(String, JsonValue)>,
    staged_inbox: Vec<String>,
}

#[async_trait]
impl OrderUnitOfWork for InMemoryOrderUow {
    async fn get_order(&mut self, order_id: &OrderId) -> Result<Option<Order>, StoreError> {
        if let Some(staged) = self
            .staged_orders
            .iter()
            .rev()
            .find(|o| o.order_id() == order_id)
        {
            return Ok(Some(staged.clone()));
        }
        Ok(self.db.order(order_id.as_str()))
    }

    async fn upsert_order(&mut self, order: &Order) -> Result<(), StoreError> {
        self.staged_orders.push(order.clone());
        Ok(())
    }

    async fn outbox_put(&mut self, event_type: &str, payload: JsonValue) -> Result<(), StoreError> {
        self.staged_outbox.push((event_type.to_string(), payload));
        Ok(())
    }

    async fn inbox_exists(&mut self, event_key: &str) -> Result<bool, StoreError> {
        if self.staged_inbox.iter().any(|k| k == event_key) {
            return Ok(true);
        }
        Ok(self.db.inbox_contains(event_key))
    }

    async fn inbox_add(&mut self, event_key: &str) -> Result<(), StoreError> {
        if self.staged_inbox.iter().any(|k| k == event_key) || self.db.inbox_contains(event_key) {
            return Err(StoreError::duplicate(event_key));
        }
        self.staged_inbox.push(event_key.to_string());
        Ok(())
    }

    async fn commit(self) -> Result<(), StoreError> {
        let mut state = self.db.state.lock().unwrap();

        // Uniqueness is enforced at commit, like the database constraint:
        // a concurrent scope may have claimed the key since it was staged.
        for key in &self.staged_inbox {
            if state.messaging.inbox.contains(key) {
                return Err(StoreError::duplicate(key.clone()));
            }
        }

        for order in self.staged_orders {
            state.orders.insert(order.order_id().to_string(), order);
        }
        for (event_type, payload) in self.staged_outbox {
            state.messaging.outbox_put(&event_type, payload);
        }
        for key in self.staged_inbox {
            state.messaging.inbox.insert(key);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use postbox_core::CustomerId;
    use postbox_events::ItemLine;

    use super::*;

    fn order(id: &str) -> Order {
        Order::create(
            OrderId::new(id).unwrap(),
            CustomerId::new("c-1").unwrap(),
            vec![ItemLine {
                sku: "laptop".to_string(),
                quantity: 1,
                price: 1200.0,
            }],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn dropped_scope_rolls_back() {
        let db = InMemoryOrderDb::new();
        let factory = InMemoryOrderUowFactory::new(db.clone());

        {
            let mut uow = factory.begin().await.unwrap();
            uow.upsert_order(&order("ord-1")).await.unwrap();
            uow.outbox_put("order.created", serde_json::json!({}))
                .await
                .unwrap();
            // no commit
        }

        assert!(db.order("ord-1").is_none());
        assert!(db.outbox_rows().is_empty());
    }

    #[tokio::test]
    async fn commit_makes_outbox_rows_visible_in_insertion_order() {
        let db = InMemoryOrderDb::new();
        let factory = InMemoryOrderUowFactory::new(db.clone());

        let mut uow = factory.begin().await.unwrap();
        uow.outbox_put("order.created", serde_json::json!({"n": 1}))
            .await
            .unwrap();
        uow.outbox_put("order.created", serde_json::json!({"n": 2}))
            .await
            .unwrap();
        uow.commit().await.unwrap();

        let rows = db.fetch_unpublished(10).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].id < rows[1].id);
        assert_eq!(rows[0].payload["n"], 1);
    }

    #[tokio::test]
    async fn concurrent_inbox_insert_loses_at_commit() {
        let db = InMemoryOrderDb::new();
        let factory = InMemoryOrderUowFactory::new(db.clone());

        let mut first = factory.begin().await.unwrap();
        let mut second = factory.begin().await.unwrap();

        first.inbox_add("order.processed:ord-1:1").await.unwrap();
        second.inbox_add("order.processed:ord-1:1").await.unwrap();

        first.commit().await.unwrap();
        let err = second.commit().await.unwrap_err();
        assert!(err.is_duplicate());
        assert_eq!(db.inbox_len(), 1);
    }

    #[tokio::test]
    async fn marked_published_rows_are_not_refetched() {
        let db = InMemoryOrderDb::new();
        let factory = InMemoryOrderUowFactory::new(db.clone());

        let mut uow = factory.begin().await.unwrap();
        uow.outbox_put("order.created", serde_json::json!({}))
            .await
            .unwrap();
        uow.commit().await.unwrap();

        let rows = db.fetch_unpublished(10).await.unwrap();
        db.mark_published(rows[0].id).await.unwrap();

        assert!(db.fetch_unpublished(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn record_failure_dead_letters_at_the_bound() {
        let db = InMemoryOrderDb::new();
        let factory = InMemoryOrderUowFactory::new(db.clone());

        let mut uow = factory.begin().await.unwrap();
        uow.outbox_put("order.created", serde_json::json!({}))
            .await
            .unwrap();
        uow.commit().await.unwrap();
        let id = db.fetch_unpublished(10).await.unwrap()[0].id;

        assert_eq!(
            db.record_failure(id, 3).await.unwrap(),
            FailureDisposition::Retry { retry_count: 1 }
        );
        assert_eq!(
            db.record_failure(id, 3).await.unwrap(),
            FailureDisposition::Retry { retry_count: 2 }
        );
        assert_eq!(
            db.record_failure(id, 3).await.unwrap(),
            FailureDisposition::DeadLetter { retry_count: 3 }
        );

        assert!(db.fetch_unpublished(10).await.unwrap().is_empty());
        assert!(db.outbox_rows()[0].dlq_at.is_some());
    }
}
