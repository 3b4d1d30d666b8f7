//! In-memory processor service database and unit of work.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use postbox_core::{OrderId, StoreError};
use postbox_processor::{ProcessingState, ProcessorUnitOfWork, ProcessorUnitOfWorkFactory};

use super::MessagingTables;
use crate::outbox::{FailureDisposition, OutboxRow, OutboxStore};

#[derive(Debug, Default)]
struct ProcessorTables {
    states: HashMap<String, ProcessingState>,
    messaging: MessagingTables,
}

/// Shared in-memory database for the processor service.
#[derive(Debug, Default, Clone)]
pub struct InMemoryProcessorDb {
    state: Arc<Mutex<ProcessorTables>>,
}

impl InMemoryProcessorDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed processing state by order id (diagnostics/tests).
    pub fn processing_state(&self, order_id: &str) -> Option<ProcessingState> {
        self.state.lock().unwrap().states.get(order_id).cloned()
    }

    /// Snapshot of the outbox table (diagnostics/tests).
    pub fn outbox_rows(&self) -> Vec<OutboxRow> {
        self.state.lock().unwrap().messaging.outbox.clone()
    }

    pub fn inbox_contains(&self, event_key: &str) -> bool {
        self.state.lock().unwrap().messaging.inbox.contains(event_key)
    }
}

#[async_trait]
impl OutboxStore for InMemoryProcessorDb {
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

/// Opens in-memory unit-of-work scopes over one [`InMemoryProcessorDb`].
#[derive(Debug, Clone)]
pub struct InMemoryProcessorUowFactory {
    db: InMemoryProcessorDb,
}

impl InMemoryProcessorUowFactory {
    pub fn new(db: InMemoryProcessorDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ProcessorUnitOfWorkFactory for InMemoryProcessorUowFactory {
    type Uow = InMemoryProcessorUow;

    async fn begin(&self) -> Result<InMemoryProcessorUow, StoreError> {
        Ok(InMemoryProcessorUow {
            db: self.db.clone(),
            staged_states: Vec::new(),
            staged_outbox: Vec::new(),
            staged_inbox: Vec::new(),
        })
    }
}

/// Staged writes applied atomically on commit.
#[derive(Debug)]
pub struct InMemoryProcessorUow {
    db: InMemoryProcessorDb,
    staged_states: Vec<ProcessingState>,
    staged_outbox: Vec<(String, JsonValue)>,
    staged_inbox: Vec<String>,
}

#[async_trait]
impl ProcessorUnitOfWork for InMemoryProcessorUow {
    async fn get_state(
        &mut self,
        order_id: &OrderId,
    ) -> Result<Option<ProcessingState>, StoreError> {
        if let Some(staged) = self
            .staged_states
            .iter()
            .rev()
            .find(|s| s.order_id() == order_id)
        {
            return Ok(Some(staged.clone()));
        }
        Ok(self.db.processing_state(order_id.as_str()))
    }

    async fn upsert_state(&mut self, state: &ProcessingState) -> Result<(), StoreError> {
        self.staged_states.push(state.clone());
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

        for key in &self.staged_inbox {
            if state.messaging.inbox.contains(key) {
                return Err(StoreError::duplicate(key.clone()));
            }
        }

        for processing in self.staged_states {
            state
                .states
                .insert(processing.order_id().to_string(), processing);
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
