//! In-memory adapters for tests, dev runs, and single-process deployments.
//!
//! Each service database is one mutex-guarded table set; a unit of work
//! stages writes and applies them under the lock on commit, so commit is
//! atomic and dropping a scope discards it, matching the transactional
//! contract of the Postgres adapters.

mod order_store;
mod processor_store;

pub use order_store::{InMemoryOrderDb, InMemoryOrderUow, InMemoryOrderUowFactory};
pub use processor_store::{
    InMemoryProcessorDb, InMemoryProcessorUow, InMemoryProcessorUowFactory,
};

use std::collections::HashSet;

use chrono::Utc;
use serde_json::Value as JsonValue;

use postbox_core::StoreError;

use crate::outbox::{FailureDisposition, OutboxRow};

/// Outbox and inbox tables shared by both service databases.
#[derive(Debug, Default)]
pub(crate) struct MessagingTables {
    next_outbox_id: i64,
    pub(crate) outbox: Vec<OutboxRow>,
    pub(crate) inbox: HashSet<String>,
}

impl MessagingTables {
    pub(crate) fn outbox_put(&mut self, event_type: &str, payload: JsonValue) {
        self.next_outbox_id += 1;
        self.outbox.push(OutboxRow {
            id: self.next_outbox_id,
            event_type: event_type.to_string(),
            payload,
            published_at: None,
            retry_count: 0,
            dlq_at: None,
        });
    }

    pub(crate) fn fetch_unpublished(&self, limit: u32) -> Vec<OutboxRow> {
        // Rows are stored in id order already.
        self.outbox
            .iter()
            .filter(|r| r.published_at.is_none() && r.dlq_at.is_none())
            .take(limit as usize)
            .cloned()
            .collect()
    }

    pub(crate) fn mark_published(&mut self, id: i64) -> Result<(), StoreError> {
        let row = self.row_mut(id)?;
        row.published_at = Some(Utc::now());
        Ok(())
    }

    pub(crate) fn record_failure(
        &mut self,
        id: i64,
        max_retries: u32,
    ) -> Result<FailureDisposition, StoreError> {
        let row = self.row_mut(id)?;
        row.retry_count += 1;
        let retry_count = row.retry_count;

        if retry_count >= max_retries {
            row.dlq_at = Some(Utc::now());
            Ok(FailureDisposition::DeadLetter { retry_count })
        } else {
            Ok(FailureDisposition::Retry { retry_count })
        }
    }

    fn row_mut(&mut self, id: i64) -> Result<&mut OutboxRow, StoreError> {
        self.outbox
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| StoreError::backend(format!("outbox row {id} not found")))
    }
}
