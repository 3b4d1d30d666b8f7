//! Outbox publisher: the background pump from outbox rows to the broker.
//!
//! One logical pump per service replica. The batch read is plain (no row
//! claiming), so running concurrent pumps against the same database requires
//! `SELECT ... FOR UPDATE SKIP LOCKED` semantics in the store; with the
//! provided stores, run a single pump per database.
//!
//! A row is marked published only after the broker acknowledges it, in a
//! separate transaction. A crash between the ack and the mark produces a
//! duplicate publish, which the consumer-side inbox absorbs. Rows are never
//! lost.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use postbox_core::StoreError;
use postbox_events::{dlq_routing_key, Broker, Message, DLX_EXCHANGE, EVENTS_EXCHANGE, HEADER_DEATH_REASON};
use postbox_observability::Metrics;

use crate::outbox::{FailureDisposition, OutboxRow, OutboxStore};
use crate::worker::WorkerHandle;

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Sleep between empty or failed cycles. A full non-empty batch loops
    /// immediately.
    pub poll_interval: Duration,
    pub batch_size: u32,
    /// Publish attempts per row before dead-lettering.
    pub max_retries: u32,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 100,
            max_retries: 3,
        }
    }
}

/// Background pump: reads unpublished rows, publishes them in insertion
/// order, marks them published, and dead-letters rows that exhaust retries.
pub struct OutboxPublisher<S, B> {
    store: S,
    broker: B,
    metrics: Arc<Metrics>,
    config: PublisherConfig,
}

impl<S, B> OutboxPublisher<S, B>
where
    S: OutboxStore + 'static,
    B: Broker,
{
    pub fn new(store: S, broker: B, metrics: Arc<Metrics>, config: PublisherConfig) -> Self {
        Self {
            store,
            broker,
            metrics,
            config,
        }
    }

    /// Spawn the pump as a background task.
    pub fn spawn(self, name: &'static str) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(self.run(name, shutdown_rx));
        WorkerHandle::new(name, shutdown_tx, join)
    }

    /// Run the pump until shutdown is signalled.
    ///
    /// Transient store and broker failures are swallowed and retried on the
    /// next cycle.
    pub async fn run(self, name: &'static str, mut shutdown: watch::Receiver<bool>) {
        info!(worker = name, "outbox publisher started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.publish_batch().await {
                // Non-empty batch: more rows may be waiting, loop immediately.
                Ok(n) if n > 0 => continue,
                Ok(_) => {}
                Err(e) => {
                    warn!(worker = name, error = %e, "outbox batch read failed");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                res = shutdown.changed() => {
                    // A dropped sender means the handle is gone; stop.
                    if res.is_err() {
                        break;
                    }
                }
            }
        }

        info!(worker = name, "outbox publisher stopped");
    }

    /// Publish one batch; returns the number of rows seen.
    pub async fn publish_batch(&self) -> Result<usize, StoreError> {
        let rows = self.store.fetch_unpublished(self.config.batch_size).await?;
        let count = rows.len();

        for row in rows {
            self.publish_row(&row).await;
        }

        Ok(count)
    }

    async fn publish_row(&self, row: &OutboxRow) {
        match self.try_publish(row).await {
            Ok(()) => {
                self.metrics.incr_events_published();
                debug!(outbox_id = row.id, event_type = %row.event_type, "outbox row published");

                if let Err(e) = self.store.mark_published(row.id).await {
                    // The broker has the message; the row will be republished
                    // next cycle and deduplicated by the consumer inbox.
                    warn!(outbox_id = row.id, error = %e, "published row could not be marked");
                }
            }
            Err(reason) => {
                self.metrics.incr_events_failed();
                self.handle_failure(row, &reason).await;
            }
        }
    }

    async fn try_publish(&self, row: &OutboxRow) -> Result<(), String> {
        let body =
            serde_json::to_vec(&row.payload).map_err(|e| format!("encode payload: {e}"))?;
        let message = Message::json(message_id(row.id), row.event_type.clone(), body);

        self.broker
            .publish(EVENTS_EXCHANGE, message)
            .await
            .map_err(|e| e.to_string())
    }

    async fn handle_failure(&self, row: &OutboxRow, reason: &str) {
        match self.store.record_failure(row.id, self.config.max_retries).await {
            Ok(FailureDisposition::Retry { retry_count }) => {
                warn!(
                    outbox_id = row.id,
                    event_type = %row.event_type,
                    retry_count,
                    reason,
                    "outbox publish failed, will retry"
                );
            }
            Ok(FailureDisposition::DeadLetter { retry_count }) => {
                warn!(
                    outbox_id = row.id,
                    event_type = %row.event_type,
                    retry_count,
                    reason,
                    "outbox row exhausted retries, routing to DLQ"
                );
                self.publish_to_dlq(row, reason).await;
                self.metrics.incr_events_moved_to_dlq();
            }
            Err(e) => {
                error!(outbox_id = row.id, error = %e, "failed to record publish failure");
            }
        }
    }

    async fn publish_to_dlq(&self, row: &OutboxRow, reason: &str) {
        let body = serde_json::to_vec(&row.payload).unwrap_or_default();
        let message = Message::json(message_id(row.id), dlq_routing_key(&row.event_type), body)
            .with_header(HEADER_DEATH_REASON, reason);

        if let Err(e) = self.broker.publish(DLX_EXCHANGE, message).await {
            // dlq_at is already set; the row stays visible in the outbox
            // table for operator intervention.
            error!(outbox_id = row.id, error = %e, "failed to publish to DLQ");
        }
    }
}

/// Stable message id derived from the outbox row id.
fn message_id(row_id: i64) -> String {
    format!("outbox-{row_id}")
}
