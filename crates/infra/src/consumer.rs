//! Consumer pipeline: queue subscription, idempotent handling, and the
//! ack / requeue / dead-letter decision.
//!
//! The pipeline is single-handler, multi-worker: up to `prefetch` deliveries
//! are handled concurrently, each on its own task. Ordering within an
//! `order_id` is therefore not guaranteed and must not be relied on; the
//! inbox and version gating make redeliveries and reordering safe.
//!
//! This is the single place that decides what happens to a delivery:
//! - handler success: ack
//! - malformed (poison) message: reject without requeue, broker dead-letters
//! - transient failure: requeue, until the delivery count reaches the bound,
//!   then reject

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use postbox_events::{Broker, BrokerConsumer, Delivery, EventHandler, HandleError};

use crate::worker::WorkerHandle;

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub queue: String,
    /// Deliveries handled concurrently at any moment.
    pub prefetch: u16,
    /// Delivery attempts per message before dead-lettering.
    pub max_retries: u32,
}

impl ConsumerConfig {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            prefetch: 10,
            max_retries: 3,
        }
    }

    pub fn with_prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = prefetch;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// Outcome of one handler task: the delivery it worked on plus its verdict.
type FinishedHandling = (Delivery, Result<(), HandleError>);

/// Single-handler consumer loop over one queue.
pub struct ConsumerPipeline<B, H>
where
    B: Broker,
{
    broker: B,
    handler: Arc<H>,
    config: ConsumerConfig,
}

impl<B, H> ConsumerPipeline<B, H>
where
    B: Broker,
    H: EventHandler + 'static,
{
    pub fn new(broker: B, handler: H, config: ConsumerConfig) -> Self {
        Self {
            broker,
            handler: Arc::new(handler),
            config,
        }
    }

    /// Spawn the pipeline as a background task.
    pub fn spawn(self, name: &'static str) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(self.run(name, shutdown_rx));
        WorkerHandle::new(name, shutdown_tx, join)
    }

    /// Consume until shutdown is signalled. On shutdown the pipeline stops
    /// accepting new deliveries and drains the in-flight ones (commit or
    /// rollback) before exiting.
    pub async fn run(self, name: &'static str, mut shutdown: watch::Receiver<bool>) {
        let mut consumer = match self
            .broker
            .subscribe(&self.config.queue, self.config.prefetch)
            .await
        {
            Ok(consumer) => consumer,
            Err(e) => {
                error!(worker = name, queue = %self.config.queue, error = %e, "failed to subscribe");
                return;
            }
        };

        info!(worker = name, queue = %self.config.queue, "consumer started");

        let prefetch = usize::from(self.config.prefetch.max(1));
        let mut in_flight: JoinSet<FinishedHandling> = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                Some(finished) = in_flight.join_next(), if !in_flight.is_empty() => {
                    self.settle(&mut consumer, finished).await;
                }
                next = consumer.next(), if in_flight.len() < prefetch => match next {
                    Ok(Some(delivery)) => self.dispatch(&mut consumer, &mut in_flight, delivery).await,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(worker = name, error = %e, "consume failed, backing off");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }

        while let Some(finished) = in_flight.join_next().await {
            self.settle(&mut consumer, finished).await;
        }

        info!(worker = name, queue = %self.config.queue, "consumer stopped");
    }

    /// Start handling one delivery on its own task, unless its delivery
    /// count is already exhausted.
    async fn dispatch(
        &self,
        consumer: &mut B::Consumer,
        in_flight: &mut JoinSet<FinishedHandling>,
        delivery: Delivery,
    ) {
        if delivery.delivery_count > self.config.max_retries {
            warn!(
                queue = %self.config.queue,
                message_id = %delivery.message.message_id,
                delivery_count = delivery.delivery_count,
                "delivery attempts exhausted, dead-lettering"
            );
            let outcome = consumer
                .reject(delivery, "delivery attempts exhausted")
                .await;
            log_broker_outcome(&self.config.queue, outcome);
            return;
        }

        let handler = self.handler.clone();
        in_flight.spawn(async move {
            let verdict = handler.handle(&delivery.message).await;
            (delivery, verdict)
        });
    }

    /// Acknowledge one finished handler task.
    async fn settle(
        &self,
        consumer: &mut B::Consumer,
        finished: Result<FinishedHandling, JoinError>,
    ) {
        let queue = self.config.queue.as_str();

        let (delivery, verdict) = match finished {
            Ok(done) => done,
            Err(e) => {
                // The handler task panicked or was aborted; the delivery was
                // never acknowledged and the broker redelivers it.
                warn!(queue, error = %e, "handler task failed");
                return;
            }
        };

        match verdict {
            Ok(()) => {
                debug!(queue, message_id = %delivery.message.message_id, "delivery handled");
                let outcome = consumer.ack(delivery).await;
                log_broker_outcome(queue, outcome);
            }
            Err(HandleError::Malformed(reason)) => {
                warn!(queue, %reason, "poison message, dead-lettering");
                let outcome = consumer.reject(delivery, &reason).await;
                log_broker_outcome(queue, outcome);
            }
            Err(HandleError::Failed(reason)) => {
                if delivery.delivery_count >= self.config.max_retries {
                    warn!(
                        queue,
                        message_id = %delivery.message.message_id,
                        delivery_count = delivery.delivery_count,
                        %reason,
                        "retries exhausted, dead-lettering"
                    );
                    let outcome = consumer.reject(delivery, &reason).await;
                    log_broker_outcome(queue, outcome);
                } else {
                    debug!(queue, %reason, "handling failed, requeueing");
                    let outcome = consumer.requeue(delivery).await;
                    log_broker_outcome(queue, outcome);
                }
            }
        }
    }
}

fn log_broker_outcome(queue: &str, outcome: Result<(), postbox_events::BrokerError>) {
    if let Err(e) = outcome {
        warn!(queue, error = %e, "broker acknowledgement failed");
    }
}
