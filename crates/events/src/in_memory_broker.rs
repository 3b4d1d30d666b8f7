//! In-memory broker for tests and single-process runs.
//!
//! Implements the same semantics the production topology relies on: routing
//! by binding key, per-delivery redelivery counts, and dead-letter routing on
//! reject. Delivery is at-least-once; consumers must be idempotent.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::broker::{
    Broker, BrokerConsumer, BrokerError, BrokerResult, Delivery, Message, HEADER_DEATH_REASON,
};
use crate::topology::{DeadLetterSpec, Topology};

#[derive(Debug, Default)]
struct ExchangeState {
    /// `(routing_key, queue)` bindings. Keys in this topology are literal;
    /// topic wildcards are not needed and not implemented.
    bindings: Vec<(String, String)>,
}

#[derive(Debug, Default)]
struct QueueState {
    messages: VecDeque<QueuedMessage>,
    dead_letter: Option<DeadLetterSpec>,
}

#[derive(Debug)]
struct QueuedMessage {
    message: Message,
    delivery_count: u32,
}

#[derive(Debug, Default)]
struct BrokerState {
    closed: bool,
    exchanges: HashMap<String, ExchangeState>,
    queues: HashMap<String, QueueState>,
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<BrokerState>,
    notify: Notify,
}

impl Inner {
    fn route(
        state: &mut BrokerState,
        exchange: &str,
        message: Message,
        delivery_count: u32,
    ) -> BrokerResult<()> {
        let bindings = state
            .exchanges
            .get(exchange)
            .ok_or_else(|| BrokerError::UnknownExchange(exchange.to_string()))?
            .bindings
            .clone();

        for (key, queue) in bindings {
            if key != message.routing_key {
                continue;
            }
            if let Some(q) = state.queues.get_mut(&queue) {
                q.messages.push_back(QueuedMessage {
                    message: message.clone(),
                    delivery_count,
                });
            }
        }
        // Unroutable messages are dropped, as on an unbound topic exchange.
        Ok(())
    }
}

/// In-memory topic broker.
#[derive(Debug, Default, Clone)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shut the broker down; pending `next()` calls return `None`.
    pub fn close(&self) {
        self.inner.state.lock().unwrap().closed = true;
        self.inner.notify.notify_waiters();
    }

    /// Number of messages waiting in a queue (diagnostics/tests).
    pub fn queue_depth(&self, queue: &str) -> usize {
        let state = self.inner.state.lock().unwrap();
        state.queues.get(queue).map_or(0, |q| q.messages.len())
    }

    /// Snapshot of a queue's pending messages (diagnostics/tests).
    pub fn queued_messages(&self, queue: &str) -> Vec<Message> {
        let state = self.inner.state.lock().unwrap();
        state
            .queues
            .get(queue)
            .map(|q| q.messages.iter().map(|m| m.message.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    type Consumer = InMemoryConsumer;

    async fn declare_topology(&self, topology: &Topology) -> BrokerResult<()> {
        let mut state = self.inner.state.lock().unwrap();

        for exchange in &topology.exchanges {
            state.exchanges.entry(exchange.name.clone()).or_default();
        }

        for queue in &topology.queues {
            let dead_letter = queue.dead_letter.clone();
            state
                .queues
                .entry(queue.name.clone())
                .or_default()
                .dead_letter = dead_letter;

            let exchange = state
                .exchanges
                .get_mut(&queue.exchange)
                .ok_or_else(|| BrokerError::UnknownExchange(queue.exchange.clone()))?;
            let binding = (queue.routing_key.clone(), queue.name.clone());
            if !exchange.bindings.contains(&binding) {
                exchange.bindings.push(binding);
            }
        }

        Ok(())
    }

    async fn publish(&self, exchange: &str, message: Message) -> BrokerResult<()> {
        {
            let mut state = self.inner.state.lock().unwrap();
            if state.closed {
                return Err(BrokerError::Connection("broker closed".to_string()));
            }
            Inner::route(&mut state, exchange, message, 0)?;
        }

        self.inner.notify.notify_waiters();
        Ok(())
    }

    async fn subscribe(&self, queue: &str, prefetch: u16) -> BrokerResult<InMemoryConsumer> {
        let state = self.inner.state.lock().unwrap();
        if !state.queues.contains_key(queue) {
            return Err(BrokerError::UnknownQueue(queue.to_string()));
        }
        drop(state);

        Ok(InMemoryConsumer {
            inner: self.inner.clone(),
            queue: queue.to_string(),
            prefetch: usize::from(prefetch.max(1)),
            in_flight: 0,
            next_tag: 0,
        })
    }
}

/// Consumer over one in-memory queue.
#[derive(Debug)]
pub struct InMemoryConsumer {
    inner: Arc<Inner>,
    queue: String,
    prefetch: usize,
    in_flight: usize,
    next_tag: u64,
}

#[async_trait]
impl BrokerConsumer for InMemoryConsumer {
    async fn next(&mut self) -> BrokerResult<Option<Delivery>> {
        loop {
            // Register the waiter before checking state so a publish between
            // the check and the await is not missed.
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.inner.state.lock().unwrap();
                if state.closed {
                    return Ok(None);
                }

                if self.in_flight < self.prefetch {
                    let queue = state
                        .queues
                        .get_mut(&self.queue)
                        .ok_or_else(|| BrokerError::UnknownQueue(self.queue.clone()))?;

                    if let Some(mut queued) = queue.messages.pop_front() {
                        queued.delivery_count += 1;
                        self.in_flight += 1;
                        self.next_tag += 1;
                        return Ok(Some(Delivery {
                            message: queued.message,
                            delivery_count: queued.delivery_count,
                            tag: self.next_tag.to_string(),
                        }));
                    }
                }
            }

            notified.await;
        }
    }

    async fn ack(&mut self, delivery: Delivery) -> BrokerResult<()> {
        drop(delivery);
        self.in_flight = self.in_flight.saturating_sub(1);
        Ok(())
    }

    async fn requeue(&mut self, delivery: Delivery) -> BrokerResult<()> {
        self.in_flight = self.in_flight.saturating_sub(1);

        {
            let mut state = self.inner.state.lock().unwrap();
            let queue = state
                .queues
                .get_mut(&self.queue)
                .ok_or_else(|| BrokerError::UnknownQueue(self.queue.clone()))?;
            // Delivery count is retained; the next pop increments it again.
            queue.messages.push_front(QueuedMessage {
                message: delivery.message,
                delivery_count: delivery.delivery_count,
            });
        }

        self.inner.notify.notify_waiters();
        Ok(())
    }

    async fn reject(&mut self, delivery: Delivery, reason: &str) -> BrokerResult<()> {
        self.in_flight = self.in_flight.saturating_sub(1);

        {
            let mut state = self.inner.state.lock().unwrap();
            let dead_letter = state
                .queues
                .get(&self.queue)
                .ok_or_else(|| BrokerError::UnknownQueue(self.queue.clone()))?
                .dead_letter
                .clone();

            if let Some(dl) = dead_letter {
                let mut message = delivery.message;
                message.routing_key = dl.routing_key.clone();
                message
                    .headers
                    .insert(HEADER_DEATH_REASON.to_string(), reason.to_string());
                Inner::route(&mut state, &dl.exchange, message, 0)?;
            }
            // No DLX binding: the message is discarded.
        }

        self.inner.notify.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{Topology, EVENTS_EXCHANGE, ORDER_CREATED_DLQ, ORDER_CREATED_QUEUE};

    fn message(routing_key: &str, body: &str) -> Message {
        Message::json("m-1", routing_key, body.as_bytes().to_vec())
    }

    async fn broker() -> InMemoryBroker {
        let broker = InMemoryBroker::new();
        broker.declare_topology(&Topology::orders()).await.unwrap();
        broker
    }

    #[tokio::test]
    async fn publish_routes_by_binding_key() {
        let broker = broker().await;

        broker
            .publish(EVENTS_EXCHANGE, message("order.created", "{}"))
            .await
            .unwrap();

        assert_eq!(broker.queue_depth(ORDER_CREATED_QUEUE), 1);
        assert_eq!(broker.queue_depth("order.processed.q"), 0);
    }

    #[tokio::test]
    async fn consume_ack_removes_message() {
        let broker = broker().await;
        broker
            .publish(EVENTS_EXCHANGE, message("order.created", "{}"))
            .await
            .unwrap();

        let mut consumer = broker.subscribe(ORDER_CREATED_QUEUE, 10).await.unwrap();
        let delivery = consumer.next().await.unwrap().unwrap();
        assert_eq!(delivery.delivery_count, 1);
        consumer.ack(delivery).await.unwrap();

        assert_eq!(broker.queue_depth(ORDER_CREATED_QUEUE), 0);
    }

    #[tokio::test]
    async fn requeue_bumps_delivery_count() {
        let broker = broker().await;
        broker
            .publish(EVENTS_EXCHANGE, message("order.created", "{}"))
            .await
            .unwrap();

        let mut consumer = broker.subscribe(ORDER_CREATED_QUEUE, 10).await.unwrap();
        let first = consumer.next().await.unwrap().unwrap();
        assert_eq!(first.delivery_count, 1);
        consumer.requeue(first).await.unwrap();

        let second = consumer.next().await.unwrap().unwrap();
        assert_eq!(second.delivery_count, 2);
    }

    #[tokio::test]
    async fn reject_dead_letters_with_reason_header() {
        let broker = broker().await;
        broker
            .publish(EVENTS_EXCHANGE, message("order.created", "not json"))
            .await
            .unwrap();

        let mut consumer = broker.subscribe(ORDER_CREATED_QUEUE, 10).await.unwrap();
        let delivery = consumer.next().await.unwrap().unwrap();
        consumer.reject(delivery, "decode failure").await.unwrap();

        let dead = broker.queued_messages(ORDER_CREATED_DLQ);
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].routing_key, "order.created.dlq");
        assert_eq!(
            dead[0].headers.get(HEADER_DEATH_REASON).map(String::as_str),
            Some("decode failure")
        );
        assert_eq!(broker.queue_depth(ORDER_CREATED_QUEUE), 0);
    }

    #[tokio::test]
    async fn close_ends_consumption() {
        let broker = broker().await;
        let mut consumer = broker.subscribe(ORDER_CREATED_QUEUE, 10).await.unwrap();

        broker.close();
        assert!(consumer.next().await.unwrap().is_none());

        assert!(broker
            .publish(EVENTS_EXCHANGE, message("order.created", "{}"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn publish_to_undeclared_exchange_fails() {
        let broker = InMemoryBroker::new();
        let err = broker
            .publish(EVENTS_EXCHANGE, message("order.created", "{}"))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::UnknownExchange(_)));
    }
}
