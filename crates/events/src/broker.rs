//! Broker abstraction (mechanics only).
//!
//! Delivery is at-least-once; consumers must be idempotent. The trait makes
//! no assumptions about transport: the in-memory implementation backs tests
//! and single-process runs, the Redis Streams adapter backs multi-process
//! deployments.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::topology::Topology;

/// Content type for all conversation messages.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Header naming the last error before a message was dead-lettered.
pub const HEADER_DEATH_REASON: &str = "x-death-reason";

pub type BrokerResult<T> = Result<T, BrokerError>;

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("broker connection error: {0}")]
    Connection(String),

    #[error("broker command error: {0}")]
    Command(String),

    #[error("unknown exchange: {0}")]
    UnknownExchange(String),

    #[error("unknown queue: {0}")]
    UnknownQueue(String),
}

/// One message on the wire.
///
/// `message_id` is stable per logical event (derived from the producing
/// outbox row), so broker-side duplicates can be diagnosed.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub message_id: String,
    pub routing_key: String,
    pub content_type: String,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl Message {
    /// A persistent JSON message with no extra headers.
    pub fn json(message_id: impl Into<String>, routing_key: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            message_id: message_id.into(),
            routing_key: routing_key.into(),
            content_type: CONTENT_TYPE_JSON.to_string(),
            headers: BTreeMap::new(),
            body,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// A message handed to a consumer, pending acknowledgement.
#[derive(Debug)]
pub struct Delivery {
    pub message: Message,
    /// 1 on first delivery, incremented on every redelivery.
    pub delivery_count: u32,
    /// Opaque per-consumer acknowledgement tag.
    pub tag: String,
}

/// Publish/subscribe contract against the message broker.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    type Consumer: BrokerConsumer;

    /// Declare exchanges, queues, and bindings. Idempotent.
    async fn declare_topology(&self, topology: &Topology) -> BrokerResult<()>;

    /// Publish to an exchange; the routing key travels in the message.
    async fn publish(&self, exchange: &str, message: Message) -> BrokerResult<()>;

    /// Open a consumer on a declared queue with the given prefetch bound.
    async fn subscribe(&self, queue: &str, prefetch: u16) -> BrokerResult<Self::Consumer>;
}

/// Per-queue consumption with explicit acknowledgement.
#[async_trait]
pub trait BrokerConsumer: Send {
    /// Wait for the next delivery. `None` means the broker shut down.
    ///
    /// Cancel-safe: a cancelled call never loses a message.
    async fn next(&mut self) -> BrokerResult<Option<Delivery>>;

    /// Acknowledge: the delivery is done and must not be redelivered.
    async fn ack(&mut self, delivery: Delivery) -> BrokerResult<()>;

    /// Negative-acknowledge with requeue: redeliver later, bumping the
    /// delivery count.
    async fn requeue(&mut self, delivery: Delivery) -> BrokerResult<()>;

    /// Negative-acknowledge without requeue: route to the queue's dead-letter
    /// exchange with an `x-death-reason` header.
    async fn reject(&mut self, delivery: Delivery, reason: &str) -> BrokerResult<()>;
}

#[async_trait]
impl<B> Broker for Arc<B>
where
    B: Broker + ?Sized,
{
    type Consumer = B::Consumer;

    async fn declare_topology(&self, topology: &Topology) -> BrokerResult<()> {
        (**self).declare_topology(topology).await
    }

    async fn publish(&self, exchange: &str, message: Message) -> BrokerResult<()> {
        (**self).publish(exchange, message).await
    }

    async fn subscribe(&self, queue: &str, prefetch: u16) -> BrokerResult<Self::Consumer> {
        (**self).subscribe(queue, prefetch).await
    }
}
