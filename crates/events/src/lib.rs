//! `postbox-events` — messaging primitives for the order conversation.
//!
//! This crate defines **mechanics**, not business logic: the wire event
//! schema, deduplication keys, the broker abstraction with its topology, and
//! the consumer handler contract. Delivery is at-least-once everywhere;
//! idempotency lives on the consumer side (inbox) and convergence in the
//! aggregates (version gate).

pub mod broker;
pub mod envelope;
pub mod handler;
pub mod in_memory_broker;
pub mod topology;

pub use broker::{
    Broker, BrokerConsumer, BrokerError, BrokerResult, Delivery, Message, CONTENT_TYPE_JSON,
    HEADER_DEATH_REASON,
};
pub use envelope::{
    event_key, ItemLine, OrderCreated, OrderProcessed, ProcessedStatus, ORDER_CREATED,
    ORDER_PROCESSED,
};
pub use handler::{EventHandler, HandleError};
pub use in_memory_broker::{InMemoryBroker, InMemoryConsumer};
pub use topology::{
    dlq_routing_key, DeadLetterSpec, ExchangeKind, ExchangeSpec, QueueSpec, Topology, DLX_EXCHANGE,
    EVENTS_EXCHANGE, ORDER_CREATED_DLQ, ORDER_CREATED_QUEUE, ORDER_PROCESSED_DLQ,
    ORDER_PROCESSED_QUEUE,
};
