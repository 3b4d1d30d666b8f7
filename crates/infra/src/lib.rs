//! Infrastructure layer: storage adapters (Postgres and in-memory), the
//! outbox publisher pump, the consumer pipeline, event handlers, and
//! configuration.

pub mod config;
pub mod consumer;
pub mod handlers;
pub mod memory;
pub mod outbox;
pub mod postgres;
pub mod publisher;
#[cfg(feature = "redis")]
pub mod redis_broker;
pub mod worker;

#[cfg(test)]
mod integration_tests;

pub use config::Config;
pub use consumer::{ConsumerConfig, ConsumerPipeline};
pub use handlers::{OrderCreatedHandler, OrderProcessedHandler};
pub use memory::{
    InMemoryOrderDb, InMemoryOrderUow, InMemoryOrderUowFactory, InMemoryProcessorDb,
    InMemoryProcessorUow, InMemoryProcessorUowFactory,
};
pub use outbox::{FailureDisposition, OutboxRow, OutboxStore};
pub use postgres::{
    ensure_order_schema, ensure_processor_schema, PgOrderUow, PgOrderUowFactory, PgOutboxStore,
    PgProcessorUow, PgProcessorUowFactory,
};
pub use publisher::{OutboxPublisher, PublisherConfig};
#[cfg(feature = "redis")]
pub use redis_broker::{RedisBroker, RedisConsumer};
pub use worker::WorkerHandle;
