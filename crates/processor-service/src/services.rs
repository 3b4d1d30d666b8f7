//! Infrastructure wiring: stores, broker, policy, background workers.
//!
//! Same two profiles as the order service: Postgres + Redis Streams when
//! `DB_DSN`/`BROKER_URL` are set and the `redis` feature is enabled,
//! in-memory otherwise.

use std::sync::Arc;

use postbox_events::{Broker, InMemoryBroker, Topology, ORDER_CREATED_QUEUE};
use postbox_infra::{
    Config, ConsumerConfig, ConsumerPipeline, InMemoryProcessorDb, InMemoryProcessorUowFactory,
    OrderCreatedHandler, OutboxPublisher, PublisherConfig, WorkerHandle,
};
use postbox_observability::Metrics;
use postbox_processor::StandardPolicy;

#[cfg(feature = "redis")]
use postbox_infra::{ensure_processor_schema, PgOutboxStore, PgProcessorUowFactory, RedisBroker};
#[cfg(feature = "redis")]
use sqlx::{postgres::PgPoolOptions, PgPool};

pub enum ProcessorServices {
    InMemory {
        broker: Arc<InMemoryBroker>,
    },
    #[cfg(feature = "redis")]
    Persistent {
        pool: PgPool,
        broker: RedisBroker,
    },
}

impl ProcessorServices {
    /// Close the transport on shutdown (in-memory broker only).
    pub fn close_broker(&self) {
        #[allow(irrefutable_let_patterns)]
        if let ProcessorServices::InMemory { broker, .. } = self {
            broker.close();
        }
    }

    /// Whether the database and broker behind this service are reachable.
    pub async fn healthy(&self) -> bool {
        match self {
            ProcessorServices::InMemory { .. } => true,
            #[cfg(feature = "redis")]
            ProcessorServices::Persistent { pool, broker } => {
                let db_ok = sqlx::query("SELECT 1").execute(pool).await.is_ok();
                db_ok && broker.ping().await.is_ok()
            }
        }
    }
}

/// Build the service graph and start its background workers.
pub async fn build(
    config: &Config,
    metrics: Arc<Metrics>,
) -> (Arc<ProcessorServices>, Vec<WorkerHandle>) {
    #[cfg(feature = "redis")]
    if let (Some(db_dsn), Some(broker_url)) = (&config.db_dsn, &config.broker_url) {
        return build_persistent(config, metrics, db_dsn, broker_url).await;
    }

    if config.db_dsn.is_some() {
        tracing::warn!(
            "DB_DSN is set but persistent mode is unavailable (missing BROKER_URL or the \
             redis feature), falling back to in-memory stores"
        );
    }

    build_in_memory(config, metrics).await
}

async fn build_in_memory(
    config: &Config,
    metrics: Arc<Metrics>,
) -> (Arc<ProcessorServices>, Vec<WorkerHandle>) {
    let broker = Arc::new(InMemoryBroker::new());
    broker
        .declare_topology(&Topology::orders())
        .await
        .expect("in-memory topology declaration cannot fail");

    let db = InMemoryProcessorDb::new();
    let factory = InMemoryProcessorUowFactory::new(db.clone());

    let workers = vec![
        OutboxPublisher::new(db, broker.clone(), metrics.clone(), publisher_config(config))
            .spawn("processor-outbox"),
        ConsumerPipeline::new(
            broker.clone(),
            OrderCreatedHandler::new(factory, policy(config), metrics.clone()),
            consumer_config(config),
        )
        .spawn("order-created-consumer"),
    ];

    (Arc::new(ProcessorServices::InMemory { broker }), workers)
}

#[cfg(feature = "redis")]
async fn build_persistent(
    config: &Config,
    metrics: Arc<Metrics>,
    db_dsn: &str,
    broker_url: &str,
) -> (Arc<ProcessorServices>, Vec<WorkerHandle>) {
    let pool = PgPoolOptions::new()
        .acquire_timeout(std::time::Duration::from_secs(10))
        .connect(db_dsn)
        .await
        .expect("failed to connect to Postgres");
    ensure_processor_schema(&pool)
        .await
        .expect("failed to ensure processor schema");

    let broker = RedisBroker::new(broker_url).expect("failed to create Redis broker");
    broker
        .declare_topology(&Topology::orders())
        .await
        .expect("failed to declare broker topology");

    let factory = PgProcessorUowFactory::new(pool.clone());

    let workers = vec![
        OutboxPublisher::new(
            PgOutboxStore::new(pool.clone()),
            broker.clone(),
            metrics.clone(),
            publisher_config(config),
        )
        .spawn("processor-outbox"),
        ConsumerPipeline::new(
            broker.clone(),
            OrderCreatedHandler::new(factory, policy(config), metrics.clone()),
            consumer_config(config),
        )
        .spawn("order-created-consumer"),
    ];

    (
        Arc::new(ProcessorServices::Persistent { pool, broker }),
        workers,
    )
}

fn policy(config: &Config) -> StandardPolicy {
    StandardPolicy::new(
        config.embargo_skus.iter().cloned(),
        config.processing_success_prob,
    )
}

fn publisher_config(config: &Config) -> PublisherConfig {
    PublisherConfig {
        poll_interval: config.outbox_poll_interval,
        batch_size: config.outbox_batch_size,
        max_retries: config.max_retries,
    }
}

fn consumer_config(config: &Config) -> ConsumerConfig {
    ConsumerConfig::new(ORDER_CREATED_QUEUE)
        .with_prefetch(config.consumer_prefetch)
        .with_max_retries(config.max_retries)
}
