//! Infrastructure wiring: stores, broker, use cases, background workers.
//!
//! With `DB_DSN` and `BROKER_URL` set (and the `redis` feature enabled) the
//! service runs against Postgres and the Redis Streams broker; otherwise
//! everything runs on the in-memory adapters, which is the dev/test profile.

use std::sync::Arc;

use postbox_core::OrderId;
use postbox_events::{Broker, InMemoryBroker, Topology, ORDER_PROCESSED_QUEUE};
use postbox_infra::{
    Config, ConsumerConfig, ConsumerPipeline, InMemoryOrderDb, InMemoryOrderUowFactory,
    OrderProcessedHandler, OutboxPublisher, PublisherConfig, WorkerHandle,
};
use postbox_observability::Metrics;
use postbox_order::{
    CreateOrderCommand, CreateOrderUseCase, CreateOutcome, Order, OrderError,
    OrderUnitOfWork, OrderUnitOfWorkFactory,
};

#[cfg(feature = "redis")]
use postbox_infra::{ensure_order_schema, PgOrderUowFactory, PgOutboxStore, RedisBroker};
#[cfg(feature = "redis")]
use sqlx::{postgres::PgPoolOptions, PgPool};

pub enum OrderServices {
    InMemory {
        create: CreateOrderUseCase<InMemoryOrderUowFactory>,
        factory: InMemoryOrderUowFactory,
        broker: Arc<InMemoryBroker>,
    },
    #[cfg(feature = "redis")]
    Persistent {
        create: CreateOrderUseCase<PgOrderUowFactory>,
        factory: PgOrderUowFactory,
        pool: PgPool,
        broker: RedisBroker,
    },
}

impl OrderServices {
    pub async fn create_order(&self, cmd: CreateOrderCommand) -> Result<CreateOutcome, OrderError> {
        match self {
            OrderServices::InMemory { create, .. } => create.execute(cmd).await,
            #[cfg(feature = "redis")]
            OrderServices::Persistent { create, .. } => create.execute(cmd).await,
        }
    }

    /// Read-only lookup; the scope is dropped (rolled back) after the read.
    pub async fn get_order(&self, order_id: &OrderId) -> Result<Option<Order>, OrderError> {
        match self {
            OrderServices::InMemory { factory, .. } => {
                let mut uow = factory.begin().await?;
                Ok(uow.get_order(order_id).await?)
            }
            #[cfg(feature = "redis")]
            OrderServices::Persistent { factory, .. } => {
                let mut uow = factory.begin().await?;
                Ok(uow.get_order(order_id).await?)
            }
        }
    }

    /// Close the transport on shutdown (in-memory broker only; the Redis
    /// broker has no process-local state to release).
    pub fn close_broker(&self) {
        #[allow(irrefutable_let_patterns)]
        if let OrderServices::InMemory { broker, .. } = self {
            broker.close();
        }
    }

    /// Whether the database and broker behind this service are reachable.
    pub async fn healthy(&self) -> bool {
        match self {
            OrderServices::InMemory { .. } => true,
            #[cfg(feature = "redis")]
            OrderServices::Persistent { pool, broker, .. } => {
                let db_ok = sqlx::query("SELECT 1").execute(pool).await.is_ok();
                db_ok && broker.ping().await.is_ok()
            }
        }
    }
}

/// Build the service graph and start its background workers.
pub async fn build(config: &Config, metrics: Arc<Metrics>) -> (Arc<OrderServices>, Vec<WorkerHandle>) {
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
) -> (Arc<OrderServices>, Vec<WorkerHandle>) {
    let broker = Arc::new(InMemoryBroker::new());
    broker
        .declare_topology(&Topology::orders())
        .await
        .expect("in-memory topology declaration cannot fail");

    let db = InMemoryOrderDb::new();
    let factory = InMemoryOrderUowFactory::new(db.clone());

    let workers = vec![
        OutboxPublisher::new(db.clone(), broker.clone(), metrics.clone(), publisher_config(config))
            .spawn("order-outbox"),
        ConsumerPipeline::new(
            broker.clone(),
            OrderProcessedHandler::new(factory.clone(), metrics.clone()),
            consumer_config(config),
        )
        .spawn("order-processed-consumer"),
    ];

    let services = Arc::new(OrderServices::InMemory {
        create: CreateOrderUseCase::new(factory.clone()),
        factory,
        broker,
    });

    (services, workers)
}

#[cfg(feature = "redis")]
async fn build_persistent(
    config: &Config,
    metrics: Arc<Metrics>,
    db_dsn: &str,
    broker_url: &str,
) -> (Arc<OrderServices>, Vec<WorkerHandle>) {
    let pool = PgPoolOptions::new()
        .acquire_timeout(std::time::Duration::from_secs(10))
        .connect(db_dsn)
        .await
        .expect("failed to connect to Postgres");
    ensure_order_schema(&pool)
        .await
        .expect("failed to ensure order schema");

    let broker = RedisBroker::new(broker_url).expect("failed to create Redis broker");
    broker
        .declare_topology(&Topology::orders())
        .await
        .expect("failed to declare broker topology");

    let factory = PgOrderUowFactory::new(pool.clone());

    let workers = vec![
        OutboxPublisher::new(
            PgOutboxStore::new(pool.clone()),
            broker.clone(),
            metrics.clone(),
            publisher_config(config),
        )
        .spawn("order-outbox"),
        ConsumerPipeline::new(
            broker.clone(),
            OrderProcessedHandler::new(factory.clone(), metrics.clone()),
            consumer_config(config),
        )
        .spawn("order-processed-consumer"),
    ];

    let services = Arc::new(OrderServices::Persistent {
        create: CreateOrderUseCase::new(factory.clone()),
        factory,
        pool,
        broker,
    });

    (services, workers)
}

fn publisher_config(config: &Config) -> PublisherConfig {
    PublisherConfig {
        poll_interval: config.outbox_poll_interval,
        batch_size: config.outbox_batch_size,
        max_retries: config.max_retries,
    }
}

fn consumer_config(config: &Config) -> ConsumerConfig {
    ConsumerConfig::new(ORDER_PROCESSED_QUEUE)
        .with_prefetch(config.consumer_prefetch)
        .with_max_retries(config.max_retries)
}
