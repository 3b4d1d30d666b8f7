//! Integration tests for the full conversation:
//! create-order → outbox pump → broker → processor → outbox pump → broker →
//! apply-processed, over the in-memory broker and stores.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use postbox_events::{
    Broker, EventHandler, HandleError, InMemoryBroker, Message, Topology, HEADER_DEATH_REASON,
    EVENTS_EXCHANGE, ORDER_CREATED, ORDER_CREATED_DLQ, ORDER_CREATED_QUEUE, ORDER_PROCESSED,
    ORDER_PROCESSED_QUEUE,
};
use postbox_observability::Metrics;
use postbox_order::{CreateOrderCommand, CreateOrderUseCase, OrderStatus};
use postbox_processor::{FixedPolicy, ProcessingPolicy, ProcessingStatus, StandardPolicy};

use crate::consumer::{ConsumerConfig, ConsumerPipeline};
use crate::handlers::{OrderCreatedHandler, OrderProcessedHandler};
use crate::memory::{
    InMemoryOrderDb, InMemoryOrderUowFactory, InMemoryProcessorDb, InMemoryProcessorUowFactory,
};
use crate::publisher::{OutboxPublisher, PublisherConfig};
use crate::worker::WorkerHandle;

fn fast_publisher_config() -> PublisherConfig {
    PublisherConfig {
        poll_interval: Duration::from_millis(20),
        batch_size: 100,
        max_retries: 3,
    }
}

struct Conversation {
    broker: Arc<InMemoryBroker>,
    order_db: InMemoryOrderDb,
    processor_db: InMemoryProcessorDb,
    order_metrics: Arc<Metrics>,
    processor_metrics: Arc<Metrics>,
    workers: Vec<WorkerHandle>,
}

impl Conversation {
    /// Wire both services end to end over one in-memory broker.
    async fn start(policy: impl ProcessingPolicy + 'static) -> Self {
        let broker = Arc::new(InMemoryBroker::new());
        broker.declare_topology(&Topology::orders()).await.unwrap();

        let order_db = InMemoryOrderDb::new();
        let processor_db = InMemoryProcessorDb::new();
        let order_metrics = Metrics::arc();
        let processor_metrics = Metrics::arc();

        let workers = vec![
            OutboxPublisher::new(
                order_db.clone(),
                broker.clone(),
                order_metrics.clone(),
                fast_publisher_config(),
            )
            .spawn("order-outbox"),
            OutboxPublisher::new(
                processor_db.clone(),
                broker.clone(),
                processor_metrics.clone(),
                fast_publisher_config(),
            )
            .spawn("processor-outbox"),
            ConsumerPipeline::new(
                broker.clone(),
                OrderCreatedHandler::new(
                    InMemoryProcessorUowFactory::new(processor_db.clone()),
                    policy,
                    processor_metrics.clone(),
                ),
                ConsumerConfig::new(ORDER_CREATED_QUEUE),
            )
            .spawn("order-created-consumer"),
            ConsumerPipeline::new(
                broker.clone(),
                OrderProcessedHandler::new(
                    InMemoryOrderUowFactory::new(order_db.clone()),
                    order_metrics.clone(),
                ),
                ConsumerConfig::new(ORDER_PROCESSED_QUEUE),
            )
            .spawn("order-processed-consumer"),
        ];

        Self {
            broker,
            order_db,
            processor_db,
            order_metrics,
            processor_metrics,
            workers,
        }
    }

    async fn create_order(&self, order_id: &str, skus: &[(&str, u32, f64)]) {
        let use_case = CreateOrderUseCase::new(InMemoryOrderUowFactory::new(self.order_db.clone()));
        use_case
            .execute(CreateOrderCommand {
                order_id: order_id.to_string(),
                customer_id: "c-1".to_string(),
                items: skus
                    .iter()
                    .map(|(sku, quantity, price)| postbox_events::ItemLine {
                        sku: sku.to_string(),
                        quantity: *quantity,
                        price: *price,
                    })
                    .collect(),
            })
            .await
            .unwrap();
    }

    async fn stop(self) {
        for worker in self.workers {
            worker.shutdown_within(Duration::from_secs(5)).await;
        }
        self.broker.close();
    }
}

/// Poll until `condition` holds, failing the test after five seconds.
async fn wait_for(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}

#[tokio::test]
async fn conversation_converges_to_done() {
    let conversation = Conversation::start(FixedPolicy::succeeding()).await;
    conversation
        .create_order("ord-1", &[("laptop", 1, 1200.0), ("mouse", 2, 25.0)])
        .await;

    let order_db = conversation.order_db.clone();
    wait_for("order to leave pending", || {
        order_db
            .order("ord-1")
            .is_some_and(|o| o.status() != OrderStatus::Pending)
    })
    .await;

    let order = conversation.order_db.order("ord-1").unwrap();
    assert_eq!(order.status(), OrderStatus::Done);
    assert_eq!(order.version(), 1);
    assert_eq!(order.total_amount(), 1250.0);
    assert_eq!(order.fail_reason(), None);

    let state = conversation.processor_db.processing_state("ord-1").unwrap();
    assert_eq!(state.status(), ProcessingStatus::Success);
    assert_eq!(state.attempt_count(), 1);

    // Both outbox rows end up published, none dead-lettered.
    let order_db = conversation.order_db.clone();
    let processor_db = conversation.processor_db.clone();
    wait_for("all outbox rows to be marked published", || {
        let published = |rows: Vec<crate::outbox::OutboxRow>| {
            !rows.is_empty() && rows.iter().all(|r| r.published_at.is_some() && r.dlq_at.is_none())
        };
        published(order_db.outbox_rows()) && published(processor_db.outbox_rows())
    })
    .await;

    assert_eq!(conversation.order_metrics.events_published(), 1);
    assert_eq!(conversation.processor_metrics.events_published(), 1);
    assert_eq!(conversation.processor_metrics.orders_processed(), 1);
    assert_eq!(conversation.order_metrics.orders_processed(), 1);

    conversation.stop().await;
}

#[tokio::test]
async fn embargoed_order_converges_to_failed() {
    let conversation = Conversation::start(StandardPolicy::default()).await;
    conversation
        .create_order("ord-embargo", &[("pineapple_pizza", 1, 15.0)])
        .await;

    let order_db = conversation.order_db.clone();
    wait_for("order to fail", || {
        order_db
            .order("ord-embargo")
            .is_some_and(|o| o.status() == OrderStatus::Failed)
    })
    .await;

    let order = conversation.order_db.order("ord-embargo").unwrap();
    assert_eq!(order.fail_reason(), Some("embargo:pineapple_pizza"));

    let state = conversation
        .processor_db
        .processing_state("ord-embargo")
        .unwrap();
    assert_eq!(state.status(), ProcessingStatus::Failed);
    assert_eq!(state.last_error(), Some("embargo:pineapple_pizza"));

    conversation.stop().await;
}

#[tokio::test]
async fn duplicate_create_produces_one_event() {
    let conversation = Conversation::start(FixedPolicy::succeeding()).await;
    conversation.create_order("ord-1", &[("laptop", 1, 1.0)]).await;
    conversation.create_order("ord-1", &[("laptop", 1, 1.0)]).await;

    let order_db = conversation.order_db.clone();
    wait_for("order to converge", || {
        order_db
            .order("ord-1")
            .is_some_and(|o| o.status() != OrderStatus::Pending)
    })
    .await;

    let created: Vec<_> = conversation
        .order_db
        .outbox_rows()
        .into_iter()
        .filter(|r| r.event_type == ORDER_CREATED)
        .collect();
    assert_eq!(created.len(), 1);

    conversation.stop().await;
}

#[tokio::test]
async fn poison_message_lands_in_dlq_and_consumption_continues() {
    let conversation = Conversation::start(FixedPolicy::succeeding()).await;

    conversation
        .broker
        .publish(
            EVENTS_EXCHANGE,
            Message::json("poison-1", ORDER_CREATED, b"not json".to_vec()),
        )
        .await
        .unwrap();

    let broker = conversation.broker.clone();
    wait_for("poison message to reach the DLQ", || {
        broker.queue_depth(ORDER_CREATED_DLQ) == 1
    })
    .await;

    let dead = conversation.broker.queued_messages(ORDER_CREATED_DLQ);
    assert!(dead[0].headers.contains_key(HEADER_DEATH_REASON));

    // No state row was created for the poison payload, and a subsequent
    // valid order still processes.
    conversation.create_order("ord-after", &[("laptop", 1, 1.0)]).await;
    let order_db = conversation.order_db.clone();
    wait_for("subsequent order to converge", || {
        order_db
            .order("ord-after")
            .is_some_and(|o| o.status() != OrderStatus::Pending)
    })
    .await;

    conversation.stop().await;
}

#[tokio::test]
async fn redelivered_processed_event_applies_once() {
    let conversation = Conversation::start(FixedPolicy::succeeding()).await;
    conversation.create_order("ord-1", &[("laptop", 1, 1.0)]).await;

    let order_db = conversation.order_db.clone();
    wait_for("order to converge", || {
        order_db
            .order("ord-1")
            .is_some_and(|o| o.status() == OrderStatus::Done)
    })
    .await;

    // Replay the processor's own emission verbatim.
    let processed_row = conversation
        .processor_db
        .outbox_rows()
        .into_iter()
        .find(|r| r.event_type == ORDER_PROCESSED)
        .unwrap();
    for _ in 0..3 {
        conversation
            .broker
            .publish(
                EVENTS_EXCHANGE,
                Message::json(
                    "replay-1",
                    ORDER_PROCESSED,
                    serde_json::to_vec(&processed_row.payload).unwrap(),
                ),
            )
            .await
            .unwrap();
    }

    let broker = conversation.broker.clone();
    wait_for("replays to drain", || {
        broker.queue_depth(ORDER_PROCESSED_QUEUE) == 0
    })
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let order = conversation.order_db.order("ord-1").unwrap();
    assert_eq!(order.version(), 1);
    assert_eq!(conversation.order_db.inbox_len(), 1);
    assert_eq!(conversation.order_metrics.orders_processed(), 1);

    conversation.stop().await;
}

#[tokio::test]
async fn stale_processed_version_is_absorbed() {
    let conversation = Conversation::start(FixedPolicy::succeeding()).await;
    conversation.create_order("ord-1", &[("laptop", 1, 1.0)]).await;

    let order_db = conversation.order_db.clone();
    wait_for("order to converge", || {
        order_db
            .order("ord-1")
            .is_some_and(|o| o.status() == OrderStatus::Done)
    })
    .await;

    // A version-0 outcome against an order already at version 1.
    conversation
        .broker
        .publish(
            EVENTS_EXCHANGE,
            Message::json(
                "stale-1",
                ORDER_PROCESSED,
                serde_json::to_vec(&serde_json::json!({
                    "order_id": "ord-1",
                    "status": "failed",
                    "fail_reason": "late",
                    "version": 0,
                }))
                .unwrap(),
            ),
        )
        .await
        .unwrap();

    let order_db = conversation.order_db.clone();
    wait_for("stale event to be inboxed", || {
        order_db.inbox_contains("order.processed:ord-1:0")
    })
    .await;

    let order = conversation.order_db.order("ord-1").unwrap();
    assert_eq!(order.status(), OrderStatus::Done);
    assert_eq!(order.version(), 1);

    conversation.stop().await;
}

#[tokio::test]
async fn publisher_retries_through_a_broker_outage() {
    // A broker with no declared topology rejects publishes, standing in for
    // an outage; declaring the topology is the recovery.
    let broker = Arc::new(InMemoryBroker::new());
    let order_db = InMemoryOrderDb::new();
    let metrics = Metrics::arc();

    let use_case = CreateOrderUseCase::new(InMemoryOrderUowFactory::new(order_db.clone()));
    use_case
        .execute(CreateOrderCommand {
            order_id: "ord-1".to_string(),
            customer_id: "c-1".to_string(),
            items: vec![postbox_events::ItemLine {
                sku: "laptop".to_string(),
                quantity: 1,
                price: 1.0,
            }],
        })
        .await
        .unwrap();

    let pump = OutboxPublisher::new(
        order_db.clone(),
        broker.clone(),
        metrics.clone(),
        PublisherConfig {
            poll_interval: Duration::from_millis(20),
            batch_size: 100,
            max_retries: 1_000,
        },
    )
    .spawn("order-outbox");

    let db = order_db.clone();
    wait_for("publish failures to be recorded", || {
        db.outbox_rows()[0].retry_count >= 1
    })
    .await;
    assert!(order_db.outbox_rows()[0].published_at.is_none());

    broker.declare_topology(&Topology::orders()).await.unwrap();

    let db = order_db.clone();
    wait_for("row to publish after recovery", || {
        db.outbox_rows()[0].published_at.is_some()
    })
    .await;
    assert_eq!(broker.queue_depth(ORDER_CREATED_QUEUE), 1);

    pump.shutdown_within(Duration::from_secs(5)).await;
}

struct AlwaysFailingHandler;

#[async_trait]
impl EventHandler for AlwaysFailingHandler {
    async fn handle(&self, _message: &Message) -> Result<(), HandleError> {
        Err(HandleError::failed("induced failure"))
    }
}

#[tokio::test]
async fn consumer_dead_letters_after_bounded_retries() {
    let broker = Arc::new(InMemoryBroker::new());
    broker.declare_topology(&Topology::orders()).await.unwrap();

    let pipeline = ConsumerPipeline::new(
        broker.clone(),
        AlwaysFailingHandler,
        ConsumerConfig::new(ORDER_CREATED_QUEUE).with_max_retries(3),
    )
    .spawn("failing-consumer");

    broker
        .publish(
            EVENTS_EXCHANGE,
            Message::json("m-1", ORDER_CREATED, b"{}".to_vec()),
        )
        .await
        .unwrap();

    let b = broker.clone();
    wait_for("message to be dead-lettered", || {
        b.queue_depth(ORDER_CREATED_DLQ) == 1
    })
    .await;

    let dead = broker.queued_messages(ORDER_CREATED_DLQ);
    assert_eq!(
        dead[0].headers.get(HEADER_DEATH_REASON).map(String::as_str),
        Some("induced failure")
    );
    assert_eq!(broker.queue_depth(ORDER_CREATED_QUEUE), 0);

    pipeline.shutdown_within(Duration::from_secs(5)).await;
}
