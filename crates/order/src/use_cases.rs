//! Order service use cases: create-order and apply-processed.
//!
//! Both operate inside a single unit-of-work scope and depend on the storage
//! ports only. Infrastructure errors are never caught here; they propagate so
//! the scope rolls back and the caller retries (HTTP client or broker
//! redelivery).

use thiserror::Error;

use postbox_core::{CustomerId, DomainError, OrderId, StoreError};
use postbox_events::{event_key, ItemLine, OrderCreated, ProcessedStatus, ORDER_PROCESSED};

use crate::order::{ApplyResult, Order};
use crate::ports::{OrderUnitOfWork, OrderUnitOfWorkFactory};

#[derive(Debug, Error)]
pub enum OrderError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct CreateOrderCommand {
    pub order_id: String,
    pub customer_id: String,
    pub items: Vec<ItemLine>,
}

/// Whether create-order persisted a new order or found an existing one.
#[derive(Debug, Clone)]
pub enum CreateOutcome {
    /// New order persisted; exactly one `order.created` row was enqueued.
    Created(Order),
    /// The id was already taken; the stored order is returned unchanged and
    /// no event is enqueued (idempotent create).
    Existing(Order),
}

impl CreateOutcome {
    pub fn order(&self) -> &Order {
        match self {
            CreateOutcome::Created(order) | CreateOutcome::Existing(order) => order,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, CreateOutcome::Created(_))
    }
}

/// Create an order and enqueue `order.created`, atomically.
pub struct CreateOrderUseCase<F> {
    factory: F,
}

impl<F> CreateOrderUseCase<F>
where
    F: OrderUnitOfWorkFactory,
{
    pub fn new(factory: F) -> Self {
        Self { factory }
    }

    pub async fn execute(&self, cmd: CreateOrderCommand) -> Result<CreateOutcome, OrderError> {
        let order_id = OrderId::new(cmd.order_id)?;
        let customer_id = CustomerId::new(cmd.customer_id)?;

        let mut uow = self.factory.begin().await?;

        if let Some(existing) = uow.get_order(&order_id).await? {
            uow.commit().await?;
            return Ok(CreateOutcome::Existing(existing));
        }

        let order = Order::create(order_id, customer_id, cmd.items)?;

        let event = OrderCreated {
            order_id: order.order_id().to_string(),
            customer_id: order.customer_id().to_string(),
            items: order.items().to_vec(),
            amount: order.total_amount(),
            version: order.version(),
        };

        uow.upsert_order(&order).await?;
        uow.outbox_put(
            event.routing_key(),
            serde_json::to_value(&event)
                .map_err(|e| StoreError::backend(format!("encode order.created: {e}")))?,
        )
        .await?;
        uow.commit().await?;

        Ok(CreateOutcome::Created(order))
    }
}

#[derive(Debug, Clone)]
pub struct ApplyProcessedCommand {
    pub order_id: String,
    pub status: ProcessedStatus,
    pub fail_reason: Option<String>,
    pub version: u64,
}

/// What a committed apply-processed scope did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The order's version moved strictly upward.
    Applied,
    /// The inbox already held the key (or a concurrent scope won the insert).
    AlreadyApplied,
    /// Version gate: incoming version did not exceed the stored one. The
    /// inbox key is still recorded so the event is never reprocessed.
    Stale,
    /// No such order; tolerated as a no-op with the inbox key recorded.
    UnknownOrder,
}

/// Apply an `order.processed` outcome to the order, effectively once.
pub struct ApplyProcessedUseCase<F> {
    factory: F,
}

impl<F> ApplyProcessedUseCase<F>
where
    F: OrderUnitOfWorkFactory,
{
    pub fn new(factory: F) -> Self {
        Self { factory }
    }

    pub async fn execute(&self, cmd: ApplyProcessedCommand) -> Result<ApplyOutcome, OrderError> {
        let key = event_key(ORDER_PROCESSED, &cmd.order_id, cmd.version);
        let order_id = OrderId::new(cmd.order_id)?;

        let mut uow = self.factory.begin().await?;

        if uow.inbox_exists(&key).await? {
            uow.commit().await?;
            return Ok(ApplyOutcome::AlreadyApplied);
        }

        let Some(mut order) = uow.get_order(&order_id).await? else {
            return finish(uow, &key, ApplyOutcome::UnknownOrder).await;
        };

        match order.apply_processed(cmd.status, cmd.fail_reason, cmd.version) {
            ApplyResult::Stale => finish(uow, &key, ApplyOutcome::Stale).await,
            ApplyResult::Applied => {
                uow.upsert_order(&order).await?;
                finish(uow, &key, ApplyOutcome::Applied).await
            }
        }
    }
}

/// Record the inbox key and commit; a lost race on the key means another
/// scope already committed the same event, which is a no-op here.
async fn finish<U: OrderUnitOfWork>(
    mut uow: U,
    key: &str,
    outcome: ApplyOutcome,
) -> Result<ApplyOutcome, OrderError> {
    match uow.inbox_add(key).await {
        Ok(()) => {
            uow.commit().await?;
            Ok(outcome)
        }
        Err(e) if e.is_duplicate() => Ok(ApplyOutcome::AlreadyApplied),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use serde_json::Value as JsonValue;

    use postbox_events::ORDER_CREATED;

    use super::*;
    use crate::order::OrderStatus;

    #[derive(Debug, Default)]
    struct Db {
        orders: HashMap<String, Order>,
        outbox: Vec<(String, JsonValue)>,
        inbox: HashSet<String>,
    }

    #[derive(Clone, Default)]
    struct FakeFactory {
        db: Arc<Mutex<Db>>,
    }

    struct FakeUow {
        db: Arc<Mutex<Db>>,
        staged_orders: Vec<Order>,
        staged_outbox: Vec<(String, JsonValue)>,
        staged_inbox: Vec<String>,
    }

    #[async_trait]
    impl OrderUnitOfWorkFactory for FakeFactory {
        type Uow = FakeUow;

        async fn begin(&self) -> Result<FakeUow, StoreError> {
            Ok(FakeUow {
                db: self.db.clone(),
                staged_orders: Vec::new(),
                staged_outbox: Vec::new(),
                staged_inbox: Vec::new(),
            })
        }
    }

    #[async_trait]
    impl OrderUnitOfWork for FakeUow {
        async fn get_order(&mut self, order_id: &OrderId) -> Result<Option<Order>, StoreError> {
            if let Some(staged) = self
                .staged_orders
                .iter()
                .rev()
                .find(|o| o.order_id() == order_id)
            {
                return Ok(Some(staged.clone()));
            }
            Ok(self.db.lock().unwrap().orders.get(order_id.as_str()).cloned())
        }

        async fn upsert_order(&mut self, order: &Order) -> Result<(), StoreError> {
            self.staged_orders.push(order.clone());
            Ok(())
        }

        async fn outbox_put(
            &mut self,
            event_type: &str,
            payload: JsonValue,
        ) -> Result<(), StoreError> {
            self.staged_outbox.push((event_type.to_string(), payload));
            Ok(())
        }

        async fn inbox_exists(&mut self, event_key: &str) -> Result<bool, StoreError> {
            if self.staged_inbox.iter().any(|k| k == event_key) {
                return Ok(true);
            }
            Ok(self.db.lock().unwrap().inbox.contains(event_key))
        }

        async fn inbox_add(&mut self, event_key: &str) -> Result<(), StoreError> {
            if self.staged_inbox.iter().any(|k| k == event_key)
                || self.db.lock().unwrap().inbox.contains(event_key)
            {
                return Err(StoreError::duplicate(event_key));
            }
            self.staged_inbox.push(event_key.to_string());
            Ok(())
        }

        async fn commit(self) -> Result<(), StoreError> {
            let mut db = self.db.lock().unwrap();
            for order in self.staged_orders {
                db.orders.insert(order.order_id().to_string(), order);
            }
            db.outbox.extend(self.staged_outbox);
            for key in self.staged_inbox {
                db.inbox.insert(key);
            }
            Ok(())
        }
    }

    fn item(sku: &str, quantity: u32, price: f64) -> ItemLine {
        ItemLine {
            sku: sku.to_string(),
            quantity,
            price,
        }
    }

    fn create_command() -> CreateOrderCommand {
        CreateOrderCommand {
            order_id: "ord-1".to_string(),
            customer_id: "c-1".to_string(),
            items: vec![item("laptop", 1, 1200.0), item("mouse", 2, 25.0)],
        }
    }

    #[tokio::test]
    async fn create_persists_order_and_enqueues_exactly_one_event() {
        let factory = FakeFactory::default();
        let use_case = CreateOrderUseCase::new(factory.clone());

        let outcome = use_case.execute(create_command()).await.unwrap();
        assert!(outcome.is_created());
        assert_eq!(outcome.order().total_amount(), 1250.0);

        let db = factory.db.lock().unwrap();
        assert!(db.orders.contains_key("ord-1"));
        assert_eq!(db.outbox.len(), 1);
        let (event_type, payload) = &db.outbox[0];
        assert_eq!(event_type, ORDER_CREATED);
        assert_eq!(payload["version"], 0);
        assert_eq!(payload["amount"], 1250.0);
    }

    #[tokio::test]
    async fn create_is_idempotent_by_order_id() {
        let factory = FakeFactory::default();
        let use_case = CreateOrderUseCase::new(factory.clone());

        use_case.execute(create_command()).await.unwrap();
        let second = use_case.execute(create_command()).await.unwrap();

        assert!(!second.is_created());
        assert_eq!(factory.db.lock().unwrap().outbox.len(), 1);
    }

    #[tokio::test]
    async fn create_rejects_invalid_items() {
        let use_case = CreateOrderUseCase::new(FakeFactory::default());

        let mut cmd = create_command();
        cmd.items.clear();
        assert!(matches!(
            use_case.execute(cmd).await,
            Err(OrderError::Domain(DomainError::Validation(_)))
        ));

        let mut cmd = create_command();
        cmd.items[0].quantity = 0;
        assert!(use_case.execute(cmd).await.is_err());

        let mut cmd = create_command();
        cmd.items[0].price = -1.0;
        assert!(use_case.execute(cmd).await.is_err());
    }

    fn processed(version: u64) -> ApplyProcessedCommand {
        ApplyProcessedCommand {
            order_id: "ord-1".to_string(),
            status: ProcessedStatus::Success,
            fail_reason: None,
            version,
        }
    }

    async fn seeded_factory() -> FakeFactory {
        let factory = FakeFactory::default();
        CreateOrderUseCase::new(factory.clone())
            .execute(create_command())
            .await
            .unwrap();
        factory
    }

    #[tokio::test]
    async fn apply_moves_order_to_done_and_records_inbox_key() {
        let factory = seeded_factory().await;
        let use_case = ApplyProcessedUseCase::new(factory.clone());

        let outcome = use_case.execute(processed(1)).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied);

        let db = factory.db.lock().unwrap();
        let order = &db.orders["ord-1"];
        assert_eq!(order.status(), OrderStatus::Done);
        assert_eq!(order.version(), 1);
        assert!(db.inbox.contains("order.processed:ord-1:1"));
    }

    #[tokio::test]
    async fn replaying_the_same_event_is_a_no_op() {
        let factory = seeded_factory().await;
        let use_case = ApplyProcessedUseCase::new(factory.clone());

        use_case.execute(processed(1)).await.unwrap();
        for _ in 0..3 {
            let outcome = use_case.execute(processed(1)).await.unwrap();
            assert_eq!(outcome, ApplyOutcome::AlreadyApplied);
        }

        let db = factory.db.lock().unwrap();
        assert_eq!(db.orders["ord-1"].version(), 1);
        assert_eq!(db.inbox.len(), 1);
    }

    #[tokio::test]
    async fn stale_version_is_absorbed_and_inboxed() {
        let factory = seeded_factory().await;
        let use_case = ApplyProcessedUseCase::new(factory.clone());

        use_case.execute(processed(2)).await.unwrap();

        let mut stale = processed(1);
        stale.status = ProcessedStatus::Failed;
        stale.fail_reason = Some("late".to_string());
        let outcome = use_case.execute(stale).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Stale);

        let db = factory.db.lock().unwrap();
        assert_eq!(db.orders["ord-1"].status(), OrderStatus::Done);
        assert_eq!(db.orders["ord-1"].version(), 2);
        assert!(db.inbox.contains("order.processed:ord-1:1"));
    }

    #[tokio::test]
    async fn unknown_order_is_tolerated() {
        let factory = FakeFactory::default();
        let use_case = ApplyProcessedUseCase::new(factory.clone());

        let outcome = use_case.execute(processed(1)).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::UnknownOrder);

        let db = factory.db.lock().unwrap();
        assert!(db.orders.is_empty());
        assert!(db.inbox.contains("order.processed:ord-1:1"));
    }

    #[tokio::test]
    async fn failed_outcome_records_reason() {
        let factory = seeded_factory().await;
        let use_case = ApplyProcessedUseCase::new(factory.clone());

        let cmd = ApplyProcessedCommand {
            order_id: "ord-1".to_string(),
            status: ProcessedStatus::Failed,
            fail_reason: Some("embargo:teapot".to_string()),
            version: 1,
        };
        use_case.execute(cmd).await.unwrap();

        let db = factory.db.lock().unwrap();
        assert_eq!(db.orders["ord-1"].status(), OrderStatus::Failed);
        assert_eq!(db.orders["ord-1"].fail_reason(), Some("embargo:teapot"));
    }
}
