//! Processor use case: handle-order-created.

use thiserror::Error;

use postbox_core::{DomainError, OrderId, StoreError};
use postbox_events::{event_key, ItemLine, OrderProcessed, ORDER_CREATED};

use crate::policy::{PolicyDecision, ProcessingPolicy};
use crate::ports::{ProcessorUnitOfWork, ProcessorUnitOfWorkFactory};
use crate::processing::ProcessingState;

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct HandleOrderCreatedCommand {
    pub order_id: String,
    pub customer_id: String,
    pub items: Vec<ItemLine>,
    pub amount: f64,
    pub version: u64,
}

/// What a committed handle-order-created scope did.
#[derive(Debug, Clone, PartialEq)]
pub enum HandleOutcome {
    /// A decision was made and `order.processed` was enqueued.
    Handled(PolicyDecision),
    /// The inbox already held the key (or a concurrent scope won the insert).
    AlreadyHandled,
    /// The state had already emitted an equal-or-newer result version; the
    /// inbox key is recorded without a new emission.
    Stale,
}

/// Evaluate an `order.created` event and emit the processing result,
/// effectively once per `(order_id, version)`.
pub struct HandleOrderCreatedUseCase<F, P> {
    factory: F,
    policy: P,
}

impl<F, P> HandleOrderCreatedUseCase<F, P>
where
    F: ProcessorUnitOfWorkFactory,
    P: ProcessingPolicy,
{
    pub fn new(factory: F, policy: P) -> Self {
        Self { factory, policy }
    }

    pub async fn execute(
        &self,
        cmd: HandleOrderCreatedCommand,
    ) -> Result<HandleOutcome, ProcessorError> {
        let key = event_key(ORDER_CREATED, &cmd.order_id, cmd.version);
        let order_id = OrderId::new(cmd.order_id)?;

        let mut uow = self.factory.begin().await?;

        if uow.inbox_exists(&key).await? {
            uow.commit().await?;
            return Ok(HandleOutcome::AlreadyHandled);
        }

        let mut state = uow
            .get_state(&order_id)
            .await?
            .unwrap_or_else(|| ProcessingState::new(order_id.clone()));

        // The result carries the next version on the order's timeline.
        let result_version = cmd.version + 1;
        if state.is_stale(result_version) {
            return finish(uow, &key, HandleOutcome::Stale).await;
        }

        let decision = self.policy.evaluate(&order_id, &cmd.items);
        state.apply_decision(&decision, result_version);

        let event = OrderProcessed {
            order_id: order_id.to_string(),
            status: decision.status,
            fail_reason: decision.reason.clone(),
            version: result_version,
        };

        uow.upsert_state(&state).await?;
        uow.outbox_put(
            event.routing_key(),
            serde_json::to_value(&event)
                .map_err(|e| StoreError::backend(format!("encode order.processed: {e}")))?,
        )
        .await?;

        finish(uow, &key, HandleOutcome::Handled(decision)).await
    }
}

/// Record the inbox key and commit; losing the key race means another scope
/// already committed this event.
async fn finish<U: ProcessorUnitOfWork>(
    mut uow: U,
    key: &str,
    outcome: HandleOutcome,
) -> Result<HandleOutcome, ProcessorError> {
    match uow.inbox_add(key).await {
        Ok(()) => {
            uow.commit().await?;
            Ok(outcome)
        }
        Err(e) if e.is_duplicate() => Ok(HandleOutcome::AlreadyHandled),
        Err(e) => Err(e.into()),
    }
}
