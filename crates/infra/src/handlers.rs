//! Event handlers wiring decoded deliveries into the use cases.
//!
//! The order service registers [`OrderProcessedHandler`] on
//! `order.processed.q`; the processor registers [`OrderCreatedHandler`] on
//! `order.created.q`. New event types are added by registering additional
//! handlers and queue bindings.

use std::sync::Arc;

use async_trait::async_trait;

use postbox_events::{
    EventHandler, HandleError, Message, OrderCreated, OrderProcessed,
};
use postbox_observability::Metrics;
use postbox_order::{
    ApplyOutcome, ApplyProcessedCommand, ApplyProcessedUseCase, OrderError,
    OrderUnitOfWorkFactory,
};
use postbox_processor::{
    HandleOrderCreatedCommand, HandleOrderCreatedUseCase, HandleOutcome, ProcessingPolicy,
    ProcessorError, ProcessorUnitOfWorkFactory,
};

/// Applies `order.processed` events to orders (order service side).
pub struct OrderProcessedHandler<F> {
    use_case: ApplyProcessedUseCase<F>,
    metrics: Arc<Metrics>,
}

impl<F> OrderProcessedHandler<F>
where
    F: OrderUnitOfWorkFactory,
{
    pub fn new(factory: F, metrics: Arc<Metrics>) -> Self {
        Self {
            use_case: ApplyProcessedUseCase::new(factory),
            metrics,
        }
    }
}

#[async_trait]
impl<F> EventHandler for OrderProcessedHandler<F>
where
    F: OrderUnitOfWorkFactory,
{
    async fn handle(&self, message: &Message) -> Result<(), HandleError> {
        let event: OrderProcessed = serde_json::from_slice(&message.body)
            .map_err(|e| HandleError::malformed(format!("order.processed decode: {e}")))?;

        let cmd = ApplyProcessedCommand {
            order_id: event.order_id,
            status: event.status,
            fail_reason: event.fail_reason,
            version: event.version,
        };

        match self.use_case.execute(cmd).await {
            Ok(ApplyOutcome::Applied) => {
                self.metrics.incr_orders_processed();
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(OrderError::Domain(e)) => Err(HandleError::malformed(e.to_string())),
            Err(OrderError::Store(e)) => Err(HandleError::failed(e.to_string())),
        }
    }
}

/// Handles `order.created` events (processor side).
pub struct OrderCreatedHandler<F, P> {
    use_case: HandleOrderCreatedUseCase<F, P>,
    metrics: Arc<Metrics>,
}

impl<F, P> OrderCreatedHandler<F, P>
where
    F: ProcessorUnitOfWorkFactory,
    P: ProcessingPolicy,
{
    pub fn new(factory: F, policy: P, metrics: Arc<Metrics>) -> Self {
        Self {
            use_case: HandleOrderCreatedUseCase::new(factory, policy),
            metrics,
        }
    }
}

#[async_trait]
impl<F, P> EventHandler for OrderCreatedHandler<F, P>
where
    F: ProcessorUnitOfWorkFactory,
    P: ProcessingPolicy,
{
    async fn handle(&self, message: &Message) -> Result<(), HandleError> {
        let event: OrderCreated = serde_json::from_slice(&message.body)
            .map_err(|e| HandleError::malformed(format!("order.created decode: {e}")))?;

        let cmd = HandleOrderCreatedCommand {
            order_id: event.order_id,
            customer_id: event.customer_id,
            items: event.items,
            amount: event.amount,
            version: event.version,
        };

        match self.use_case.execute(cmd).await {
            Ok(HandleOutcome::Handled(_)) => {
                self.metrics.incr_orders_processed();
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(ProcessorError::Domain(e)) => Err(HandleError::malformed(e.to_string())),
            Err(ProcessorError::Store(e)) => Err(HandleError::failed(e.to_string())),
        }
    }
}
