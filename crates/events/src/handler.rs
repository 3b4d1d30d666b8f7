//! Consumer-side event handling contract.
//!
//! The consumer pipeline is generic over this trait; each service registers
//! one handler per routing key. Handlers must be idempotent (at-least-once
//! delivery) and decide only *whether* handling failed; the pipeline alone
//! decides ack vs requeue vs dead-letter.

use std::sync::Arc;

use async_trait::async_trait;

use crate::broker::Message;

/// How handling one message failed.
#[derive(Debug, thiserror::Error)]
pub enum HandleError {
    /// The message cannot be understood (poison). The pipeline rejects it
    /// without requeue so the broker dead-letters it.
    #[error("malformed event: {0}")]
    Malformed(String),

    /// A transient failure; the unit of work rolled back and redelivery
    /// should retry.
    #[error("event handling failed: {0}")]
    Failed(String),
}

impl HandleError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// Applies one delivered message.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, message: &Message) -> Result<(), HandleError>;
}

#[async_trait]
impl<H> EventHandler for Arc<H>
where
    H: EventHandler + ?Sized,
{
    async fn handle(&self, message: &Message) -> Result<(), HandleError> {
        (**self).handle(message).await
    }
}
