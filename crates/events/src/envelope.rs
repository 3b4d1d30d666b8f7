//! Wire event payloads and deduplication keys.
//!
//! Both services speak exactly two event types: `order.created` flows from
//! the order service to the processor, `order.processed` flows back. The
//! payloads here are the **wire schema** (JSON UTF-8); domain aggregates map
//! into and out of them at the service boundary.

use serde::{Deserialize, Serialize};

/// Routing key for order-created events.
pub const ORDER_CREATED: &str = "order.created";

/// Routing key for order-processed events.
pub const ORDER_PROCESSED: &str = "order.processed";

/// One order line as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemLine {
    pub sku: String,
    pub quantity: u32,
    pub price: f64,
}

impl ItemLine {
    pub fn total(&self) -> f64 {
        f64::from(self.quantity) * self.price
    }
}

/// Outcome reported by the processor for one order version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessedStatus {
    Success,
    Failed,
}

/// `order.created` payload: emitted by the order service when an order is
/// first persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCreated {
    pub order_id: String,
    pub customer_id: String,
    pub items: Vec<ItemLine>,
    pub amount: f64,
    pub version: u64,
}

impl OrderCreated {
    pub fn routing_key(&self) -> &'static str {
        ORDER_CREATED
    }

    /// Deduplication key for this event.
    pub fn event_key(&self) -> String {
        event_key(ORDER_CREATED, &self.order_id, self.version)
    }
}

/// `order.processed` payload: emitted by the processor with the outcome for
/// one order version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderProcessed {
    pub order_id: String,
    pub status: ProcessedStatus,
    pub fail_reason: Option<String>,
    pub version: u64,
}

impl OrderProcessed {
    pub fn routing_key(&self) -> &'static str {
        ORDER_PROCESSED
    }

    pub fn event_key(&self) -> String {
        event_key(ORDER_PROCESSED, &self.order_id, self.version)
    }
}

/// Stable deduplication key: `"<event_type>:<order_id>:<version>"`.
///
/// Presence of this key in a service's inbox means the effects of the event
/// are durably committed there.
pub fn event_key(event_type: &str, order_id: &str, version: u64) -> String {
    format!("{event_type}:{order_id}:{version}")
}
