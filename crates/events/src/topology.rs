//! Broker topology: exchanges, queues, and dead-letter bindings.
//!
//! The topology is declared by each service at startup and is idempotent on
//! the broker side. Queue arguments carry the dead-letter exchange binding so
//! rejected messages route to their DLQ without consumer involvement.

use std::time::Duration;

use crate::envelope::{ORDER_CREATED, ORDER_PROCESSED};

/// Topic exchange carrying all order conversation events.
pub const EVENTS_EXCHANGE: &str = "orders.events";

/// Dead-letter exchange; rejected and exhausted messages land here.
pub const DLX_EXCHANGE: &str = "orders.events.dlx";

pub const ORDER_CREATED_QUEUE: &str = "order.created.q";
pub const ORDER_PROCESSED_QUEUE: &str = "order.processed.q";
pub const ORDER_CREATED_DLQ: &str = "order.created.dlq";
pub const ORDER_PROCESSED_DLQ: &str = "order.processed.dlq";

/// Dead-letter routing key for an event type (`<event_type>.dlq`).
pub fn dlq_routing_key(event_type: &str) -> String {
    format!("{event_type}.dlq")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    Topic,
}

#[derive(Debug, Clone)]
pub struct ExchangeSpec {
    pub name: String,
    pub kind: ExchangeKind,
    pub durable: bool,
}

/// Where a queue's rejected messages go.
#[derive(Debug, Clone)]
pub struct DeadLetterSpec {
    pub exchange: String,
    pub routing_key: String,
}

#[derive(Debug, Clone)]
pub struct QueueSpec {
    pub name: String,
    pub durable: bool,
    /// Exchange and routing key this queue is bound with.
    pub exchange: String,
    pub routing_key: String,
    pub dead_letter: Option<DeadLetterSpec>,
    pub message_ttl: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct Topology {
    pub exchanges: Vec<ExchangeSpec>,
    pub queues: Vec<QueueSpec>,
}

impl Topology {
    /// The order conversation topology both services declare.
    pub fn orders() -> Self {
        let exchanges = vec![
            ExchangeSpec {
                name: EVENTS_EXCHANGE.to_string(),
                kind: ExchangeKind::Topic,
                durable: true,
            },
            ExchangeSpec {
                name: DLX_EXCHANGE.to_string(),
                kind: ExchangeKind::Topic,
                durable: true,
            },
        ];

        let queues = vec![
            work_queue(ORDER_CREATED_QUEUE, ORDER_CREATED),
            work_queue(ORDER_PROCESSED_QUEUE, ORDER_PROCESSED),
            dlq_queue(ORDER_CREATED_DLQ, ORDER_CREATED),
            dlq_queue(ORDER_PROCESSED_DLQ, ORDER_PROCESSED),
        ];

        Self { exchanges, queues }
    }
}

fn work_queue(name: &str, routing_key: &str) -> QueueSpec {
    QueueSpec {
        name: name.to_string(),
        durable: true,
        exchange: EVENTS_EXCHANGE.to_string(),
        routing_key: routing_key.to_string(),
        dead_letter: Some(DeadLetterSpec {
            exchange: DLX_EXCHANGE.to_string(),
            routing_key: dlq_routing_key(routing_key),
        }),
        message_ttl: None,
    }
}

fn dlq_queue(name: &str, routing_key: &str) -> QueueSpec {
    QueueSpec {
        name: name.to_string(),
        durable: true,
        exchange: DLX_EXCHANGE.to_string(),
        routing_key: dlq_routing_key(routing_key),
        dead_letter: None,
        message_ttl: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_topology_declares_both_exchanges_and_all_queues() {
        let topology = Topology::orders();

        let exchange_names: Vec<_> = topology.exchanges.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(exchange_names, vec![EVENTS_EXCHANGE, DLX_EXCHANGE]);
        assert!(topology.exchanges.iter().all(|e| e.durable));

        let queue_names: Vec<_> = topology.queues.iter().map(|q| q.name.as_str()).collect();
        assert_eq!(
            queue_names,
            vec![
                ORDER_CREATED_QUEUE,
                ORDER_PROCESSED_QUEUE,
                ORDER_CREATED_DLQ,
                ORDER_PROCESSED_DLQ
            ]
        );
    }

    #[test]
    fn work_queues_dead_letter_into_the_dlx() {
        let topology = Topology::orders();
        let created = topology
            .queues
            .iter()
            .find(|q| q.name == ORDER_CREATED_QUEUE)
            .unwrap();

        let dl = created.dead_letter.as_ref().unwrap();
        assert_eq!(dl.exchange, DLX_EXCHANGE);
        assert_eq!(dl.routing_key, "order.created.dlq");
    }
}
