//! Counter metrics with Prometheus text exposition.
//!
//! One collector per process, shared by the publisher pump, the consumer
//! handlers, and the HTTP layer, and rendered by `GET /metrics`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// In-memory counter set for one service process.
#[derive(Debug, Default)]
pub struct Metrics {
    events_published: AtomicU64,
    events_failed: AtomicU64,
    events_moved_to_dlq: AtomicU64,
    orders_created: AtomicU64,
    orders_processed: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn incr_events_published(&self) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_events_failed(&self) {
        self.events_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_events_moved_to_dlq(&self) {
        self.events_moved_to_dlq.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_orders_created(&self) {
        self.orders_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_orders_processed(&self) {
        self.orders_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn events_published(&self) -> u64 {
        self.events_published.load(Ordering::Relaxed)
    }

    pub fn events_failed(&self) -> u64 {
        self.events_failed.load(Ordering::Relaxed)
    }

    pub fn events_moved_to_dlq(&self) -> u64 {
        self.events_moved_to_dlq.load(Ordering::Relaxed)
    }

    pub fn orders_created(&self) -> u64 {
        self.orders_created.load(Ordering::Relaxed)
    }

    pub fn orders_processed(&self) -> u64 {
        self.orders_processed.load(Ordering::Relaxed)
    }

    /// Render all counters in the Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let counters = [
            (
                "events_published_total",
                "Total number of events successfully published",
                self.events_published(),
            ),
            (
                "events_failed_total",
                "Total number of events that failed to publish",
                self.events_failed(),
            ),
            (
                "events_moved_to_dlq_total",
                "Total number of events moved to the dead letter queue",
                self.events_moved_to_dlq(),
            ),
            (
                "orders_created_total",
                "Total number of orders created",
                self.orders_created(),
            ),
            (
                "orders_processed_total",
                "Total number of orders processed",
                self.orders_processed(),
            ),
        ];

        let mut out = String::new();
        for (name, help, value) in counters {
            out.push_str(&format!("# HELP {name} {help}\n"));
            out.push_str(&format!("# TYPE {name} counter\n"));
            out.push_str(&format!("{name} {value}\n\n"));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_increment() {
        let metrics = Metrics::new();
        assert_eq!(metrics.events_published(), 0);

        metrics.incr_events_published();
        metrics.incr_events_published();
        metrics.incr_orders_created();

        assert_eq!(metrics.events_published(), 2);
        assert_eq!(metrics.orders_created(), 1);
        assert_eq!(metrics.orders_processed(), 0);
    }

    #[test]
    fn prometheus_rendering_includes_all_counters() {
        let metrics = Metrics::new();
        metrics.incr_events_moved_to_dlq();

        let text = metrics.render_prometheus();
        assert!(text.contains("# TYPE events_published_total counter"));
        assert!(text.contains("events_published_total 0"));
        assert!(text.contains("events_moved_to_dlq_total 1"));
        assert!(text.contains("orders_processed_total 0"));
    }
}
