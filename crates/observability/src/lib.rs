//! Tracing, logging, metrics (shared setup).

pub mod metrics;
pub mod tracing;

pub use metrics::Metrics;

/// Initialize process-wide observability (tracing/logging) for a service.
pub fn init(default_service_name: &str) {
    tracing::init(default_service_name);
}
