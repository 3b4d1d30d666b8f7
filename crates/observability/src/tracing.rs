//! Tracing/logging initialization.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize structured JSON logging for one service process.
///
/// The effective service name is `SERVICE_NAME` when set, otherwise
/// `default_service_name`; it is stamped on the startup record so log
/// pipelines can attribute the stream even before the service emits its own
/// `service`-tagged records. Filtering comes from `RUST_LOG` (default
/// `info`). Safe to call multiple times; subsequent calls are no-ops.
pub fn init(default_service_name: &str) {
    let service_name = std::env::var("SERVICE_NAME")
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default_service_name.to_string());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json_layer = fmt::layer()
        .json()
        .flatten_event(true)
        .with_target(false)
        .with_current_span(false);

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(service = %service_name, "structured logging initialized");
    }
}
