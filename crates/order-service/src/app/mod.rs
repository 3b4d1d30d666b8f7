//! HTTP application wiring (Axum router).
//!
//! - `routes.rs`: handlers, one per endpoint
//! - `dto.rs`: request/response bodies and JSON mapping
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::routing::{get, post};
use axum::{Extension, Router};

use postbox_observability::Metrics;

use crate::services::OrderServices;

pub mod dto;
pub mod errors;
pub mod routes;

/// Request-scoped context shared by all handlers.
#[derive(Clone)]
pub struct AppContext {
    pub services: Arc<OrderServices>,
    pub metrics: Arc<Metrics>,
    pub service_name: String,
}

/// Build the full HTTP router (used by `main.rs` and the black-box tests).
pub fn build_router(context: AppContext) -> Router {
    Router::new()
        .route("/orders", post(routes::create_order))
        .route("/orders/:order_id", get(routes::get_order))
        .route("/health", get(routes::health))
        .route("/metrics", get(routes::metrics))
        .layer(Extension(context))
}
