//! HTTP surface: health and metrics only; all order traffic arrives through
//! the broker.

use std::sync::Arc;

use axum::extract::Extension;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use postbox_observability::Metrics;

use crate::services::ProcessorServices;

#[derive(Clone)]
pub struct AppContext {
    pub services: Arc<ProcessorServices>,
    pub metrics: Arc<Metrics>,
    pub service_name: String,
}

pub fn build_router(context: AppContext) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(Extension(context))
}

async fn health(Extension(context): Extension<AppContext>) -> axum::response::Response {
    if context.services.healthy().await {
        (
            StatusCode::OK,
            Json(serde_json::json!({
                "service": context.service_name,
                "status": "ok",
            })),
        )
            .into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "service": context.service_name,
                "status": "unavailable",
            })),
        )
            .into_response()
    }
}

async fn metrics(Extension(context): Extension<AppContext>) -> axum::response::Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        context.metrics.render_prometheus(),
    )
        .into_response()
}
