use axum::extract::{Extension, Path};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;

use postbox_core::OrderId;

use crate::app::{dto, errors, AppContext};

pub async fn create_order(
    Extension(context): Extension<AppContext>,
    Json(body): Json<dto::CreateOrderRequest>,
) -> axum::response::Response {
    match context.services.create_order(body.into_command()).await {
        Ok(outcome) => {
            // Idempotent repeat returns the stored order with 200.
            let status = if outcome.is_created() {
                context.metrics.incr_orders_created();
                StatusCode::CREATED
            } else {
                StatusCode::OK
            };
            (status, Json(dto::order_to_response(outcome.order()))).into_response()
        }
        Err(e) => errors::order_error_to_response(e),
    }
}

pub async fn get_order(
    Extension(context): Extension<AppContext>,
    Path(order_id): Path<String>,
) -> axum::response::Response {
    let order_id = match OrderId::new(order_id) {
        Ok(id) => id,
        Err(e) => {
            return errors::json_error(StatusCode::UNPROCESSABLE_ENTITY, "validation_error", e.to_string())
        }
    };

    match context.services.get_order(&order_id).await {
        Ok(Some(order)) => (StatusCode::OK, Json(dto::order_to_response(&order))).into_response(),
        Ok(None) => errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("order {order_id} not found"),
        ),
        Err(e) => errors::order_error_to_response(e),
    }
}

pub async fn health(Extension(context): Extension<AppContext>) -> axum::response::Response {
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

pub async fn metrics(Extension(context): Extension<AppContext>) -> axum::response::Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        context.metrics.render_prometheus(),
    )
        .into_response()
}
