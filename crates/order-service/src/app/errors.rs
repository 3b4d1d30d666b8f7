use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use postbox_core::DomainError;
use postbox_order::OrderError;

/// The HTTP layer is the single place errors map to status codes.
pub fn order_error_to_response(err: OrderError) -> axum::response::Response {
    match err {
        OrderError::Domain(DomainError::Validation(msg)) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "validation_error", msg)
        }
        OrderError::Domain(DomainError::InvalidId(msg)) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "validation_error", msg)
        }
        OrderError::Domain(DomainError::NotFound) => {
            json_error(StatusCode::NOT_FOUND, "not_found", "not found")
        }
        OrderError::Domain(DomainError::Conflict(msg)) => {
            json_error(StatusCode::CONFLICT, "conflict", msg)
        }
        OrderError::Store(e) => {
            tracing::error!(error = %e, "storage error");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "storage_error",
                "internal server error",
            )
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
