use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use affwriter_core::DomainError;
use affwriter_infra::jobs::JobStoreError;

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    match err {
        DomainError::Validation(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "validation_error", msg)
        }
    }
}

pub fn store_error_to_response(err: JobStoreError) -> axum::response::Response {
    match err {
        JobStoreError::NotFound(id) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("job {id} not found"))
        }
        JobStoreError::InvalidTransition { .. } => {
            json_error(StatusCode::CONFLICT, "conflict", err.to_string())
        }
        JobStoreError::UnknownStatus { .. } | JobStoreError::Storage(_) => {
            tracing::error!(error = %err, "job store failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", err.to_string())
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
