use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use affwriter_infra::jobs::NewJob;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

/// Most rows `GET /api/jobs` returns.
pub const LIST_LIMIT: usize = 200;

pub fn router() -> Router {
    Router::new()
        .route("/api/jobs", get(list_jobs))
        .route("/api/jobs/start", post(start_job))
}

pub async fn start_job(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::StartJobRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return errors::json_error(
                StatusCode::UNPROCESSABLE_ENTITY,
                "validation_error",
                rejection.body_text(),
            );
        }
    };

    let job = match NewJob::from_request(body.job_type, body.model, body.options) {
        Ok(job) => job,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match services.jobs().insert(&job).await {
        Ok(id) => {
            tracing::info!(job_id = %id, job_type = job.job_type(), "job queued");
            (
                StatusCode::CREATED,
                Json(dto::StartJobResponse { ok: true, id }),
            )
                .into_response()
        }
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn list_jobs(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.jobs().list_recent(LIST_LIMIT).await {
        Ok(data) => Json(dto::JobListResponse { data }).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}
