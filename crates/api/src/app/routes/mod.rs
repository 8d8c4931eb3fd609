use axum::Router;

pub mod jobs;
pub mod system;

/// Router for every endpoint that needs `AppServices`.
pub fn router() -> Router {
    Router::new().merge(jobs::router())
}
