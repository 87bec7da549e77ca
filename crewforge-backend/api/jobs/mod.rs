pub mod handlers;

use axum::Router;
use axum::routing::{get, post};

use crate::api::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/generate", post(handlers::submit_job))
        .route("/jobs", get(handlers::list_jobs))
        .route("/jobs/{id}", get(handlers::get_job))
        .route("/jobs/{id}/cancel", post(handlers::cancel_job))
        .route("/jobs/{id}/events", get(handlers::stream_job_events))
        .route("/languages", get(handlers::list_languages))
}
