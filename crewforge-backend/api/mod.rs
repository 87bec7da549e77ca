pub mod jobs;
pub mod middleware;
mod routes;
pub mod socket;

use axum::Router;
use std::path::PathBuf;
use std::sync::Arc;

use crate::jobs::runner::JobRunner;

#[derive(Clone)]
pub struct AppState {
    pub runner: Arc<JobRunner>,
    /// Built UI bundle served as the router fallback, when present.
    pub static_dir: Option<PathBuf>,
}

pub fn create_app(state: AppState) -> Router {
    routes::build_router(state)
}
