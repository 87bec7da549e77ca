use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use hyper::StatusCode;
use hyper::header;
use serde_json::{Value, json};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;

use super::AppState;
use super::middleware;
use super::socket;

pub fn build_router(state: AppState) -> Router {
    let health_routes = Router::new().route("/", get(health));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(vec![header::CONTENT_TYPE, header::AUTHORIZATION]);

    let router = Router::new()
        .nest("/health", health_routes)
        .route("/ws", get(socket::job_events_ws))
        .nest("/api", api_router());

    let router = match state.static_dir.as_deref().filter(|dir| dir.is_dir()) {
        Some(dir) => {
            tracing::info!(dir = %dir.display(), "serving UI bundle");
            router.fallback_service(ServeDir::new(dir))
        }
        None => router.fallback(not_found),
    };

    router
        .with_state(state)
        .layer(cors)
        .layer(axum::middleware::from_fn(middleware::strip_trailing_slash))
        .layer(axum::middleware::from_fn(
            middleware::enrich_current_span_middleware,
        ))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let registry = state.runner.registry();
    Json(json!({
        "status": "ok",
        "mode": if state.runner.is_live() { "live" } else { "fallback" },
        "jobs": registry.len().await,
        "retentionSecs": registry.retention().as_secs(),
    }))
}

fn api_router() -> Router<AppState> {
    Router::new().merge(super::jobs::router())
}

async fn not_found(req: axum::extract::Request) -> impl IntoResponse {
    tracing::warn!("unhandled path: {}", req.uri());
    (StatusCode::NOT_FOUND, "Not Found")
}
