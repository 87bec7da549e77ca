use axum::{
    body::Body,
    http::{Request, StatusCode, Uri},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use tracing::Span;

pub async fn enrich_current_span_middleware(req: Request<Body>, next: Next) -> Response {
    let uri: &Uri = req.uri();

    let host = req
        .headers()
        .get("host")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("UNKNOWN");

    let current_span = Span::current();

    current_span.record("http.method", req.method().as_str());
    current_span.record("http.uri", uri.path());
    current_span.record("http.host", host);
    if let Some(query) = uri.query() {
        current_span.record("http.query", query);
    }

    next.run(req).await
}

/// Redirect `/path/` to `/path`, keeping the query string. The root path is left alone.
pub async fn strip_trailing_slash(req: Request<Body>, next: Next) -> Response {
    let uri = req.uri();

    let Some(path) = uri.path().strip_suffix('/').filter(|p| !p.is_empty()) else {
        return next.run(req).await;
    };

    let target = match uri.query() {
        Some(query) => format!("{path}?{query}"),
        None => path.to_string(),
    };

    match target.parse::<Uri>() {
        Ok(new_uri) => Redirect::permanent(&new_uri.to_string()).into_response(),
        Err(e) => {
            tracing::warn!(uri = %uri, error = %e, "could not rewrite trailing slash");
            StatusCode::BAD_REQUEST.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::Router;
    use axum::routing::get;
    use tower::ServiceExt;

    use super::*;

    fn app() -> Router {
        Router::new()
            .route("/", get(|| async { "root" }))
            .route("/api/jobs", get(|| async { "jobs" }))
            .fallback(|| async { StatusCode::NOT_FOUND })
            .layer(axum::middleware::from_fn(strip_trailing_slash))
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_trailing_slash_redirects_with_query() {
        let resp = app().oneshot(get_req("/api/jobs/?limit=5")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::PERMANENT_REDIRECT);
        assert_eq!(resp.headers()["location"], "/api/jobs?limit=5");
    }

    #[tokio::test]
    async fn test_root_is_not_redirected() {
        let resp = app().oneshot(get_req("/")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_plain_path_passes_through() {
        let resp = app().oneshot(get_req("/api/jobs")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
