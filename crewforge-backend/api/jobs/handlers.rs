use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::stream::Stream;
use hyper::StatusCode;
use serde_json::{Value, json};
use std::convert::Infallible;
use tokio::sync::broadcast;

use crate::api::AppState;
use crate::artifacts::{DEFAULT_EXTENSION, language_extensions};
use crate::jobs::error::JobError;
use crate::jobs::Job;
use crate::jobs::validation::decode_request;

const ESTIMATED_TIME: &str = "2-3 minutes";

impl IntoResponse for JobError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            JobError::Validation(violations) => (
                StatusCode::BAD_REQUEST,
                json!({
                    "success": false,
                    "error": "validation failed",
                    "details": violations,
                }),
            ),
            JobError::NotFound(_) => (
                StatusCode::NOT_FOUND,
                json!({ "success": false, "error": self.to_string() }),
            ),
            // Not a failure from the caller's side: the job is returned unchanged.
            JobError::AlreadyFinished { status, job, .. } => (
                StatusCode::OK,
                json!({
                    "success": false,
                    "alreadyFinished": true,
                    "status": status,
                    "job": job,
                }),
            ),
        };
        (status, Json(body)).into_response()
    }
}

/// Only a body that is not JSON at all is left to the extractor's rejection.
/// Field-level problems, wrong types included, come back as one validation error.
pub(crate) async fn submit_job(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), Response> {
    let Json(body) = payload.map_err(|rejection| {
        tracing::info!(error = %rejection.body_text(), "unreadable generation request");
        rejection.into_response()
    })?;

    let submitted = match decode_request(&body, state.runner.max_requirements_len()) {
        Ok(request) => state.runner.submit(request).await,
        Err(violations) => Err(JobError::Validation(violations)),
    };
    let job_id = submitted.map_err(|e| {
        tracing::info!(error = %e, "rejected generation request");
        e.into_response()
    })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "success": true,
            "jobId": job_id,
            "estimatedTime": ESTIMATED_TIME,
        })),
    ))
}

pub(crate) async fn list_jobs(State(state): State<AppState>) -> Json<Value> {
    let summaries: Vec<_> = state
        .runner
        .registry()
        .list()
        .await
        .iter()
        .map(Job::summary)
        .collect();

    Json(json!({ "jobs": summaries }))
}

pub(crate) async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Job>, JobError> {
    Ok(Json(state.runner.get_status(&id).await?))
}

pub(crate) async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, JobError> {
    let job = state.runner.cancel(&id).await?;
    Ok(Json(json!({ "success": true, "job": job })))
}

/// SSE feed for one job: a `snapshot` event first, then every event for the
/// job until its terminal one.
pub(crate) async fn stream_job_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, JobError> {
    // Subscribe before taking the snapshot so nothing falls in between.
    let mut rx = state.runner.subscribe();
    let snapshot = state.runner.get_status(&id).await?;

    let stream = async_stream::stream! {
        let finished = snapshot.status.is_terminal();
        let data = serde_json::to_string(&snapshot).unwrap_or_default();
        yield Ok(Event::default().event("snapshot").data(data));
        if finished {
            return;
        }

        loop {
            match rx.recv().await {
                Ok(event) if event.job_id == id => {
                    let terminal = event.event_type.is_terminal();
                    let data = serde_json::to_string(&event).unwrap_or_default();
                    yield Ok(Event::default().event(event.event_type.as_event_name()).data(data));
                    if terminal {
                        break;
                    }
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(job_id = %id, skipped = n, "job SSE subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(std::time::Duration::from_secs(15))))
}

pub(crate) async fn list_languages() -> Json<Value> {
    let languages: Vec<Value> = language_extensions()
        .iter()
        .map(|(language, extension)| json!({ "language": language, "extension": extension }))
        .collect();

    Json(json!({
        "languages": languages,
        "defaultExtension": DEFAULT_EXTENSION,
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::Semaphore;

    use crate::agents::llm::testing::ScriptedLlm;
    use crate::api::test_support::{get, json_body, post_json, send, state};
    use crate::jobs::JobStatus;

    use super::*;

    fn valid_body() -> Value {
        json!({
            "requirements": "Build a todo app",
            "framework": "react",
            "language": "python",
        })
    }

    async fn wait_terminal(state: &AppState, id: &str) {
        let handle = state.runner.registry().get(id).await.unwrap();
        let mut rx = handle.subscribe();
        rx.wait_for(|job| job.status.is_terminal()).await.unwrap();
    }

    async fn body_text(resp: Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), 1_000_000)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_submit_returns_job_id() {
        let app = state(None);
        let resp = send(&app, post_json("/api/generate", valid_body())).await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let body = json_body(resp).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["estimatedTime"], "2-3 minutes");
        let id = body["jobId"].as_str().unwrap();
        assert!(app.runner.registry().get(id).await.is_some());
    }

    #[tokio::test]
    async fn test_submit_reports_every_violation() {
        let app = state(None);
        let resp = send(&app, post_json("/api/generate", json!({ "requirements": "  " }))).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body = json_body(resp).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "validation failed");
        let fields: Vec<&str> = body["details"]
            .as_array()
            .unwrap()
            .iter()
            .map(|d| d["field"].as_str().unwrap())
            .collect();
        assert_eq!(fields, ["requirements", "framework", "language"]);
        assert_eq!(app.runner.registry().len().await, 0);
    }

    #[tokio::test]
    async fn test_submit_null_field_is_a_validation_error() {
        let app = state(None);
        let body = json!({ "requirements": null, "framework": "", "language": "" });
        let resp = send(&app, post_json("/api/generate", body)).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body = json_body(resp).await;
        assert_eq!(body["error"], "validation failed");
        let details = body["details"].as_array().unwrap();
        assert_eq!(details.len(), 3);
        assert_eq!(details[0]["message"], "requirements is required");
        assert_eq!(app.runner.registry().len().await, 0);
    }

    #[tokio::test]
    async fn test_submit_wrong_type_listed_with_other_violations() {
        let app = state(None);
        let body = json!({ "requirements": 5, "framework": "react", "language": "" });
        let resp = send(&app, post_json("/api/generate", body)).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body = json_body(resp).await;
        let messages: Vec<&str> = body["details"]
            .as_array()
            .unwrap()
            .iter()
            .map(|d| d["message"].as_str().unwrap())
            .collect();
        assert_eq!(messages, ["requirements must be a string", "language is required"]);
    }

    #[tokio::test]
    async fn test_submit_body_that_is_not_json_is_rejected() {
        let app = state(None);
        let req = axum::http::Request::builder()
            .method("POST")
            .uri("/api/generate")
            .header("content-type", "application/json")
            .body(axum::body::Body::from("{not json"))
            .unwrap();
        let resp = send(&app, req).await;
        assert!(resp.status().is_client_error());
        assert_eq!(app.runner.registry().len().await, 0);
    }

    #[tokio::test]
    async fn test_get_job_snapshot() {
        let app = state(None);
        let id = app.runner.submit(serde_json::from_value(valid_body()).unwrap()).await.unwrap();
        wait_terminal(&app, &id).await;

        let resp = send(&app, get(&format!("/api/jobs/{id}"))).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["id"], id.as_str());
        assert_eq!(body["status"], "completed");
        assert_eq!(body["overallProgress"], 100);
        assert_eq!(body["stages"].as_array().unwrap().len(), 4);
        assert!(body["artifacts"]["main.py"].is_string());
    }

    #[tokio::test]
    async fn test_unknown_job_is_404() {
        let app = state(None);
        let resp = send(&app, get("/api/jobs/does-not-exist")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body = json_body(resp).await;
        assert_eq!(body["error"], "job not found: does-not-exist");

        let resp = send(&app, post_json("/api/jobs/does-not-exist/cancel", json!({}))).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cancel_running_job() {
        let gate = Arc::new(Semaphore::new(0));
        let app = state(Some(Arc::new(ScriptedLlm::gated(gate.clone()))));
        let id = app.runner.submit(serde_json::from_value(valid_body()).unwrap()).await.unwrap();

        let resp = send(&app, post_json(&format!("/api/jobs/{id}/cancel"), json!({}))).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["job"]["status"], "cancelled");
        assert_eq!(body["job"]["error"], "cancelled by user");
        gate.add_permits(4);
    }

    #[tokio::test]
    async fn test_cancel_finished_job_reports_already_finished() {
        let app = state(None);
        let id = app.runner.submit(serde_json::from_value(valid_body()).unwrap()).await.unwrap();
        wait_terminal(&app, &id).await;

        let resp = send(&app, post_json(&format!("/api/jobs/{id}/cancel"), json!({}))).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["alreadyFinished"], true);
        assert_eq!(body["status"], "completed");
        assert_eq!(body["job"]["status"], "completed");
        assert_eq!(
            app.runner.get_status(&id).await.unwrap().status,
            JobStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_already_finished_error_renders_job_unchanged() {
        let mut job = Job::new(
            "j1".into(),
            serde_json::from_value(valid_body()).unwrap(),
        );
        job.status = JobStatus::Failed;
        let err = JobError::AlreadyFinished {
            id: "j1".into(),
            status: JobStatus::Failed,
            job: Box::new(job),
        };

        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["alreadyFinished"], true);
        assert_eq!(body["status"], "failed");
        assert_eq!(body["job"]["id"], "j1");
    }

    #[tokio::test]
    async fn test_list_jobs_returns_summaries() {
        let app = state(None);
        let id = app.runner.submit(serde_json::from_value(valid_body()).unwrap()).await.unwrap();
        wait_terminal(&app, &id).await;

        let body = json_body(send(&app, get("/api/jobs")).await).await;
        let jobs = body["jobs"].as_array().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0]["id"], id.as_str());
        assert_eq!(jobs[0]["language"], "python");
        assert!(jobs[0].get("stages").is_none());
    }

    #[tokio::test]
    async fn test_languages_table() {
        let body = json_body(send(&state(None), get("/api/languages")).await).await;
        let languages = body["languages"].as_array().unwrap();
        assert!(
            languages
                .iter()
                .any(|l| l["language"] == "python" && l["extension"] == "py")
        );
        assert_eq!(body["defaultExtension"], "txt");
    }

    #[tokio::test]
    async fn test_events_stream_for_finished_job_is_snapshot_only() {
        let app = state(None);
        let id = app.runner.submit(serde_json::from_value(valid_body()).unwrap()).await.unwrap();
        wait_terminal(&app, &id).await;

        let resp = send(&app, get(&format!("/api/jobs/{id}/events"))).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let text = body_text(resp).await;
        assert!(text.starts_with("event: snapshot\n"), "{text}");
        assert!(!text.contains("event: job.completed"));
    }

    #[tokio::test]
    async fn test_events_stream_follows_job_to_completion() {
        let gate = Arc::new(Semaphore::new(0));
        let app = state(Some(Arc::new(ScriptedLlm::gated(gate.clone()))));
        let id = app.runner.submit(serde_json::from_value(valid_body()).unwrap()).await.unwrap();

        let resp = send(&app, get(&format!("/api/jobs/{id}/events"))).await;
        assert_eq!(resp.status(), StatusCode::OK);
        gate.add_permits(4);

        let text = body_text(resp).await;
        assert!(text.starts_with("event: snapshot\n"));
        assert_eq!(text.matches("event: stage.completed").count(), 4);
        assert!(text.contains("event: job.completed"));
    }

    #[tokio::test]
    async fn test_events_stream_unknown_job() {
        let resp = send(&state(None), get("/api/jobs/nope/events")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
