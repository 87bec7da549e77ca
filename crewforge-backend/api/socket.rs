use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::api::AppState;
use crate::jobs::events::JobEvent;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SocketQuery {
    /// Only forward events for this job.
    job_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientMessage {
    Ping,
    Ignored,
}

/// Heartbeats come either as the bare text `ping` or as `{"type":"ping"}`.
/// Anything else is ignored; clients cannot affect job state over the socket.
pub fn parse_client_message(text: &str) -> ClientMessage {
    let text = text.trim();
    if text.eq_ignore_ascii_case("ping") {
        return ClientMessage::Ping;
    }
    match serde_json::from_str::<Value>(text) {
        Ok(value) if value.get("type").and_then(Value::as_str) == Some("ping") => {
            ClientMessage::Ping
        }
        _ => ClientMessage::Ignored,
    }
}

pub fn connected_message(client_id: &str) -> Value {
    json!({ "type": "connected", "clientId": client_id })
}

pub fn pong_message(now: DateTime<Utc>) -> Value {
    json!({ "type": "pong", "timestamp": now })
}

fn wanted(event: &JobEvent, filter: Option<&str>) -> bool {
    filter.is_none_or(|job_id| event.job_id == job_id)
}

/// GET /ws — live job events for the UI.
pub(crate) async fn job_events_ws(
    State(state): State<AppState>,
    Query(query): Query<SocketQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let events_rx = state.runner.subscribe();
    ws.on_upgrade(move |socket| handle_socket(socket, events_rx, query.job_id))
}

async fn handle_socket(
    socket: WebSocket,
    mut events_rx: broadcast::Receiver<JobEvent>,
    job_filter: Option<String>,
) {
    use futures::{SinkExt, StreamExt};

    let client_id = Uuid::new_v4().to_string();
    let (mut ws_sink, mut ws_stream) = socket.split();

    let hello = connected_message(&client_id).to_string();
    if ws_sink.send(Message::Text(hello.into())).await.is_err() {
        return;
    }
    tracing::info!(client_id = %client_id, job_filter = ?job_filter, "event socket connected");

    // Replies from the read side go through the writer task, which owns the sink.
    let (reply_tx, mut reply_rx) = mpsc::channel::<Message>(16);

    let writer_client_id = client_id.clone();
    let ws_write_handle = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                Some(reply) = reply_rx.recv() => reply,
                received = events_rx.recv() => match received {
                    Ok(event) => {
                        if !wanted(&event, job_filter.as_deref()) {
                            continue;
                        }
                        match serde_json::to_string(&event) {
                            Ok(text) => Message::Text(text.into()),
                            Err(e) => {
                                tracing::warn!(error = %e, "failed to serialize job event");
                                continue;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(client_id = %writer_client_id, skipped = n, "event socket lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            };
            if ws_sink.send(msg).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = ws_stream.next().await {
        match msg {
            Message::Text(text) => {
                if parse_client_message(text.as_str()) == ClientMessage::Ping {
                    let pong = pong_message(Utc::now()).to_string();
                    if reply_tx.send(Message::Text(pong.into())).await.is_err() {
                        break;
                    }
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    ws_write_handle.abort();
    tracing::info!(client_id = %client_id, "event socket disconnected");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use futures::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio::sync::Semaphore;
    use tokio::time::timeout;
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    use super::*;
    use crate::agents::llm::testing::ScriptedLlm;
    use crate::api::test_support::state;
    use crate::jobs::events::EventPayload;
    use crate::jobs::{GenerationRequest, StageStatus};

    const TIMEOUT: Duration = Duration::from_secs(5);

    type WsStream = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    /// Serve the full router on an ephemeral port and return the socket URL.
    async fn boot_server(app_state: AppState) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, crate::api::create_app(app_state))
                .await
                .unwrap();
        });
        format!("ws://{addr}/ws")
    }

    async fn connect(url: &str) -> WsStream {
        let (ws, _) = timeout(TIMEOUT, connect_async(url))
            .await
            .expect("connect timed out")
            .unwrap();
        ws
    }

    async fn next_json(ws: &mut WsStream) -> Value {
        loop {
            let msg = timeout(TIMEOUT, ws.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("socket closed")
                .unwrap();
            if let WsMessage::Text(text) = msg {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            requirements: "Build a todo app".into(),
            framework: "react".into(),
            language: "python".into(),
        }
    }

    #[tokio::test]
    async fn test_socket_greets_answers_ping_and_forwards_job_events() {
        let app_state = state(None);
        let url = boot_server(app_state.clone()).await;
        let mut ws = connect(&url).await;

        let hello = next_json(&mut ws).await;
        assert_eq!(hello["type"], "connected");
        assert!(!hello["clientId"].as_str().unwrap().is_empty());

        ws.send(WsMessage::Text("ping".into())).await.unwrap();
        assert_eq!(next_json(&mut ws).await["type"], "pong");
        ws.send(WsMessage::Text(r#"{"type":"ping"}"#.into())).await.unwrap();
        let pong = next_json(&mut ws).await;
        assert_eq!(pong["type"], "pong");
        assert!(pong["timestamp"].is_string());

        let job_id = app_state.runner.submit(request()).await.unwrap();

        let mut types = Vec::new();
        loop {
            let event = next_json(&mut ws).await;
            assert_eq!(event["jobId"], job_id.as_str());
            let event_type = event["type"].as_str().unwrap().to_string();
            let done = event_type == "job.completed";
            if done {
                assert!(event["payload"]["artifacts"]["main.py"].is_string());
            }
            types.push(event_type);
            if done {
                break;
            }
        }

        let mut expected = vec!["job.started".to_string()];
        for _ in 0..4 {
            expected.push("stage.started".into());
            expected.push("stage.completed".into());
        }
        expected.push("job.completed".into());
        assert_eq!(types, expected);
    }

    #[tokio::test]
    async fn test_filtered_socket_only_sees_its_job() {
        let gate = Arc::new(Semaphore::new(0));
        let app_state = state(Some(Arc::new(ScriptedLlm::gated(gate.clone()))));
        let url = boot_server(app_state.clone()).await;

        // Both jobs block on their first model call until permits are added.
        let watched = app_state.runner.submit(request()).await.unwrap();
        let mut ws = connect(&format!("{url}?job_id={watched}")).await;
        assert_eq!(next_json(&mut ws).await["type"], "connected");

        let other = app_state.runner.submit(request()).await.unwrap();
        let other_handle = app_state.runner.registry().get(&other).await.unwrap();
        other_handle
            .subscribe()
            .wait_for(|job| job.stages[0].status == StageStatus::InProgress)
            .await
            .unwrap();

        gate.add_permits(8);

        loop {
            let event = next_json(&mut ws).await;
            assert_eq!(event["jobId"], watched.as_str(), "leaked event: {event}");
            if event["type"] == "job.completed" {
                break;
            }
        }
    }

    #[test]
    fn test_plain_text_ping() {
        assert_eq!(parse_client_message("ping"), ClientMessage::Ping);
        assert_eq!(parse_client_message("  PING\n"), ClientMessage::Ping);
    }

    #[test]
    fn test_json_ping() {
        assert_eq!(parse_client_message(r#"{"type":"ping"}"#), ClientMessage::Ping);
        assert_eq!(
            parse_client_message(r#"{"type": "ping", "ts": 1}"#),
            ClientMessage::Ping
        );
    }

    #[test]
    fn test_other_messages_are_ignored() {
        assert_eq!(parse_client_message("hello"), ClientMessage::Ignored);
        assert_eq!(parse_client_message(r#"{"type":"cancel"}"#), ClientMessage::Ignored);
        assert_eq!(parse_client_message(r#"["ping"]"#), ClientMessage::Ignored);
        assert_eq!(parse_client_message(""), ClientMessage::Ignored);
    }

    #[test]
    fn test_connected_and_pong_shapes() {
        let hello = connected_message("abc");
        assert_eq!(hello["type"], "connected");
        assert_eq!(hello["clientId"], "abc");

        let pong = pong_message(Utc::now());
        assert_eq!(pong["type"], "pong");
        assert!(pong["timestamp"].is_string());
    }

    #[test]
    fn test_job_filter() {
        let event = JobEvent::new("job-1", EventPayload::JobFailed { error: "boom".into() });
        assert!(wanted(&event, None));
        assert!(wanted(&event, Some("job-1")));
        assert!(!wanted(&event, Some("job-2")));
    }
}
