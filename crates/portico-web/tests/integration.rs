//! Integration tests for the portico gateway
//!
//! Tests end-to-end flows including:
//! - Session creation and listing
//! - Message submission through the exec engine (stubbed binary)
//! - SSE history replay and `since`/`Last-Event-ID` reconnects
//! - Error codes at the HTTP boundary

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures_util::StreamExt;
use portico_core::GatewayConfig;
use portico_web::{build_state, create_app};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

fn write_stub(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("codex-stub.sh");
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
    }
    path
}

fn test_app(temp: &TempDir, exec_bin: &str) -> Router {
    let config = GatewayConfig {
        root: temp.path().join("gw"),
        workdir: temp.path().to_path_buf(),
        exec_bin: exec_bin.to_string(),
        ..Default::default()
    };
    config.paths().ensure().unwrap();
    create_app(build_state(config))
}

async fn request_json(
    app: Router,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header("Content-Type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = app.oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

async fn create_session(app: Router, temp: &TempDir) -> String {
    let (status, json) = request_json(
        app,
        "POST",
        "/api/session/start",
        Some(serde_json::json!({ "cwd": temp.path().to_str().unwrap() })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ready"], true);
    json["sessionId"].as_str().unwrap().to_string()
}

/// Poll the session directory until the sidecar reaches a cursor.
async fn wait_for_cursor(app: Router, session_id: &str, cursor: u64) {
    for _ in 0..400 {
        let (_, json) = request_json(app.clone(), "GET", "/api/sessions", None).await;
        let reached = json["sessions"]
            .as_array()
            .into_iter()
            .flatten()
            .any(|s| s["id"] == session_id && s["lastCursor"] == cursor);
        if reached {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("session {session_id} never reached cursor {cursor}");
}

/// Read the SSE body until the collected text contains `needle`.
async fn read_sse_until(body: Body, needle: &str) -> String {
    let mut stream = body.into_data_stream();
    let mut collected = String::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !collected.contains(needle) {
        let chunk = tokio::time::timeout_at(deadline, stream.next())
            .await
            .expect("timed out reading sse stream")
            .expect("sse stream ended early")
            .expect("sse stream error");
        collected.push_str(&String::from_utf8_lossy(&chunk));
    }
    collected
}

// ==================== Session API Tests ====================

#[tokio::test]
async fn test_start_session_then_list() {
    let temp = TempDir::new().unwrap();
    let app = test_app(&temp, "codex");

    let session_id = create_session(app.clone(), &temp).await;

    let (status, json) = request_json(app, "GET", "/api/sessions", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 1);
    assert_eq!(json["hasMore"], false);
    assert_eq!(json["sessions"][0]["id"], session_id);
    assert_eq!(json["sessions"][0]["isActive"], false);
}

#[tokio::test]
async fn test_start_session_invalid_cwd() {
    let temp = TempDir::new().unwrap();
    let app = test_app(&temp, "codex");

    let (status, json) = request_json(
        app,
        "POST",
        "/api/session/start",
        Some(serde_json::json!({ "cwd": temp.path().join("nope").to_str().unwrap() })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "INVALID_CWD");
}

#[tokio::test]
async fn test_list_sessions_paginates() {
    let temp = TempDir::new().unwrap();
    let app = test_app(&temp, "codex");

    for _ in 0..3 {
        create_session(app.clone(), &temp).await;
    }

    let (status, json) = request_json(app, "GET", "/api/sessions?limit=2&offset=0", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["sessions"].as_array().unwrap().len(), 2);
    assert_eq!(json["total"], 3);
    assert_eq!(json["hasMore"], true);
}

// ==================== Message Endpoint Tests ====================

#[tokio::test]
async fn test_message_missing_content() {
    let temp = TempDir::new().unwrap();
    let app = test_app(&temp, "codex");
    let session_id = create_session(app.clone(), &temp).await;

    let (status, json) = request_json(
        app,
        "POST",
        &format!("/api/sessions/{session_id}/messages"),
        Some(serde_json::json!({})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "MISSING_CONTENT");
}

#[tokio::test]
async fn test_message_invalid_session_id() {
    let temp = TempDir::new().unwrap();
    let app = test_app(&temp, "codex");

    let (status, json) = request_json(
        app,
        "POST",
        "/api/sessions/not-a-uuid/messages",
        Some(serde_json::json!({ "content": "hi" })),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "INVALID_SESSION_ID");
}

#[tokio::test]
async fn test_message_unknown_session() {
    let temp = TempDir::new().unwrap();
    let app = test_app(&temp, "codex");

    let (status, json) = request_json(
        app,
        "POST",
        "/api/sessions/0b5c9e2f-1a2b-3c4d-5e6f-7a8b9c0d1e2f/messages",
        Some(serde_json::json!({ "content": "hi" })),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "SESSION_NOT_FOUND");
}

// ==================== Cancel Endpoint Tests ====================

#[tokio::test]
async fn test_cancel_idle_session_reports_nothing_running() {
    let temp = TempDir::new().unwrap();
    let app = test_app(&temp, "codex");
    let session_id = create_session(app.clone(), &temp).await;

    let (status, json) = request_json(
        app,
        "POST",
        &format!("/api/sessions/{session_id}/cancel"),
        Some(serde_json::json!({ "clearQueue": true })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ok"], true);
    assert_eq!(json["cancelled"], false);
    assert_eq!(json["running"], false);
    assert_eq!(json["clearedQueue"], false);
}

// ==================== Chat Stream Tests ====================

#[tokio::test]
async fn test_chat_stream_requires_session_param() {
    let temp = TempDir::new().unwrap();
    let app = test_app(&temp, "codex");

    let (status, json) = request_json(app, "GET", "/api/chat-stream", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "MISSING_SESSION");
}

#[tokio::test]
async fn test_chat_stream_unknown_session() {
    let temp = TempDir::new().unwrap();
    let app = test_app(&temp, "codex");

    let (status, json) = request_json(
        app,
        "GET",
        "/api/chat-stream?session=0b5c9e2f-1a2b-3c4d-5e6f-7a8b9c0d1e2f",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "SESSION_NOT_FOUND");
}

#[tokio::test]
async fn test_full_chat_turn_replay_and_since() {
    let temp = TempDir::new().unwrap();
    let stub = write_stub(
        temp.path(),
        r#"echo '{"type":"item.completed","item":{"item_type":"agent_message","text":"hello"}}'"#,
    );
    let app = test_app(&temp, stub.to_str().unwrap());
    let session_id = create_session(app.clone(), &temp).await;

    let (status, json) = request_json(
        app.clone(),
        "POST",
        &format!("/api/sessions/{session_id}/messages"),
        Some(serde_json::json!({ "content": "hi" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["accepted"], true);
    assert!(json["messageId"].is_string());

    // The turn runs in the background; 6 records land in the journal.
    wait_for_cursor(app.clone(), &session_id, 6).await;

    // Full replay from the beginning.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/chat-stream?session={session_id}&since=0"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/event-stream"
    );

    let text = read_sse_until(response.into_body(), "event: history_end").await;
    assert!(text.contains("event: session_meta"));
    assert!(text.contains("event: history_start"));
    for cursor in 1..=6 {
        assert!(text.contains(&format!("id: {cursor}\n")), "missing cursor {cursor}");
    }
    assert!(text.contains(r#"data: {"count":6}"#));
    // Frames end with the double blank terminator.
    assert!(text.contains("\n\n\n"));

    // Reconnect from a cursor: only the suffix is replayed.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/chat-stream?session={session_id}&since=3"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let text = read_sse_until(response.into_body(), "event: history_end").await;
    assert!(!text.contains("id: 1\n"));
    assert!(text.contains("id: 4\n"));
    assert!(text.contains("id: 6\n"));
    assert!(text.contains(r#"data: {"count":3}"#));

    // Last-Event-ID header overrides the query parameter.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/chat-stream?session={session_id}&since=0"))
                .header("Last-Event-ID", "5")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let text = read_sse_until(response.into_body(), "event: history_end").await;
    assert!(!text.contains("id: 5\n"));
    assert!(text.contains("id: 6\n"));
    assert!(text.contains(r#"data: {"count":1}"#));

    // Stats now report live tailers.
    let (status, json) = request_json(app, "GET", "/api/chat-stream/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.as_array().unwrap().len(), 1);
    assert_eq!(json[0]["sessionId"], session_id);
}

#[tokio::test]
async fn test_slash_model_command_round_trip() {
    let temp = TempDir::new().unwrap();
    let app = test_app(&temp, "codex");
    let session_id = create_session(app.clone(), &temp).await;

    let (status, _) = request_json(
        app.clone(),
        "POST",
        &format!("/api/sessions/{session_id}/messages"),
        Some(serde_json::json!({ "content": "/model o3" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, json) = request_json(app, "GET", "/api/sessions", None).await;
    assert_eq!(json["sessions"][0]["model"], "o3");
    assert_eq!(json["sessions"][0]["lastCursor"], 6);
}
