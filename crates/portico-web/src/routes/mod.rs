//! API routes for the gateway.

use crate::AppState;
use crate::sse::SseFrame;
use crate::tailer::{AttachRequest, TailerStats};
use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::Response,
    routing::{get, post},
};
use portico_core::error::GatewayError;
use portico_core::sessions::{self, DEFAULT_PAGE_LIMIT, SessionPage};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Buffered frames per SSE client before it is considered dead.
const SSE_CLIENT_BUFFER: usize = 256;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Error response with a stable code.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_reply(err: &GatewayError) -> ApiError {
    let status = match err {
        GatewayError::InvalidSessionId(_) | GatewayError::SessionNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        GatewayError::MissingSession | GatewayError::MissingContent | GatewayError::InvalidCwd(_) => {
            StatusCode::BAD_REQUEST
        }
        GatewayError::Io(_) | GatewayError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
            code: err.code().to_string(),
        }),
    )
}

fn validate_session_id(id: &str) -> Result<(), ApiError> {
    if sessions::is_valid_session_id(id) {
        Ok(())
    } else {
        Err(error_reply(&GatewayError::InvalidSessionId(id.to_string())))
    }
}

/// Health check endpoint
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ==================== Session Directory ====================

#[derive(Debug, Deserialize)]
struct ListQuery {
    limit: Option<usize>,
    offset: Option<usize>,
}

async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<SessionPage>, ApiError> {
    let active = state.engine.active_sessions().await;
    let page = sessions::list_sessions(
        &state.paths,
        query.offset.unwrap_or(0),
        query.limit.unwrap_or(DEFAULT_PAGE_LIMIT),
        &active,
    )
    .map_err(|e| error_reply(&e))?;
    Ok(Json(page))
}

#[derive(Debug, Deserialize)]
struct StartSessionRequest {
    cwd: Option<String>,
    model: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartSessionResponse {
    session_id: String,
    cwd: String,
    ready: bool,
}

async fn start_session(
    State(state): State<AppState>,
    Json(request): Json<StartSessionRequest>,
) -> Result<Json<StartSessionResponse>, ApiError> {
    let cwd = request
        .cwd
        .filter(|c| !c.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| state.config.workdir.clone());
    let model = request.model.or_else(|| state.config.default_model.clone());

    let sidecar =
        sessions::create_session(&state.paths, &cwd, model).map_err(|e| error_reply(&e))?;
    Ok(Json(StartSessionResponse {
        session_id: sidecar.id,
        cwd: sidecar.cwd,
        ready: true,
    }))
}

// ==================== Messages & Cancellation ====================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct MessageRequest {
    content: Option<String>,
    image_path: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MessageAccepted {
    accepted: bool,
    message_id: String,
}

async fn post_message(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    body: Bytes,
) -> Result<Json<MessageAccepted>, ApiError> {
    validate_session_id(&session_id)?;
    // An absent or malformed body is the same as a body without content.
    let request: MessageRequest = serde_json::from_slice(&body).unwrap_or_default();
    let content = request
        .content
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| error_reply(&GatewayError::MissingContent))?;

    let message_id = state
        .engine
        .submit(&session_id, &content, request.image_path)
        .await
        .map_err(|e| error_reply(&e))?;

    Ok(Json(MessageAccepted {
        accepted: true,
        message_id,
    }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct CancelRequest {
    clear_queue: Option<bool>,
}

async fn cancel_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    body: Bytes,
) -> Result<Json<portico_adapters::CancelOutcome>, ApiError> {
    validate_session_id(&session_id)?;
    let request: CancelRequest = serde_json::from_slice(&body).unwrap_or_default();
    let clear_queue = request.clear_queue.unwrap_or(false);

    let outcome = state
        .engine
        .cancel(&session_id, clear_queue)
        .await
        .map_err(|e| error_reply(&e))?;
    Ok(Json(outcome))
}

// ==================== Chat Stream (SSE) ====================

#[derive(Debug, Deserialize)]
struct ChatStreamQuery {
    session: Option<String>,
    since: Option<u64>,
    limit: Option<usize>,
}

async fn chat_stream(
    State(state): State<AppState>,
    Query(query): Query<ChatStreamQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let session_id = query
        .session
        .filter(|s| !s.is_empty())
        .ok_or_else(|| error_reply(&GatewayError::MissingSession))?;
    validate_session_id(&session_id)?;
    if !state.paths.sidecar(&session_id).exists() {
        return Err(error_reply(&GatewayError::SessionNotFound(session_id)));
    }

    // `Last-Event-ID` (reconnect) overrides the query parameter.
    let since = headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .or(query.since)
        .unwrap_or(0);
    let limit = query.limit.unwrap_or(usize::MAX);

    let (tx, rx) = mpsc::channel::<SseFrame>(SSE_CLIENT_BUFFER);
    state
        .tailers
        .attach(&session_id, AttachRequest { since, limit, tx })
        .await;

    let stream = futures_util::stream::unfold(rx, |mut rx| async move {
        let frame = rx.recv().await?;
        Some((
            Ok::<_, std::convert::Infallible>(Bytes::from(frame.render())),
            rx,
        ))
    });

    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(stream))
        .map_err(|e| {
            error_reply(&GatewayError::Io(std::io::Error::other(e.to_string())))
        })
}

async fn chat_stream_stats(State(state): State<AppState>) -> Json<Vec<TailerStats>> {
    Json(state.tailers.stats().await)
}

/// Create API routes
pub fn api_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/sessions", get(list_sessions))
        .route("/api/session/start", post(start_session))
        .route("/api/chat-stream", get(chat_stream))
        .route("/api/chat-stream/stats", get(chat_stream_stats))
        .route("/api/sessions/{id}/messages", post(post_message))
        .route("/api/sessions/{id}/cancel", post(cancel_session))
        .with_state(state)
}
