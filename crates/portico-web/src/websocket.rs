//! WebSocket endpoint for PTY terminal sessions.
//!
//! Binary frames carry raw terminal I/O in both directions. Text frames
//! from the client are either control messages (`{"type":"resize",…}` /
//! `{"type":"input",…}`) or, when they do not parse as one, raw keystrokes.

use crate::AppState;
use axum::{
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use portico_adapters::PtyEvent;
use portico_adapters::pty_registry::PtySession;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Deserialize)]
pub struct TerminalQuery {
    session: Option<String>,
}

/// Control messages sent by the terminal client as text frames.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum TerminalClientMessage {
    Resize { cols: u16, rows: u16 },
    Input { data: String },
}

/// Upgrade handler for `/ws/terminal?session=<name>`.
pub async fn terminal_ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<TerminalQuery>,
    State(state): State<AppState>,
) -> Response {
    let Some(session_id) = query.session.filter(|s| !s.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "missing session parameter").into_response();
    };
    ws.on_upgrade(move |socket| handle_terminal_socket(socket, state, session_id))
}

async fn handle_terminal_socket(socket: WebSocket, state: AppState, session_id: String) {
    let session = match state.registry.get_or_create(&session_id).await {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!(session_id, error = %e, "failed to open pty session");
            let mut socket = socket;
            let _ = socket
                .send(Message::Text(format!("failed to open terminal: {e}").into()))
                .await;
            return;
        }
    };

    let (mut sender, mut receiver) = socket.split();

    // History prefix arrives through the sink before any live chunk.
    let (tx, mut rx) = mpsc::unbounded_channel::<PtyEvent>();
    let sink_id = session.attach(tx);

    let send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                PtyEvent::Data(data) => {
                    if sender.send(Message::Binary(data.into())).await.is_err() {
                        break;
                    }
                }
                PtyEvent::Exit => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Binary(data)) => {
                if let Err(e) = session.write(&data) {
                    debug!(session_id, error = %e, "pty write failed");
                    break;
                }
            }
            Ok(Message::Text(text)) => handle_text_frame(&session, text.as_str()),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(_) => break,
        }
    }

    session.detach(sink_id);
    send_task.abort();
}

fn handle_text_frame(session: &Arc<PtySession>, text: &str) {
    match serde_json::from_str::<TerminalClientMessage>(text) {
        Ok(TerminalClientMessage::Resize { cols, rows }) => {
            if let Err(e) = session.resize(cols, rows) {
                debug!(session_id = %session.id, error = %e, "resize rejected");
            }
        }
        Ok(TerminalClientMessage::Input { data }) => {
            let _ = session.write(data.as_bytes());
        }
        // Anything else is raw keystrokes.
        Err(_) => {
            let _ = session.write(text.as_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resize_message_parses() {
        let msg: TerminalClientMessage =
            serde_json::from_str(r#"{"type":"resize","cols":132,"rows":50}"#).unwrap();
        assert_eq!(msg, TerminalClientMessage::Resize { cols: 132, rows: 50 });
    }

    #[test]
    fn test_input_message_parses() {
        let msg: TerminalClientMessage =
            serde_json::from_str(r#"{"type":"input","data":"ls\n"}"#).unwrap();
        assert_eq!(
            msg,
            TerminalClientMessage::Input {
                data: "ls\n".to_string()
            }
        );
    }

    #[test]
    fn test_plain_keystrokes_do_not_parse_as_control() {
        assert!(serde_json::from_str::<TerminalClientMessage>("ls -la").is_err());
        assert!(serde_json::from_str::<TerminalClientMessage>(r#"{"type":"unknown"}"#).is_err());
    }
}
