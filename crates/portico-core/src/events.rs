//! Journal event model.
//!
//! Every line of a session journal is one record:
//! `{ "cursor": "<N>", "event": "<kind>", "data": { … } }`. The cursor is a
//! 1-based integer encoded as a string for client-header compatibility.
//!
//! The closed core set of kinds (`message_start`, `content_block`,
//! `message_end`, `session_meta`) is modeled as [`JournalEvent`]; any other
//! kind stays in the free-form record so newer writers never break older
//! readers. Framing-only kinds (`history_start`, `history_end`, `heartbeat`)
//! are produced by the SSE layer and never persisted.

use serde::{Deserialize, Serialize};

/// 1-based position of one event within one session's journal.
pub type Cursor = u64;

/// Wire shape of a single journal line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JournalRecord {
    pub cursor: String,
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl JournalRecord {
    /// Parsed cursor, if the encoded value is a valid integer.
    pub fn cursor(&self) -> Option<Cursor> {
        self.cursor.parse().ok()
    }

    /// Decode the typed event for the closed core set.
    ///
    /// Returns `None` for unknown kinds or payloads that do not match.
    pub fn decode(&self) -> Option<JournalEvent> {
        let data = self.data.clone();
        match self.event.as_str() {
            "message_start" => serde_json::from_value(data)
                .ok()
                .map(JournalEvent::MessageStart),
            "content_block" => serde_json::from_value(data)
                .ok()
                .map(JournalEvent::ContentBlock),
            "message_end" => serde_json::from_value(data)
                .ok()
                .map(JournalEvent::MessageEnd),
            "session_meta" => serde_json::from_value(data)
                .ok()
                .map(JournalEvent::SessionMeta),
            _ => None,
        }
    }
}

/// Typed view of the core event kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum JournalEvent {
    MessageStart(MessageStart),
    ContentBlock(ContentBlockRecord),
    MessageEnd(MessageEnd),
    SessionMeta(SessionMeta),
}

impl JournalEvent {
    /// Wire name of this event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            JournalEvent::MessageStart(_) => "message_start",
            JournalEvent::ContentBlock(_) => "content_block",
            JournalEvent::MessageEnd(_) => "message_end",
            JournalEvent::SessionMeta(_) => "session_meta",
        }
    }

    /// Payload serialized for the record `data` field.
    pub fn payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            JournalEvent::MessageStart(p) => serde_json::to_value(p),
            JournalEvent::ContentBlock(p) => serde_json::to_value(p),
            JournalEvent::MessageEnd(p) => serde_json::to_value(p),
            JournalEvent::SessionMeta(p) => serde_json::to_value(p),
        }
    }
}

/// Role of a journaled message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Why a message ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    Error,
    Cancelled,
}

/// Opens a message; exactly one matching `message_end` follows per id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageStart {
    pub id: String,
    pub line_number: Cursor,
    pub role: Role,
    pub timestamp: String,
    pub session_id: String,
}

/// One content block within an open message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContentBlockRecord {
    pub message_id: String,
    pub index: u32,
    pub block: ContentBlock,
}

/// Content block variants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
    },
    #[serde(rename_all = "camelCase")]
    ToolUse {
        tool_use_id: String,
        tool_name: String,
        input: serde_json::Value,
    },
    #[serde(rename_all = "camelCase")]
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
        char_count: u64,
    },
}

/// Closes a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnd {
    pub id: String,
    pub stop_reason: StopReason,
}

/// Session snapshot, emitted at any time; carries no ordering contract
/// beyond its cursor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionMeta {
    pub provider: String,
    pub session_id: String,
    pub cwd: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_thread_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_info: Option<ContextInfo>,
    pub is_active: bool,
    pub queue_length: usize,
}

/// Token usage accumulated over a session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct UsageSummary {
    pub input_tokens: u64,
    pub cached_input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

/// Context-window accounting for the session's model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextInfo {
    pub max_tokens: Option<u64>,
    pub used_tokens: u64,
    pub percent_left: Option<f64>,
}
