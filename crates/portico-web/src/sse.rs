//! SSE frame assembly.
//!
//! A frame is exactly `id: <cursor>\nevent: <kind>\ndata: <json>\n\n\n`;
//! the double blank terminator is part of the compatibility contract.
//! Frames without a cursor (heartbeat, history sentinels, live meta) omit
//! the `id:` line.

use portico_core::events::JournalRecord;
use serde_json::{Value, json};

#[derive(Debug, Clone, PartialEq)]
pub struct SseFrame {
    pub id: Option<String>,
    pub event: String,
    pub data: Value,
}

impl SseFrame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            id: None,
            event: event.into(),
            data,
        }
    }

    pub fn heartbeat() -> Self {
        Self::new("heartbeat", json!({}))
    }

    pub fn history_start(since: u64) -> Self {
        Self::new("history_start", json!({ "since": since }))
    }

    pub fn history_end(count: usize) -> Self {
        Self::new("history_end", json!({ "count": count }))
    }

    /// Frame a journal record; its cursor becomes the SSE event id.
    pub fn from_record(record: &JournalRecord) -> Self {
        Self {
            id: Some(record.cursor.clone()),
            event: record.event.clone(),
            data: record.data.clone(),
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(id) = &self.id {
            out.push_str("id: ");
            out.push_str(id);
            out.push('\n');
        }
        out.push_str("event: ");
        out.push_str(&self.event);
        out.push_str("\ndata: ");
        out.push_str(&self.data.to_string());
        out.push_str("\n\n\n");
        out
    }
}
