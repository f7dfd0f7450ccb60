//! Exec-provider stream event types for parsing `exec --json` output.
//!
//! The exec binary emits newline-delimited JSON events on stdout. Only the
//! events the gateway transcodes are modeled as typed variants; everything
//! else is captured by `#[serde(other)]` and ignored, providing forward
//! compatibility with new event types.

use portico_core::UsageSummary;
use serde::{Deserialize, Serialize};

/// Events from the exec provider's `--json` NDJSON output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecStreamEvent {
    /// Conversation thread created or resumed.
    #[serde(rename = "thread.started")]
    ThreadStarted { thread_id: String },

    /// Turn finished — carries token usage.
    #[serde(rename = "turn.completed")]
    TurnCompleted { usage: ExecUsage },

    /// Item begins (command execution start is the actionable case).
    #[serde(rename = "item.started")]
    ItemStarted { item: ExecItem },

    /// Item finishes.
    #[serde(rename = "item.completed")]
    ItemCompleted { item: ExecItem },

    /// All other events (turn.started, item.updated, errors, …).
    #[serde(other)]
    Other,
}

/// Items within a turn, tagged by `item_type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "item_type", rename_all = "snake_case")]
pub enum ExecItem {
    CommandExecution {
        id: String,
        #[serde(default)]
        command: String,
        #[serde(default)]
        aggregated_output: String,
        #[serde(default)]
        exit_code: Option<i64>,
    },
    AgentMessage {
        #[serde(default)]
        id: Option<String>,
        text: String,
    },
    Reasoning {
        #[serde(default)]
        id: Option<String>,
        text: String,
    },
    #[serde(other)]
    Other,
}

/// Token usage from `turn.completed`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct ExecUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub cached_input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

impl From<ExecUsage> for UsageSummary {
    fn from(usage: ExecUsage) -> Self {
        UsageSummary {
            input_tokens: usage.input_tokens,
            cached_input_tokens: usage.cached_input_tokens,
            output_tokens: usage.output_tokens,
            total_tokens: usage.input_tokens + usage.output_tokens,
        }
    }
}

/// Parses NDJSON lines from the exec provider's stdout.
pub struct ExecStreamParser;

impl ExecStreamParser {
    /// Parse a single line of NDJSON output.
    ///
    /// Returns `None` for empty lines or malformed JSON (logged at debug
    /// level).
    pub fn parse_line(line: &str) -> Option<ExecStreamEvent> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }

        match serde_json::from_str::<ExecStreamEvent>(trimmed) {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::debug!(
                    "Skipping malformed exec JSON line: {} (error: {})",
                    truncate(trimmed, 100),
                    e
                );
                None
            }
        }
    }
}

/// Truncates a string to a maximum byte length on a char boundary, adding
/// "..." if truncated.
fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        let boundary = s
            .char_indices()
            .take_while(|(i, _)| *i < max_len)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        format!("{}...", &s[..boundary])
    }
}
