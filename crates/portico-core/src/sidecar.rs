//! Session sidecar: the small per-session metadata file mirroring summary
//! fields and the last committed cursor.
//!
//! The sidecar is written last-writer-wins by the single journal writer.
//! Readers tolerate a sidecar that lags its journal.

use crate::events::{ContextInfo, Cursor, UsageSummary};
use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::io;
use std::path::Path;

/// Per-session metadata, stored as `<sessions_dir>/<id>.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSidecar {
    pub id: String,
    pub cwd: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_preview: Option<String>,
    #[serde(deserialize_with = "lenient_u64")]
    pub message_count: Option<u64>,
    #[serde(deserialize_with = "lenient_u64")]
    pub last_cursor: Option<Cursor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_thread_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_info: Option<ContextInfo>,
}

/// Accepts any JSON value, keeping only unsigned integers.
///
/// Old sidecars have carried string and null cursors; anything that is not
/// a plain integer triggers tail recovery instead of a parse failure.
fn lenient_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value.as_u64())
}

impl SessionSidecar {
    /// Load a sidecar from disk.
    ///
    /// A missing file is an error (the caller decides whether that means
    /// `SESSION_NOT_FOUND`); a malformed file degrades to the default shape.
    pub fn load(path: &Path) -> io::Result<Self> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw).unwrap_or_default())
    }

    /// Atomically rewrite the sidecar (write-whole-file semantics).
    pub fn store(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_vec_pretty(self).map_err(io::Error::other)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &json)?;
        fs::rename(&tmp, path)
    }
}
