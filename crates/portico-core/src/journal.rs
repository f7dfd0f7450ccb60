//! Append-only per-session event journal.
//!
//! One writer per session (enforced by callers), any number of concurrent
//! readers. Readers tolerate torn tails by consuming only complete lines;
//! the writer recovers its cursor from the journal tail when the sidecar
//! lags or is damaged.

use crate::config::GatewayPaths;
use crate::error::{GatewayError, Result};
use crate::events::{Cursor, JournalEvent, JournalRecord};
use crate::sidecar::SessionSidecar;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// How far back the tail scan looks when recovering a lost cursor.
const RECOVERY_WINDOW: u64 = 64 * 1024;

/// Single writer for one session's journal and sidecar.
#[derive(Debug)]
pub struct JournalWriter {
    session_id: String,
    sidecar_path: PathBuf,
    file: File,
    cursor: Cursor,
}

impl JournalWriter {
    /// Open the writer for a session.
    ///
    /// Fails with `SESSION_NOT_FOUND` when the sidecar is absent. The
    /// highest cursor is taken from the sidecar, or recovered from the
    /// journal tail when the sidecar does not carry a usable value.
    pub fn open(paths: &GatewayPaths, session_id: &str) -> Result<Self> {
        let sidecar_path = paths.sidecar(session_id);
        let sidecar = SessionSidecar::load(&sidecar_path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                GatewayError::SessionNotFound(session_id.to_string())
            } else {
                GatewayError::Io(e)
            }
        })?;

        // The sidecar can lag the journal (crash between append and
        // commit); cursors must never be reused, so trust whichever source
        // is further ahead.
        let journal_path = paths.journal(session_id);
        let cursor = sidecar
            .last_cursor
            .unwrap_or(0)
            .max(recover_cursor(&journal_path));

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&journal_path)?;

        Ok(Self {
            session_id: session_id.to_string(),
            sidecar_path,
            file,
            cursor,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Highest cursor appended so far.
    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Cursor the next `append` will assign.
    pub fn next_cursor(&self) -> Cursor {
        self.cursor + 1
    }

    /// Append one event as a single JSON line and return its cursor.
    pub fn append(&mut self, event: &JournalEvent) -> Result<Cursor> {
        self.cursor += 1;
        let record = JournalRecord {
            cursor: self.cursor.to_string(),
            event: event.kind().to_string(),
            data: event.payload()?,
        };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        self.file.write_all(line.as_bytes())?;
        Ok(self.cursor)
    }

    /// Merge an update over the on-disk sidecar, stamp `lastCursor`, and
    /// rewrite it atomically. Returns the committed sidecar.
    pub fn commit<F>(&mut self, apply: F) -> Result<SessionSidecar>
    where
        F: FnOnce(&mut SessionSidecar),
    {
        let mut sidecar = match SessionSidecar::load(&self.sidecar_path) {
            Ok(sidecar) => sidecar,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(GatewayError::SessionNotFound(self.session_id.clone()));
            }
            Err(e) => return Err(GatewayError::Io(e)),
        };
        if sidecar.id.is_empty() {
            sidecar.id = self.session_id.clone();
        }
        apply(&mut sidecar);
        sidecar.last_cursor = Some(self.cursor);
        sidecar.store(&self.sidecar_path)?;
        Ok(sidecar)
    }
}

/// Scan the last `RECOVERY_WINDOW` bytes for the newest valid record.
///
/// Malformed trailing lines (the only tolerated tail corruption) are
/// skipped. A missing or unreadable journal recovers to cursor 0.
fn recover_cursor(path: &Path) -> Cursor {
    let Ok(mut file) = File::open(path) else {
        return 0;
    };
    let Ok(len) = file.metadata().map(|m| m.len()) else {
        return 0;
    };
    let start = len.saturating_sub(RECOVERY_WINDOW);
    if file.seek(SeekFrom::Start(start)).is_err() {
        return 0;
    }
    let mut buf = Vec::new();
    if file.read_to_end(&mut buf).is_err() {
        return 0;
    }

    for line in buf.split(|&b| b == b'\n').rev() {
        if line.is_empty() {
            continue;
        }
        if let Ok(record) = serde_json::from_slice::<JournalRecord>(line)
            && let Some(cursor) = record.cursor()
        {
            return cursor;
        }
    }
    0
}

/// Read complete records starting at a byte position.
///
/// Only lines terminated by `\n` are consumed, so a torn tail written by a
/// concurrent append is left for the next read. Malformed lines within the
/// consumed region are skipped silently. Returns the records and the new
/// position.
pub fn read_from(path: &Path, position: u64) -> io::Result<(Vec<JournalRecord>, u64)> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), position)),
        Err(e) => return Err(e),
    };
    file.seek(SeekFrom::Start(position))?;

    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;

    let Some(last_newline) = buf.iter().rposition(|&b| b == b'\n') else {
        return Ok((Vec::new(), position));
    };

    let mut records = Vec::new();
    for line in buf[..=last_newline].split(|&b| b == b'\n') {
        if line.is_empty() {
            continue;
        }
        match serde_json::from_slice::<JournalRecord>(line) {
            Ok(record) => records.push(record),
            Err(_) => {
                tracing::debug!(path = %path.display(), "skipping malformed journal line");
            }
        }
    }

    Ok((records, position + last_newline as u64 + 1))
}

/// Read every complete record in the journal.
pub fn read_records(path: &Path) -> io::Result<Vec<JournalRecord>> {
    read_from(path, 0).map(|(records, _)| records)
}
