//! Session directory.
//!
//! Sessions are identified by their sidecar files; listing scans
//! `<sessions_dir>/*.json`, newest first by mtime, and annotates each entry
//! with the journal size and live activity.

use crate::config::GatewayPaths;
use crate::error::{GatewayError, Result};
use crate::sidecar::SessionSidecar;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::SystemTime;
use uuid::Uuid;

/// Default page size for listings.
pub const DEFAULT_PAGE_LIMIT: usize = 50;

/// Checks the `^[a-f0-9]{8}-([a-f0-9]{4}-){3}[a-f0-9]{12}$` shape without a
/// regex engine.
pub fn is_valid_session_id(id: &str) -> bool {
    if id.len() != 36 {
        return false;
    }
    id.bytes().enumerate().all(|(i, b)| match i {
        8 | 13 | 18 | 23 => b == b'-',
        _ => b.is_ascii_digit() || (b'a'..=b'f').contains(&b),
    })
}

/// Create a new session: validate the cwd, mint a v4 id, write the sidecar.
pub fn create_session(
    paths: &GatewayPaths,
    cwd: &Path,
    model: Option<String>,
) -> Result<SessionSidecar> {
    if !cwd.is_dir() {
        return Err(GatewayError::InvalidCwd(cwd.display().to_string()));
    }

    let sidecar = SessionSidecar {
        id: Uuid::new_v4().to_string(),
        cwd: cwd.display().to_string(),
        model,
        created_at: Some(Utc::now().to_rfc3339()),
        message_count: Some(0),
        last_cursor: Some(0),
        ..Default::default()
    };
    sidecar.store(&paths.sidecar(&sidecar.id))?;
    tracing::info!(session_id = %sidecar.id, cwd = %sidecar.cwd, "created session");
    Ok(sidecar)
}

/// One listed session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEntry {
    #[serde(flatten)]
    pub sidecar: SessionSidecar,
    pub file_size: u64,
    pub is_active: bool,
}

/// One page of the session directory.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPage {
    pub sessions: Vec<SessionEntry>,
    pub total: usize,
    pub has_more: bool,
}

/// List sessions sorted descending by sidecar mtime.
///
/// Sidecar parse errors degrade to an empty shape (the id is recovered from
/// the filename) rather than dropping the entry.
pub fn list_sessions(
    paths: &GatewayPaths,
    offset: usize,
    limit: usize,
    active: &HashSet<String>,
) -> Result<SessionPage> {
    let mut entries: Vec<(std::path::PathBuf, SystemTime)> = Vec::new();

    match fs::read_dir(&paths.sessions_dir) {
        Ok(dir) => {
            for entry in dir.flatten() {
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == "json")
                    && let Ok(meta) = entry.metadata()
                {
                    let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                    entries.push((path, mtime));
                }
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(GatewayError::Io(e)),
    }

    entries.sort_by(|a, b| b.1.cmp(&a.1));
    let total = entries.len();

    let mut sessions = Vec::new();
    for (path, _) in entries.into_iter().skip(offset).take(limit) {
        let mut sidecar = SessionSidecar::load(&path).unwrap_or_default();
        if sidecar.id.is_empty()
            && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
        {
            sidecar.id = stem.to_string();
        }

        let file_size = fs::metadata(paths.journal(&sidecar.id))
            .map(|m| m.len())
            .unwrap_or(0);
        let is_active = active.contains(&sidecar.id);

        sessions.push(SessionEntry {
            sidecar,
            file_size,
            is_active,
        });
    }

    let has_more = offset + sessions.len() < total;
    Ok(SessionPage {
        sessions,
        total,
        has_more,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn test_paths(temp: &TempDir) -> GatewayPaths {
        let paths = GatewayPaths::new(temp.path());
        paths.ensure().unwrap();
        paths
    }

    // ==================== Session Id Tests ====================

    #[test]
    fn test_valid_session_id() {
        assert!(is_valid_session_id("0b5c9e2f-1a2b-3c4d-5e6f-7a8b9c0d1e2f"));
    }

    #[test]
    fn test_generated_ids_are_valid() {
        let temp = TempDir::new().unwrap();
        let paths = test_paths(&temp);
        let sidecar = create_session(&paths, temp.path(), None).unwrap();
        assert!(is_valid_session_id(&sidecar.id));
    }

    #[test]
    fn test_invalid_session_ids() {
        assert!(!is_valid_session_id(""));
        assert!(!is_valid_session_id("not-a-uuid"));
        assert!(!is_valid_session_id("0B5C9E2F-1A2B-3C4D-5E6F-7A8B9C0D1E2F")); // uppercase
        assert!(!is_valid_session_id("0b5c9e2f1a2b3c4d5e6f7a8b9c0d1e2f")); // no hyphens
        assert!(!is_valid_session_id("0b5c9e2f-1a2b-3c4d-5e6f-7a8b9c0d1e2")); // short
        assert!(!is_valid_session_id("../../../../etc/passwd-aaaa-bbbbbbbb"));
    }

    // ==================== Create Tests ====================

    #[test]
    fn test_create_session_writes_sidecar() {
        let temp = TempDir::new().unwrap();
        let paths = test_paths(&temp);

        let sidecar = create_session(&paths, temp.path(), Some("o3".to_string())).unwrap();
        let loaded = SessionSidecar::load(&paths.sidecar(&sidecar.id)).unwrap();

        assert_eq!(loaded.id, sidecar.id);
        assert_eq!(loaded.model.as_deref(), Some("o3"));
        assert_eq!(loaded.last_cursor, Some(0));
        assert!(loaded.created_at.is_some());
    }

    #[test]
    fn test_create_session_rejects_missing_cwd() {
        let temp = TempDir::new().unwrap();
        let paths = test_paths(&temp);

        let err = create_session(&paths, &temp.path().join("nope"), None).unwrap_err();
        assert_eq!(err.code(), "INVALID_CWD");
    }

    // ==================== Listing Tests ====================

    #[test]
    fn test_list_empty_directory() {
        let temp = TempDir::new().unwrap();
        let paths = test_paths(&temp);

        let page = list_sessions(&paths, 0, DEFAULT_PAGE_LIMIT, &HashSet::new()).unwrap();
        assert!(page.sessions.is_empty());
        assert_eq!(page.total, 0);
        assert!(!page.has_more);
    }

    #[test]
    fn test_list_sorts_newest_first() {
        let temp = TempDir::new().unwrap();
        let paths = test_paths(&temp);

        let first = create_session(&paths, temp.path(), None).unwrap();
        // Distinct mtimes; filesystem timestamp resolution can be coarse.
        std::thread::sleep(std::time::Duration::from_millis(20));
        let second = create_session(&paths, temp.path(), None).unwrap();

        let page = list_sessions(&paths, 0, DEFAULT_PAGE_LIMIT, &HashSet::new()).unwrap();
        assert_eq!(page.sessions.len(), 2);
        assert_eq!(page.sessions[0].sidecar.id, second.id);
        assert_eq!(page.sessions[1].sidecar.id, first.id);
    }

    #[test]
    fn test_list_pagination() {
        let temp = TempDir::new().unwrap();
        let paths = test_paths(&temp);

        for _ in 0..5 {
            create_session(&paths, temp.path(), None).unwrap();
        }

        let page = list_sessions(&paths, 0, 2, &HashSet::new()).unwrap();
        assert_eq!(page.sessions.len(), 2);
        assert_eq!(page.total, 5);
        assert!(page.has_more);

        let page = list_sessions(&paths, 4, 2, &HashSet::new()).unwrap();
        assert_eq!(page.sessions.len(), 1);
        assert!(!page.has_more);
    }

    #[test]
    fn test_list_tolerates_corrupt_sidecar() {
        let temp = TempDir::new().unwrap();
        let paths = test_paths(&temp);

        let path = paths.sidecar("0b5c9e2f-1a2b-3c4d-5e6f-7a8b9c0d1e2f");
        let mut file = fs::File::create(&path).unwrap();
        write!(file, "{{ broken").unwrap();

        let page = list_sessions(&paths, 0, DEFAULT_PAGE_LIMIT, &HashSet::new()).unwrap();
        assert_eq!(page.sessions.len(), 1);
        assert_eq!(
            page.sessions[0].sidecar.id,
            "0b5c9e2f-1a2b-3c4d-5e6f-7a8b9c0d1e2f"
        );
    }

    #[test]
    fn test_list_annotates_activity_and_size() {
        let temp = TempDir::new().unwrap();
        let paths = test_paths(&temp);

        let sidecar = create_session(&paths, temp.path(), None).unwrap();
        fs::write(paths.journal(&sidecar.id), b"0123456789").unwrap();

        let mut active = HashSet::new();
        active.insert(sidecar.id.clone());

        let page = list_sessions(&paths, 0, DEFAULT_PAGE_LIMIT, &active).unwrap();
        assert!(page.sessions[0].is_active);
        assert_eq!(page.sessions[0].file_size, 10);
    }
}
