//! Gateway configuration.
//!
//! Everything is environment-provided (`PORTICO_*`), falling back to the
//! defaults below. The gateway owns a directory tree under `root`:
//!
//! ```text
//! codex-sessions/<uuid>.json     sidecars
//! codex-events/<uuid>.jsonl      journals
//! uploads/                       uploaded images
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Port to listen on.
    pub port: u16,
    /// Gateway-owned directory tree.
    pub root: PathBuf,
    /// Default cwd for new sessions and PTYs.
    pub workdir: PathBuf,
    /// Exec-provider binary.
    pub exec_bin: String,
    /// Passed via `-a`.
    pub approval_policy: String,
    /// Passed via `--sandbox`.
    pub sandbox_mode: String,
    /// Initial model for new sessions.
    pub default_model: Option<String>,
    /// Models offered by `/models`.
    pub model_choices: Vec<String>,
    /// PTY time-to-live.
    pub session_ttl: Duration,
    /// PTY idle reap threshold (zero clients).
    pub idle_timeout: Duration,
    /// PTY history cap in bytes.
    pub history_limit: usize,
    /// SSE heartbeat cadence.
    pub heartbeat_interval: Duration,
    /// Process muxer binary for PTY attach-or-create, if any.
    pub muxer: Option<String>,
    /// Command written to a fresh PTY shortly after spawn.
    pub boot_cmd: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let home = std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));
        let workdir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

        Self {
            port: 3000,
            root: home.join(".claude-gateway"),
            workdir,
            exec_bin: "codex".to_string(),
            approval_policy: "never".to_string(),
            sandbox_mode: "workspace-write".to_string(),
            default_model: None,
            model_choices: vec![
                "gpt-5.2-codex".to_string(),
                "gpt-5.2".to_string(),
                "o3".to_string(),
                "o4-mini".to_string(),
                "gpt-4o".to_string(),
            ],
            session_ttl: Duration::from_millis(4 * 60 * 60 * 1000),
            idle_timeout: Duration::from_millis(30 * 60 * 1000),
            history_limit: 200_000,
            heartbeat_interval: Duration::from_millis(15_000),
            muxer: None,
            boot_cmd: None,
        }
    }
}

impl GatewayConfig {
    /// Creates config from environment, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            port: env_parse("PORTICO_PORT").unwrap_or(defaults.port),
            root: env_path("PORTICO_ROOT").unwrap_or(defaults.root),
            workdir: env_path("PORTICO_WORKDIR").unwrap_or(defaults.workdir),
            exec_bin: env_string("PORTICO_EXEC_BIN").unwrap_or(defaults.exec_bin),
            approval_policy: env_string("PORTICO_APPROVAL_POLICY")
                .unwrap_or(defaults.approval_policy),
            sandbox_mode: env_string("PORTICO_SANDBOX_MODE").unwrap_or(defaults.sandbox_mode),
            default_model: env_string("PORTICO_DEFAULT_MODEL").or(defaults.default_model),
            model_choices: env_string("PORTICO_MODEL_CHOICES")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or(defaults.model_choices),
            session_ttl: env_parse("PORTICO_SESSION_TTL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.session_ttl),
            idle_timeout: env_parse("PORTICO_IDLE_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.idle_timeout),
            history_limit: env_parse("PORTICO_HISTORY_LIMIT").unwrap_or(defaults.history_limit),
            heartbeat_interval: env_parse("PORTICO_HEARTBEAT_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.heartbeat_interval),
            muxer: env_string("PORTICO_MUXER").or(defaults.muxer),
            boot_cmd: env_string("PORTICO_BOOT_CMD").or(defaults.boot_cmd),
        }
    }

    /// Filesystem layout rooted at `self.root`.
    pub fn paths(&self) -> GatewayPaths {
        GatewayPaths::new(&self.root)
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env_string(key).map(PathBuf::from)
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// The gateway-owned directory tree.
#[derive(Debug, Clone)]
pub struct GatewayPaths {
    pub sessions_dir: PathBuf,
    pub events_dir: PathBuf,
    pub uploads_dir: PathBuf,
}

impl GatewayPaths {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            sessions_dir: root.join("codex-sessions"),
            events_dir: root.join("codex-events"),
            uploads_dir: root.join("uploads"),
        }
    }

    /// Create the directory tree if missing.
    pub fn ensure(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.sessions_dir)?;
        std::fs::create_dir_all(&self.events_dir)?;
        std::fs::create_dir_all(&self.uploads_dir)
    }

    pub fn sidecar(&self, session_id: &str) -> PathBuf {
        self.sessions_dir.join(format!("{session_id}.json"))
    }

    pub fn journal(&self, session_id: &str) -> PathBuf {
        self.events_dir.join(format!("{session_id}.jsonl"))
    }
}
