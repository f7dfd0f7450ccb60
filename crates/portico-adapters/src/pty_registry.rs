//! PTY session registry.
//!
//! Owns the set of live interactive shell processes, fans their output out
//! to attached clients, and enforces lifecycle policies (TTL, idle reap,
//! exit cleanup). New clients receive the bounded history prefix before
//! live frames; terminal redraw semantics accept the lossy prefix.

use portico_core::GatewayConfig;
use portable_pty::{CommandBuilder, MasterPty, PtySize, native_pty_system};
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

/// Initial PTY geometry.
const INITIAL_COLS: u16 = 120;
const INITIAL_ROWS: u16 = 40;

/// Delay before the boot command is written to a fresh PTY.
const BOOT_CMD_DELAY: Duration = Duration::from_millis(200);

/// Reaper sweep cadence.
const REAP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Frames delivered to attached sinks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PtyEvent {
    /// Raw terminal output (history prefix first, then live chunks).
    Data(Vec<u8>),
    /// The PTY process exited; no further frames follow.
    Exit,
}

/// Identifier for one attached sink.
pub type SinkId = u64;

enum ReaderEvent {
    Data(Vec<u8>),
    Eof,
}

struct PtyShared {
    history: Vec<u8>,
    clients: HashMap<SinkId, mpsc::UnboundedSender<PtyEvent>>,
    last_activity: Instant,
}

/// One live PTY process and its fan-out state.
pub struct PtySession {
    pub id: String,
    created_at: Instant,
    history_limit: usize,
    shared: StdMutex<PtyShared>,
    master: StdMutex<Box<dyn MasterPty + Send>>,
    writer: StdMutex<Box<dyn Write + Send>>,
    child: StdMutex<Box<dyn portable_pty::Child + Send>>,
}

impl PtySession {
    /// Register a sink: it immediately receives the whole history prefix,
    /// then every subsequent output chunk.
    pub fn attach(&self, sink: mpsc::UnboundedSender<PtyEvent>) -> SinkId {
        static NEXT_SINK: AtomicU64 = AtomicU64::new(0);
        let sink_id = NEXT_SINK.fetch_add(1, Ordering::Relaxed);

        let Ok(mut shared) = self.shared.lock() else {
            return sink_id;
        };
        if !shared.history.is_empty() {
            let _ = sink.send(PtyEvent::Data(shared.history.clone()));
        }
        shared.clients.insert(sink_id, sink);
        shared.last_activity = Instant::now();
        sink_id
    }

    pub fn detach(&self, sink_id: SinkId) {
        if let Ok(mut shared) = self.shared.lock() {
            shared.clients.remove(&sink_id);
            shared.last_activity = Instant::now();
        }
    }

    pub fn client_count(&self) -> usize {
        self.shared.lock().map(|s| s.clients.len()).unwrap_or(0)
    }

    /// Write client input straight to the PTY.
    pub fn write(&self, bytes: &[u8]) -> io::Result<()> {
        if let Ok(mut shared) = self.shared.lock() {
            shared.last_activity = Instant::now();
        }
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| io::Error::other("pty writer lock poisoned"))?;
        writer.write_all(bytes)?;
        writer.flush()
    }

    /// Resize the PTY; dimensions must be strictly positive.
    pub fn resize(&self, cols: u16, rows: u16) -> io::Result<()> {
        if cols == 0 || rows == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "pty dimensions must be strictly positive",
            ));
        }
        let master = self
            .master
            .lock()
            .map_err(|_| io::Error::other("pty master lock poisoned"))?;
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| io::Error::other(e.to_string()))?;
        if let Ok(mut shared) = self.shared.lock() {
            shared.last_activity = Instant::now();
        }
        Ok(())
    }

    fn touch(&self) {
        if let Ok(mut shared) = self.shared.lock() {
            shared.last_activity = Instant::now();
        }
    }

    /// Append an output chunk to history and fan it out. Dead sinks are
    /// dropped here.
    fn ingest(&self, data: &[u8]) {
        let Ok(mut shared) = self.shared.lock() else {
            return;
        };
        let limit = self.history_limit;
        push_capped(&mut shared.history, data, limit);
        shared.last_activity = Instant::now();
        shared
            .clients
            .retain(|_, sink| sink.send(PtyEvent::Data(data.to_vec())).is_ok());
    }

    /// Deliver the exit notification and drop every sink.
    fn notify_exit(&self) {
        let Ok(mut shared) = self.shared.lock() else {
            return;
        };
        for (_, sink) in shared.clients.drain() {
            let _ = sink.send(PtyEvent::Exit);
        }
    }

    fn should_reap(&self, now: Instant, ttl: Duration, idle: Duration) -> bool {
        let (clients, last_activity) = match self.shared.lock() {
            Ok(shared) => (shared.clients.len(), shared.last_activity),
            Err(_) => return false,
        };
        reap_due(now, self.created_at, last_activity, clients, ttl, idle)
    }

    /// SIGTERM-equivalent termination.
    fn terminate(&self) {
        #[cfg(unix)]
        {
            if let Ok(child) = self.child.lock()
                && let Some(pid) = child.process_id()
            {
                use nix::sys::signal::{Signal, kill};
                use nix::unistd::Pid;
                let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
                return;
            }
        }
        if let Ok(mut child) = self.child.lock() {
            let _ = child.kill();
        }
    }
}

/// FIFO history cap: on overflow, truncate the oldest bytes.
fn push_capped(history: &mut Vec<u8>, data: &[u8], limit: usize) {
    history.extend_from_slice(data);
    if history.len() > limit {
        let excess = history.len() - limit;
        history.drain(..excess);
    }
}

/// Reap when past TTL, or idle with zero clients.
fn reap_due(
    now: Instant,
    created_at: Instant,
    last_activity: Instant,
    clients: usize,
    ttl: Duration,
    idle: Duration,
) -> bool {
    if now.duration_since(created_at) > ttl {
        return true;
    }
    clients == 0 && now.duration_since(last_activity) > idle
}

/// Process-wide registry of live PTY sessions.
#[derive(Clone)]
pub struct PtyRegistry {
    config: Arc<GatewayConfig>,
    inner: Arc<Mutex<HashMap<String, Arc<PtySession>>>>,
}

impl PtyRegistry {
    pub fn new(config: Arc<GatewayConfig>) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Reuse a live session (bumping activity) or spawn a new PTY.
    pub async fn get_or_create(&self, session_id: &str) -> io::Result<Arc<PtySession>> {
        let mut inner = self.inner.lock().await;
        if let Some(session) = inner.get(session_id) {
            session.touch();
            return Ok(session.clone());
        }

        let session = self.spawn_session(session_id)?;
        inner.insert(session_id.to_string(), session.clone());
        drop(inner);

        if let Some(boot_cmd) = self.config.boot_cmd.clone() {
            let session = session.clone();
            tokio::spawn(async move {
                tokio::time::sleep(BOOT_CMD_DELAY).await;
                if let Err(e) = session.write(format!("{boot_cmd}\r").as_bytes()) {
                    warn!(session_id = %session.id, error = %e, "failed to write boot command");
                }
            });
        }

        Ok(session)
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<PtySession>> {
        self.inner.lock().await.get(session_id).cloned()
    }

    pub async fn session_count(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// One reaper pass; exposed separately from [`spawn_reaper`] so tests
    /// can drive it.
    pub async fn sweep(&self) {
        let now = Instant::now();
        let expired: Vec<Arc<PtySession>> = {
            let mut inner = self.inner.lock().await;
            let ids: Vec<String> = inner
                .iter()
                .filter(|(_, s)| {
                    s.should_reap(now, self.config.session_ttl, self.config.idle_timeout)
                })
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter().filter_map(|id| inner.remove(&id)).collect()
        };

        for session in expired {
            info!(session_id = %session.id, "reaping pty session");
            session.terminate();
            session.notify_exit();
        }
    }

    /// Periodic lifecycle sweep.
    pub fn spawn_reaper(&self) -> tokio::task::JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(REAP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                registry.sweep().await;
            }
        })
    }

    /// Terminate every PTY (process teardown).
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<PtySession>> = {
            let mut inner = self.inner.lock().await;
            inner.drain().map(|(_, session)| session).collect()
        };
        for session in sessions {
            session.terminate();
            session.notify_exit();
        }
    }

    fn spawn_session(&self, session_id: &str) -> io::Result<Arc<PtySession>> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: INITIAL_ROWS,
                cols: INITIAL_COLS,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| io::Error::other(e.to_string()))?;

        // Prefer the process muxer (attach-or-create semantics) when it is
        // configured and present; otherwise fall back to the login shell.
        let mut cmd = match &self.config.muxer {
            Some(muxer) if binary_available(muxer) => {
                let mut cmd = CommandBuilder::new(muxer);
                cmd.args(["new-session", "-A", "-s", session_id]);
                cmd
            }
            _ => {
                let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());
                let mut cmd = CommandBuilder::new(shell);
                cmd.arg("-l");
                cmd
            }
        };
        cmd.cwd(&self.config.workdir);
        cmd.env("TERM", "xterm-256color");

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| io::Error::other(e.to_string()))?;
        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| io::Error::other(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| io::Error::other(e.to_string()))?;
        drop(pair.slave);

        info!(session_id, "spawned pty session");

        let session = Arc::new(PtySession {
            id: session_id.to_string(),
            created_at: Instant::now(),
            history_limit: self.config.history_limit,
            shared: StdMutex::new(PtyShared {
                history: Vec::new(),
                clients: HashMap::new(),
                last_activity: Instant::now(),
            }),
            master: StdMutex::new(pair.master),
            writer: StdMutex::new(writer),
            child: StdMutex::new(child),
        });

        // Blocking reader thread bridged into the async world.
        let (tx, mut rx) = mpsc::channel::<ReaderEvent>(256);
        std::thread::spawn(move || {
            let mut reader = reader;
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => {
                        let _ = tx.blocking_send(ReaderEvent::Eof);
                        break;
                    }
                    Ok(n) => {
                        if tx.blocking_send(ReaderEvent::Data(buf[..n].to_vec())).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        std::thread::sleep(Duration::from_millis(10));
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => {
                        debug!(error = %e, "pty reader error");
                        let _ = tx.blocking_send(ReaderEvent::Eof);
                        break;
                    }
                }
            }
        });

        // Distribution task: history + fan-out, then exit cleanup.
        let distribute = session.clone();
        let inner = self.inner.clone();
        let id = session_id.to_string();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    ReaderEvent::Data(data) => distribute.ingest(&data),
                    ReaderEvent::Eof => break,
                }
            }
            info!(session_id = %id, "pty exited");
            distribute.notify_exit();
            inner.lock().await.remove(&id);
        });

        Ok(session)
    }
}

/// Whether a binary resolves to a file (directly or via PATH).
fn binary_available(bin: &str) -> bool {
    let path = Path::new(bin);
    if path.components().count() > 1 {
        return path.is_file();
    }
    let Ok(path_var) = std::env::var("PATH") else {
        return false;
    };
    std::env::split_paths(&path_var).any(|dir| dir.join(bin).is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // ==================== History Cap Tests ====================

    #[test]
    fn test_push_capped_under_limit() {
        let mut history = Vec::new();
        push_capped(&mut history, b"hello", 10);
        assert_eq!(history, b"hello");
    }

    #[test]
    fn test_push_capped_drops_oldest() {
        let mut history = Vec::new();
        push_capped(&mut history, b"0123456789", 10);
        push_capped(&mut history, b"abc", 10);
        assert_eq!(history, b"3456789abc");
    }

    #[test]
    fn test_push_capped_oversize_chunk_keeps_tail() {
        let mut history = Vec::new();
        push_capped(&mut history, b"0123456789abcdef", 8);
        assert_eq!(history, b"89abcdef");
        assert_eq!(history.len(), 8);
    }

    // ==================== Reap Predicate Tests ====================

    #[test]
    fn test_reap_due_ttl() {
        let now = Instant::now();
        let created = now - Duration::from_secs(5 * 60 * 60);
        assert!(reap_due(
            now,
            created,
            now,
            3,
            Duration::from_secs(4 * 60 * 60),
            Duration::from_secs(30 * 60),
        ));
    }

    #[test]
    fn test_reap_due_idle_without_clients() {
        let now = Instant::now();
        let created = now - Duration::from_secs(60);
        let idle_since = now - Duration::from_secs(40 * 60);
        assert!(reap_due(
            now,
            created,
            idle_since,
            0,
            Duration::from_secs(4 * 60 * 60),
            Duration::from_secs(30 * 60),
        ));
    }

    #[test]
    fn test_reap_spared_while_clients_attached() {
        let now = Instant::now();
        let created = now - Duration::from_secs(60);
        let idle_since = now - Duration::from_secs(40 * 60);
        assert!(!reap_due(
            now,
            created,
            idle_since,
            1,
            Duration::from_secs(4 * 60 * 60),
            Duration::from_secs(30 * 60),
        ));
    }

    #[test]
    fn test_reap_spared_when_recently_active() {
        let now = Instant::now();
        let created = now - Duration::from_secs(60);
        assert!(!reap_due(
            now,
            created,
            now,
            0,
            Duration::from_secs(4 * 60 * 60),
            Duration::from_secs(30 * 60),
        ));
    }

    // ==================== Live PTY Tests ====================

    fn test_registry(temp: &TempDir) -> PtyRegistry {
        let config = GatewayConfig {
            root: temp.path().join("gw"),
            workdir: temp.path().to_path_buf(),
            muxer: None,
            ..Default::default()
        };
        PtyRegistry::new(Arc::new(config))
    }

    async fn recv_matching(
        rx: &mut mpsc::UnboundedReceiver<PtyEvent>,
        needle: &[u8],
    ) -> Vec<u8> {
        let mut seen = Vec::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let event = tokio::time::timeout_at(deadline, rx.recv())
                .await
                .expect("timed out waiting for pty output")
                .expect("pty channel closed");
            if let PtyEvent::Data(data) = event {
                seen.extend_from_slice(&data);
                if seen.windows(needle.len()).any(|w| w == needle) {
                    return seen;
                }
            }
        }
    }

    #[tokio::test]
    async fn test_pty_round_trip_and_reuse() {
        let temp = TempDir::new().unwrap();
        let registry = test_registry(&temp);

        let session = match registry.get_or_create("term-1").await {
            Ok(session) => session,
            Err(e) => {
                // PTY allocation is unavailable in some build sandboxes.
                eprintln!("skipping pty test: {e}");
                return;
            }
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = session.attach(tx);

        session.write(b"echo portico-$((40+2))\n").unwrap();
        let seen = recv_matching(&mut rx, b"portico-42").await;
        assert!(!seen.is_empty());

        // get_or_create reuses the same process.
        let again = registry.get_or_create("term-1").await.unwrap();
        assert!(Arc::ptr_eq(&session, &again));
        assert_eq!(registry.session_count().await, 1);

        // A second client gets the history prefix immediately.
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let sink2 = session.attach(tx2);
        let replay = recv_matching(&mut rx2, b"portico-42").await;
        assert!(!replay.is_empty());

        session.detach(sink);
        session.detach(sink2);
        assert_eq!(session.client_count(), 0);

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_resize_rejects_zero_dimensions() {
        let temp = TempDir::new().unwrap();
        let registry = test_registry(&temp);

        let Ok(session) = registry.get_or_create("term-resize").await else {
            eprintln!("skipping pty test: allocation unavailable");
            return;
        };

        assert!(session.resize(0, 40).is_err());
        assert!(session.resize(120, 0).is_err());
        assert!(session.resize(80, 24).is_ok());

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_sweep_removes_idle_sessions() {
        let temp = TempDir::new().unwrap();
        let config = GatewayConfig {
            root: temp.path().join("gw"),
            workdir: temp.path().to_path_buf(),
            muxer: None,
            idle_timeout: Duration::from_millis(0),
            ..Default::default()
        };
        let registry = PtyRegistry::new(Arc::new(config));

        let Ok(_session) = registry.get_or_create("term-idle").await else {
            eprintln!("skipping pty test: allocation unavailable");
            return;
        };
        assert_eq!(registry.session_count().await, 1);

        // Zero idle timeout and no clients: the next sweep reaps it.
        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.sweep().await;
        assert_eq!(registry.session_count().await, 0);
    }
}
