//! Journal tailers and SSE fan-out.
//!
//! One tailer per active session watches the journal file, replays history
//! to each attaching client from its `since` cursor, then broadcasts live
//! records in file order. Tailers retire themselves after a bounded period
//! with zero clients by sending a message upward to the manager; they never
//! hold a reference back into it.

use crate::sse::SseFrame;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use portico_adapters::ExecEngine;
use portico_core::config::GatewayPaths;
use portico_core::events::SessionMeta;
use portico_core::journal;
use portico_core::sidecar::SessionSidecar;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast, mpsc, oneshot};
use tracing::{debug, warn};

/// Coalescing window for file-change notifications.
const DEBOUNCE: Duration = Duration::from_millis(100);

/// How long a tailer survives with zero clients.
const IDLE_SHUTDOWN: Duration = Duration::from_secs(60);

/// Cooperative yield cadence during history replay.
const HISTORY_YIELD_EVERY: usize = 200;

/// Upper bound on one replay send; a client this far behind is dead.
const ATTACH_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// A client attaching to a session stream.
pub struct AttachRequest {
    pub since: u64,
    pub limit: usize,
    pub tx: mpsc::Sender<SseFrame>,
}

/// Per-tailer diagnostics.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TailerStats {
    pub session_id: String,
    pub clients: usize,
    pub position: u64,
}

enum TailerCmd {
    Attach(AttachRequest),
    Stats(oneshot::Sender<TailerStats>),
}

/// Spawns, indexes and retires per-session tailers.
#[derive(Clone)]
pub struct TailerManager {
    paths: GatewayPaths,
    engine: ExecEngine,
    heartbeat: Duration,
    idle_shutdown: Duration,
    inner: Arc<Mutex<HashMap<String, mpsc::Sender<TailerCmd>>>>,
    retire_tx: mpsc::UnboundedSender<String>,
}

impl TailerManager {
    pub fn new(paths: GatewayPaths, engine: ExecEngine, heartbeat: Duration) -> Self {
        Self::with_timeouts(paths, engine, heartbeat, IDLE_SHUTDOWN)
    }

    /// Variant with a custom idle-shutdown window (tests shrink it).
    pub fn with_timeouts(
        paths: GatewayPaths,
        engine: ExecEngine,
        heartbeat: Duration,
        idle_shutdown: Duration,
    ) -> Self {
        let inner: Arc<Mutex<HashMap<String, mpsc::Sender<TailerCmd>>>> =
            Arc::new(Mutex::new(HashMap::new()));

        // Retire consumer: tailers ask to be removed, the manager obliges.
        let (retire_tx, mut retire_rx) = mpsc::unbounded_channel::<String>();
        let map = inner.clone();
        tokio::spawn(async move {
            while let Some(session_id) = retire_rx.recv().await {
                map.lock().await.remove(&session_id);
                debug!(session_id, "tailer retired");
            }
        });

        Self {
            paths,
            engine,
            heartbeat,
            idle_shutdown,
            inner,
            retire_tx,
        }
    }

    /// Route an attach to the session's tailer, lazily (re)creating it.
    pub async fn attach(&self, session_id: &str, request: AttachRequest) {
        let mut request = request;
        loop {
            let cmd_tx = {
                let mut inner = self.inner.lock().await;
                match inner.get(session_id) {
                    Some(tx) => tx.clone(),
                    None => {
                        let tx = self.spawn_tailer(session_id);
                        inner.insert(session_id.to_string(), tx.clone());
                        tx
                    }
                }
            };

            match cmd_tx.send(TailerCmd::Attach(request)).await {
                Ok(()) => return,
                Err(mpsc::error::SendError(TailerCmd::Attach(returned))) => {
                    // The tailer retired between lookup and send; drop the
                    // stale entry and retry with a fresh one.
                    request = returned;
                    let mut inner = self.inner.lock().await;
                    if inner
                        .get(session_id)
                        .is_some_and(|tx| tx.same_channel(&cmd_tx))
                    {
                        inner.remove(session_id);
                    }
                }
                Err(_) => return,
            }
        }
    }

    /// Diagnostics for every live tailer.
    pub async fn stats(&self) -> Vec<TailerStats> {
        let senders: Vec<mpsc::Sender<TailerCmd>> =
            self.inner.lock().await.values().cloned().collect();

        let mut out = Vec::new();
        for tx in senders {
            let (reply_tx, reply_rx) = oneshot::channel();
            if tx.send(TailerCmd::Stats(reply_tx)).await.is_ok()
                && let Ok(Ok(stats)) =
                    tokio::time::timeout(Duration::from_secs(1), reply_rx).await
            {
                out.push(stats);
            }
        }
        out
    }

    pub async fn tailer_count(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// Drop every tailer (process teardown); each closes its file watcher
    /// as its command channel closes.
    pub async fn shutdown(&self) {
        self.inner.lock().await.clear();
    }

    fn spawn_tailer(&self, session_id: &str) -> mpsc::Sender<TailerCmd> {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let ctx = TailerCtx {
            session_id: session_id.to_string(),
            journal_path: self.paths.journal(session_id),
            sidecar_path: self.paths.sidecar(session_id),
            events_dir: self.paths.events_dir.clone(),
            engine: self.engine.clone(),
            heartbeat: self.heartbeat,
            idle_shutdown: self.idle_shutdown,
            retire_tx: self.retire_tx.clone(),
        };
        tokio::spawn(run_tailer(ctx, cmd_rx));
        cmd_tx
    }
}

struct TailerCtx {
    session_id: String,
    journal_path: PathBuf,
    sidecar_path: PathBuf,
    events_dir: PathBuf,
    engine: ExecEngine,
    heartbeat: Duration,
    idle_shutdown: Duration,
    retire_tx: mpsc::UnboundedSender<String>,
}

async fn run_tailer(ctx: TailerCtx, mut cmd_rx: mpsc::Receiver<TailerCmd>) {
    // File-change notifications, coalesced by a capacity-1 channel.
    let (fs_tx, mut fs_rx) = mpsc::channel::<()>(1);
    let journal_name = ctx.journal_path.file_name().map(|n| n.to_os_string());
    let _watcher: Option<RecommendedWatcher> = {
        let result = RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| {
                if let Ok(event) = res
                    && matches!(
                        event.kind,
                        notify::EventKind::Modify(_) | notify::EventKind::Create(_)
                    )
                    && event
                        .paths
                        .iter()
                        .any(|p| p.file_name().map(|n| n.to_os_string()) == journal_name)
                {
                    let _ = fs_tx.try_send(());
                }
            },
            notify::Config::default(),
        );
        match result {
            Ok(mut watcher) => match watcher.watch(&ctx.events_dir, RecursiveMode::NonRecursive) {
                Ok(()) => Some(watcher),
                Err(e) => {
                    warn!(session_id = %ctx.session_id, error = %e, "failed to watch journal dir");
                    None
                }
            },
            Err(e) => {
                warn!(session_id = %ctx.session_id, error = %e, "failed to create file watcher");
                None
            }
        }
    };

    let mut clients: HashMap<u64, mpsc::Sender<SseFrame>> = HashMap::new();
    let mut next_client_id: u64 = 0;
    let mut position: u64 = 0;
    let mut meta_rx = ctx.engine.subscribe_meta();
    let mut meta_open = true;

    let mut heartbeat = tokio::time::interval_at(
        tokio::time::Instant::now() + ctx.heartbeat,
        ctx.heartbeat,
    );
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    // Armed whenever there are zero clients; firing retires the tailer.
    let mut idle_deadline = Some(tokio::time::Instant::now() + ctx.idle_shutdown);

    debug!(session_id = %ctx.session_id, "tailer started");

    loop {
        let idle_sleep = async {
            match idle_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(TailerCmd::Attach(request)) => {
                    if let Some(tx) = do_attach(&ctx, request, &mut position).await {
                        clients.insert(next_client_id, tx);
                        next_client_id += 1;
                        idle_deadline = None;
                    }
                }
                Some(TailerCmd::Stats(reply)) => {
                    let _ = reply.send(TailerStats {
                        session_id: ctx.session_id.clone(),
                        clients: clients.len(),
                        position,
                    });
                }
                None => break, // manager shut down
            },

            _ = fs_rx.recv() => {
                // Stability window: bursts of appends coalesce into one read.
                tokio::time::sleep(DEBOUNCE).await;
                while fs_rx.try_recv().is_ok() {}
                position = broadcast_new(&ctx, position, &mut clients);
                if clients.is_empty() && idle_deadline.is_none() {
                    idle_deadline = Some(tokio::time::Instant::now() + ctx.idle_shutdown);
                }
            },

            meta = meta_rx.recv(), if meta_open => match meta {
                Ok(meta) if meta.session_id == ctx.session_id => {
                    let frame = SseFrame::new(
                        "session_meta",
                        serde_json::to_value(&meta).unwrap_or_default(),
                    );
                    broadcast_frame(&mut clients, &frame);
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(session_id = %ctx.session_id, skipped, "meta bus lagged");
                }
                Err(broadcast::error::RecvError::Closed) => meta_open = false,
            },

            _ = heartbeat.tick() => {
                broadcast_frame(&mut clients, &SseFrame::heartbeat());
                if clients.is_empty() && idle_deadline.is_none() {
                    idle_deadline = Some(tokio::time::Instant::now() + ctx.idle_shutdown);
                }
            },

            _ = idle_sleep => {
                // An attach may have raced the timer through the queue.
                let mut raced = false;
                while let Ok(cmd) = cmd_rx.try_recv() {
                    if let TailerCmd::Attach(request) = cmd
                        && let Some(tx) = do_attach(&ctx, request, &mut position).await
                    {
                        clients.insert(next_client_id, tx);
                        next_client_id += 1;
                        raced = true;
                    }
                }
                if !raced && clients.is_empty() {
                    let _ = ctx.retire_tx.send(ctx.session_id.clone());
                    break;
                }
                idle_deadline = if clients.is_empty() {
                    Some(tokio::time::Instant::now() + ctx.idle_shutdown)
                } else {
                    None
                };
            },
        }
    }

    debug!(session_id = %ctx.session_id, "tailer stopped");
}

/// Attach protocol: annotated `session_meta`, `history_start`, replay of
/// records past `since` (bounded by `limit`, yielding every
/// `HISTORY_YIELD_EVERY`), `history_end`, then membership in the broadcast
/// set. Returns `None` when the client dies mid-replay.
async fn do_attach(
    ctx: &TailerCtx,
    request: AttachRequest,
    position: &mut u64,
) -> Option<mpsc::Sender<SseFrame>> {
    let AttachRequest { since, limit, tx } = request;

    let sidecar = SessionSidecar::load(&ctx.sidecar_path).unwrap_or_default();
    let meta = SessionMeta {
        provider: "exec".to_string(),
        session_id: ctx.session_id.clone(),
        cwd: sidecar.cwd.clone(),
        model: sidecar.model.clone(),
        latest_thread_id: sidecar.latest_thread_id.clone(),
        usage: sidecar.usage,
        context_info: sidecar.context_info,
        is_active: ctx.engine.is_active(&ctx.session_id).await,
        queue_length: ctx.engine.queue_length(&ctx.session_id).await,
    };
    let meta_frame = SseFrame {
        id: sidecar.last_cursor.map(|c| c.to_string()),
        event: "session_meta".to_string(),
        data: serde_json::to_value(&meta).unwrap_or_default(),
    };
    send_frame(&tx, meta_frame).await?;
    send_frame(&tx, SseFrame::history_start(since)).await?;

    let (records, end_position) = match journal::read_from(&ctx.journal_path, 0) {
        Ok(result) => result,
        Err(e) => {
            warn!(session_id = %ctx.session_id, error = %e, "history read failed");
            (Vec::new(), *position)
        }
    };

    let mut count = 0usize;
    for record in &records {
        if count >= limit {
            break;
        }
        let Some(cursor) = record.cursor() else {
            continue;
        };
        if cursor <= since {
            continue;
        }
        send_frame(&tx, SseFrame::from_record(record)).await?;
        count += 1;
        if count % HISTORY_YIELD_EVERY == 0 {
            tokio::task::yield_now().await;
        }
    }

    send_frame(&tx, SseFrame::history_end(count)).await?;

    *position = (*position).max(end_position);
    Some(tx)
}

/// Bounded send to one client; `None` means the client is gone or hopelessly
/// behind.
async fn send_frame(tx: &mpsc::Sender<SseFrame>, frame: SseFrame) -> Option<()> {
    match tokio::time::timeout(ATTACH_SEND_TIMEOUT, tx.send(frame)).await {
        Ok(Ok(())) => Some(()),
        _ => None,
    }
}

/// Read from the stored position and fan new records out in file order.
fn broadcast_new(
    ctx: &TailerCtx,
    position: u64,
    clients: &mut HashMap<u64, mpsc::Sender<SseFrame>>,
) -> u64 {
    let (records, new_position) = match journal::read_from(&ctx.journal_path, position) {
        Ok(result) => result,
        Err(e) => {
            warn!(session_id = %ctx.session_id, error = %e, "live read failed");
            return position;
        }
    };
    for record in &records {
        broadcast_frame(clients, &SseFrame::from_record(record));
    }
    new_position
}

/// Deliver to every client; a failed or backed-up client is dropped and the
/// rest are unaffected.
fn broadcast_frame(clients: &mut HashMap<u64, mpsc::Sender<SseFrame>>, frame: &SseFrame) {
    clients.retain(|_, tx| tx.try_send(frame.clone()).is_ok());
}
