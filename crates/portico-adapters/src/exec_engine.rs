//! Exec-provider turn engine.
//!
//! Serializes user turns per session into child-process invocations of the
//! exec binary, transcodes its NDJSON stdout into journal events, and
//! exposes cancellation.
//!
//! Journal writes are funneled through one shared writer per session; every
//! append batch holds that writer's lock, so cursors stay contiguous no
//! matter how submit, the running turn, and slash-command replies
//! interleave. `session_meta` updates are live-only: they go out on a
//! broadcast bus consumed by the SSE tailers and are never persisted.

use crate::codex_stream::{ExecItem, ExecStreamEvent, ExecStreamParser, ExecUsage};
use chrono::Utc;
use portico_core::config::{GatewayConfig, GatewayPaths};
use portico_core::context;
use portico_core::error::{GatewayError, Result};
use portico_core::events::{
    ContentBlock, ContentBlockRecord, JournalEvent, MessageEnd, MessageStart, Role, SessionMeta,
    StopReason, UsageSummary,
};
use portico_core::journal::JournalWriter;
use portico_core::sidecar::SessionSidecar;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{Mutex, broadcast, watch};
use uuid::Uuid;

/// Provider name carried in `session_meta`.
const PROVIDER: &str = "exec";

/// Sidecar preview length, in chars.
const PREVIEW_LIMIT: usize = 120;

/// Stderr ring capacity in bytes (drop-oldest).
const STDERR_CAP: usize = 8 * 1024;

/// Stderr preview length surfaced in error finalize, in chars.
const STDERR_PREVIEW_LIMIT: usize = 2000;

/// Grace period between SIGTERM and SIGKILL on cancel.
const KILL_GRACE: Duration = Duration::from_millis(1500);

/// One queued user turn.
#[derive(Debug, Clone)]
pub struct Turn {
    pub prompt: String,
    pub content: String,
    pub image_path: Option<String>,
    pub user_message_id: String,
}

/// Result of a cancel request.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CancelOutcome {
    pub ok: bool,
    pub cancelled: bool,
    pub running: bool,
    pub cleared_queue: bool,
}

#[derive(Default)]
struct SessionTurns {
    queue: VecDeque<Turn>,
    active: bool,
    cancel_requested: bool,
    cancel: Option<watch::Sender<bool>>,
}

#[derive(Default)]
struct EngineInner {
    sessions: HashMap<String, SessionTurns>,
    writers: HashMap<String, Arc<Mutex<JournalWriter>>>,
}

/// Process-wide turn engine for the exec provider.
#[derive(Clone)]
pub struct ExecEngine {
    config: Arc<GatewayConfig>,
    paths: GatewayPaths,
    inner: Arc<Mutex<EngineInner>>,
    meta_tx: broadcast::Sender<SessionMeta>,
}

impl ExecEngine {
    pub fn new(config: Arc<GatewayConfig>) -> Self {
        let paths = config.paths();
        let (meta_tx, _) = broadcast::channel(256);
        Self {
            config,
            paths,
            inner: Arc::new(Mutex::new(EngineInner::default())),
            meta_tx,
        }
    }

    /// Subscribe to live `session_meta` updates (all sessions).
    pub fn subscribe_meta(&self) -> broadcast::Receiver<SessionMeta> {
        self.meta_tx.subscribe()
    }

    /// Whether a turn is currently running for the session.
    pub async fn is_active(&self, session_id: &str) -> bool {
        let inner = self.inner.lock().await;
        inner.sessions.get(session_id).is_some_and(|s| s.active)
    }

    /// Number of queued (not yet started) turns.
    pub async fn queue_length(&self, session_id: &str) -> usize {
        let inner = self.inner.lock().await;
        inner
            .sessions
            .get(session_id)
            .map(|s| s.queue.len())
            .unwrap_or(0)
    }

    /// Snapshot of sessions with a running turn.
    pub async fn active_sessions(&self) -> HashSet<String> {
        let inner = self.inner.lock().await;
        inner
            .sessions
            .iter()
            .filter(|(_, s)| s.active)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Accept a user message: journal it, then queue a turn (or answer a
    /// gateway slash-command inline). Returns the user message id.
    pub async fn submit(
        &self,
        session_id: &str,
        content: &str,
        image_path: Option<String>,
    ) -> Result<String> {
        let journal = self.journal(session_id).await?;

        let mut prompt = content.to_string();
        if let Some(path) = &image_path {
            prompt.push_str(&format!("\n\n[Attached image: {path}]"));
        }

        let user_message_id = Uuid::new_v4().to_string();
        {
            let mut writer = journal.lock().await;
            append_message(
                &mut writer,
                &user_message_id,
                Role::User,
                session_id,
                &prompt,
            )?;
            let cursor = writer.cursor();
            let preview = truncate_chars(content, PREVIEW_LIMIT);
            let now = Utc::now().to_rfc3339();
            writer.commit(move |sc| {
                sc.last_message_at = Some(now);
                sc.last_message_preview = Some(preview);
                sc.message_count = Some(cursor);
            })?;
        }

        if let Some(command) = parse_slash_command(content) {
            {
                let mut writer = journal.lock().await;
                self.handle_slash_command(&mut writer, session_id, command)?;
            }
            self.emit_meta(session_id).await;
            return Ok(user_message_id);
        }

        {
            let mut inner = self.inner.lock().await;
            let state = inner.sessions.entry(session_id.to_string()).or_default();
            state.queue.push_back(Turn {
                prompt,
                content: content.to_string(),
                image_path,
                user_message_id: user_message_id.clone(),
            });
        }
        self.emit_meta(session_id).await;

        let engine = self.clone();
        let id = session_id.to_string();
        tokio::spawn(async move {
            engine.start_next_turn(&id).await;
        });

        Ok(user_message_id)
    }

    /// Cancel the running turn and optionally drop queued ones.
    pub async fn cancel(&self, session_id: &str, clear_queue: bool) -> Result<CancelOutcome> {
        if !self.paths.sidecar(session_id).exists() {
            return Err(GatewayError::SessionNotFound(session_id.to_string()));
        }

        let (running, cancelled, cleared) = {
            let mut inner = self.inner.lock().await;
            let state = inner.sessions.entry(session_id.to_string()).or_default();

            let cleared = if clear_queue {
                let had_queued = !state.queue.is_empty();
                state.queue.clear();
                had_queued
            } else {
                false
            };

            let running = state.active && !state.cancel_requested;
            if running {
                state.cancel_requested = true;
                if let Some(cancel) = &state.cancel {
                    let _ = cancel.send(true);
                }
            }
            (running, running, cleared)
        };

        tracing::info!(session_id, cancelled, cleared, "cancel requested");
        self.emit_meta(session_id).await;

        Ok(CancelOutcome {
            ok: true,
            cancelled,
            running,
            cleared_queue: cleared,
        })
    }

    /// Get or open the session's shared journal writer.
    async fn journal(&self, session_id: &str) -> Result<Arc<Mutex<JournalWriter>>> {
        let mut inner = self.inner.lock().await;
        if let Some(writer) = inner.writers.get(session_id) {
            return Ok(writer.clone());
        }
        let writer = Arc::new(Mutex::new(JournalWriter::open(&self.paths, session_id)?));
        inner
            .writers
            .insert(session_id.to_string(), writer.clone());
        Ok(writer)
    }

    /// Broadcast a live `session_meta` snapshot to attached tailers.
    async fn emit_meta(&self, session_id: &str) {
        let sidecar = SessionSidecar::load(&self.paths.sidecar(session_id)).unwrap_or_default();
        let (is_active, queue_length) = {
            let inner = self.inner.lock().await;
            inner
                .sessions
                .get(session_id)
                .map(|s| (s.active, s.queue.len()))
                .unwrap_or((false, 0))
        };

        let meta = SessionMeta {
            provider: PROVIDER.to_string(),
            session_id: session_id.to_string(),
            cwd: sidecar.cwd,
            model: sidecar.model,
            latest_thread_id: sidecar.latest_thread_id,
            usage: sidecar.usage,
            context_info: sidecar.context_info,
            is_active,
            queue_length,
        };
        let _ = self.meta_tx.send(meta);
    }

    /// Pop the next queued turn if no turn is running, and execute it.
    async fn start_next_turn(&self, session_id: &str) {
        let popped = {
            let mut inner = self.inner.lock().await;
            let Some(state) = inner.sessions.get_mut(session_id) else {
                return;
            };
            if state.active {
                return;
            }
            let Some(turn) = state.queue.pop_front() else {
                return;
            };
            state.active = true;
            state.cancel_requested = false;
            let (cancel_tx, cancel_rx) = watch::channel(false);
            state.cancel = Some(cancel_tx);
            (turn, cancel_rx)
        };
        let (turn, cancel_rx) = popped;

        if let Err(e) = self.run_turn(session_id, turn, cancel_rx).await {
            tracing::error!(session_id, error = %e, "turn failed outside the journal path");
            let mut inner = self.inner.lock().await;
            if let Some(state) = inner.sessions.get_mut(session_id) {
                state.active = false;
                state.cancel = None;
                state.cancel_requested = false;
            }
        }
    }

    async fn run_turn(
        &self,
        session_id: &str,
        turn: Turn,
        mut cancel_rx: watch::Receiver<bool>,
    ) -> Result<()> {
        let journal = self.journal(session_id).await?;
        let sidecar = SessionSidecar::load(&self.paths.sidecar(session_id))?;
        let model = sidecar
            .model
            .clone()
            .or_else(|| self.config.default_model.clone());
        let cwd = if sidecar.cwd.is_empty() {
            self.config.workdir.display().to_string()
        } else {
            sidecar.cwd.clone()
        };

        let mut ctx = TurnCtx::new(Uuid::new_v4().to_string());
        {
            let mut writer = journal.lock().await;
            let start = JournalEvent::MessageStart(MessageStart {
                id: ctx.assistant_id.clone(),
                line_number: writer.next_cursor(),
                role: Role::Assistant,
                timestamp: Utc::now().to_rfc3339(),
                session_id: session_id.to_string(),
            });
            writer.append(&start)?;
        }

        if !binary_available(&self.config.exec_bin) {
            tracing::warn!(session_id, bin = %self.config.exec_bin, "exec binary missing");
            let mut writer = journal.lock().await;
            append_block(
                &mut writer,
                &mut ctx,
                ContentBlock::Text {
                    text: format!("Executable not found: {}", self.config.exec_bin),
                },
            )?;
            drop(writer);
            return self
                .finalize(&journal, session_id, &turn, &mut ctx, StopReason::Error, None, model.as_deref())
                .await;
        }

        let mut command = Command::new(&self.config.exec_bin);
        command
            .arg("-a")
            .arg(&self.config.approval_policy)
            .arg("exec")
            .arg("--json")
            .arg("--skip-git-repo-check")
            .arg("-C")
            .arg(&cwd)
            .arg("--sandbox")
            .arg(&self.config.sandbox_mode);
        if let Some(model) = &model {
            command.arg("--model").arg(model);
        }
        command
            .arg(&turn.prompt)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(session_id, error = %e, "failed to spawn exec child");
                let mut writer = journal.lock().await;
                append_block(
                    &mut writer,
                    &mut ctx,
                    ContentBlock::Text {
                        text: format!("Failed to start {}: {}", self.config.exec_bin, e),
                    },
                )?;
                drop(writer);
                return self
                    .finalize(&journal, session_id, &turn, &mut ctx, StopReason::Error, None, model.as_deref())
                    .await;
            }
        };

        tracing::debug!(session_id, pid = child.id(), "exec child started");

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            let _ = child.start_kill();
            let mut writer = journal.lock().await;
            append_block(
                &mut writer,
                &mut ctx,
                ContentBlock::Text {
                    text: "Failed to capture exec output streams.".to_string(),
                },
            )?;
            drop(writer);
            return self
                .finalize(&journal, session_id, &turn, &mut ctx, StopReason::Error, None, model.as_deref())
                .await;
        };

        let mut stdout_lines = BufReader::new(stdout).lines();
        let mut stderr_lines = BufReader::new(stderr).lines();
        let mut stdout_done = false;
        let mut stderr_done = false;
        let mut cancel_open = true;
        let mut cancelled = *cancel_rx.borrow();

        // Drain stdout to EOF even after a cancel: lines already produced
        // may still be appended (best-effort drain). The kill watchdog
        // bounds how long that can take.
        while !stdout_done {
            tokio::select! {
                line = stdout_lines.next_line() => match line {
                    Ok(Some(line)) => {
                        let mut writer = journal.lock().await;
                        transcode_line(&mut writer, &mut ctx, &line)?;
                    }
                    Ok(None) => stdout_done = true,
                    Err(e) => {
                        tracing::debug!(session_id, error = %e, "stdout read error");
                        stdout_done = true;
                    }
                },
                line = stderr_lines.next_line(), if !stderr_done => match line {
                    Ok(Some(line)) => ctx.stderr.push_line(&line),
                    Ok(None) | Err(_) => stderr_done = true,
                },
                changed = cancel_rx.changed(), if cancel_open && !cancelled => {
                    eprintln!("DEBUG: cancel_rx.changed() fired: {:?}", changed);
                    if changed.is_err() {
                        cancel_open = false;
                    } else if *cancel_rx.borrow_and_update() {
                        eprintln!("DEBUG: calling terminate_child");
                        cancelled = true;
                        terminate_child(&mut child);
                    }
                }
            }
        }

        let wait = tokio::time::timeout(Duration::from_secs(2), child.wait()).await;
        let exit_code = match &wait {
            Ok(Ok(status)) => status.code(),
            _ => None,
        };
        if wait.is_err() {
            let _ = child.start_kill();
        }

        let cancelled = cancelled || *cancel_rx.borrow();
        let stop_reason = if cancelled {
            StopReason::Cancelled
        } else if matches!(&wait, Ok(Ok(status)) if status.success()) {
            StopReason::EndTurn
        } else {
            StopReason::Error
        };

        self.finalize(&journal, session_id, &turn, &mut ctx, stop_reason, exit_code, model.as_deref())
            .await
    }

    /// Close out the current turn: synthetic blocks for error/cancel,
    /// `message_end`, sidecar commit, meta broadcast, queue drain.
    #[allow(clippy::too_many_arguments)]
    fn finalize<'a>(
        &'a self,
        journal: &'a Arc<Mutex<JournalWriter>>,
        session_id: &'a str,
        turn: &'a Turn,
        ctx: &'a mut TurnCtx,
        stop_reason: StopReason,
        exit_code: Option<i32>,
        model: Option<&'a str>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(self.finalize_impl(journal, session_id, turn, ctx, stop_reason, exit_code, model))
    }

    async fn finalize_impl(
        &self,
        journal: &Arc<Mutex<JournalWriter>>,
        session_id: &str,
        turn: &Turn,
        ctx: &mut TurnCtx,
        stop_reason: StopReason,
        exit_code: Option<i32>,
        model: Option<&str>,
    ) -> Result<()> {
        {
            let mut writer = journal.lock().await;

            match stop_reason {
                StopReason::Error => {
                    let stderr_preview = ctx.stderr.preview(STDERR_PREVIEW_LIMIT);
                    if ctx.blocks == 0 {
                        let mut text = match exit_code {
                            Some(code) => format!("Exec process failed (exit code {code})."),
                            None => "Exec process failed.".to_string(),
                        };
                        if !stderr_preview.is_empty() {
                            text.push_str("\n\n");
                            text.push_str(&stderr_preview);
                        }
                        append_block(&mut writer, ctx, ContentBlock::Text { text })?;
                    } else if !stderr_preview.is_empty() {
                        append_block(
                            &mut writer,
                            ctx,
                            ContentBlock::Text {
                                text: stderr_preview,
                            },
                        )?;
                    }
                }
                StopReason::Cancelled => {
                    if ctx.blocks == 0 {
                        append_block(
                            &mut writer,
                            ctx,
                            ContentBlock::Text {
                                text: "Cancelled.".to_string(),
                            },
                        )?;
                    }
                }
                StopReason::EndTurn => {}
            }

            writer.append(&JournalEvent::MessageEnd(MessageEnd {
                id: ctx.assistant_id.clone(),
                stop_reason,
            }))?;

            let usage = ctx.usage.map(UsageSummary::from);
            let info = usage.map(|u| context::context_info(model, u.total_tokens));
            let preview_source = ctx
                .assistant_preview
                .clone()
                .unwrap_or_else(|| turn.content.clone());
            let preview = truncate_chars(&preview_source, PREVIEW_LIMIT);
            let now = Utc::now().to_rfc3339();
            let cursor = writer.cursor();
            let thread_id = ctx.thread_id.clone();
            let model = model.map(String::from);

            writer.commit(move |sc| {
                sc.last_message_at = Some(now);
                sc.last_message_preview = Some(preview);
                sc.message_count = Some(cursor);
                if thread_id.is_some() {
                    sc.latest_thread_id = thread_id;
                }
                if model.is_some() {
                    sc.model = model;
                }
                if usage.is_some() {
                    sc.usage = usage;
                }
                if info.is_some() {
                    sc.context_info = info;
                }
            })?;
        }

        tracing::info!(session_id, ?stop_reason, exit_code, "turn finalized");

        let has_next = {
            let mut inner = self.inner.lock().await;
            let state = inner.sessions.entry(session_id.to_string()).or_default();
            state.active = false;
            state.cancel = None;
            state.cancel_requested = false;
            !state.queue.is_empty()
        };

        self.emit_meta(session_id).await;

        if has_next {
            let engine = self.clone();
            let id = session_id.to_string();
            tokio::spawn(async move {
                engine.start_next_turn(&id).await;
            });
        }

        Ok(())
    }

    /// Answer a gateway slash-command with an assistant message pair,
    /// without spawning a child.
    fn handle_slash_command(
        &self,
        writer: &mut JournalWriter,
        session_id: &str,
        command: SlashCommand,
    ) -> Result<()> {
        let mut set_model = None;
        let reply = match command {
            SlashCommand::ListModels => {
                let sidecar = SessionSidecar::load(&self.paths.sidecar(session_id))?;
                let current = sidecar
                    .model
                    .or_else(|| self.config.default_model.clone())
                    .unwrap_or_else(|| "default".to_string());
                let mut text = String::from("Available models:\n");
                for model in &self.config.model_choices {
                    text.push_str(&format!("- {model}\n"));
                }
                text.push_str(&format!("\nCurrent model: {current}"));
                text
            }
            SlashCommand::SetModel(name) => {
                set_model = Some(name.clone());
                format!("Model set to {name}.")
            }
        };

        let assistant_id = Uuid::new_v4().to_string();
        append_message(writer, &assistant_id, Role::Assistant, session_id, &reply)?;

        let cursor = writer.cursor();
        let preview = truncate_chars(&reply, PREVIEW_LIMIT);
        let now = Utc::now().to_rfc3339();
        writer.commit(move |sc| {
            sc.last_message_at = Some(now);
            sc.last_message_preview = Some(preview);
            sc.message_count = Some(cursor);
            if set_model.is_some() {
                sc.model = set_model;
            }
        })?;
        Ok(())
    }
}

/// Per-turn transcoding state.
struct TurnCtx {
    assistant_id: String,
    blocks: u32,
    assistant_preview: Option<String>,
    thread_id: Option<String>,
    usage: Option<ExecUsage>,
    stderr: StderrRing,
}

impl TurnCtx {
    fn new(assistant_id: String) -> Self {
        Self {
            assistant_id,
            blocks: 0,
            assistant_preview: None,
            thread_id: None,
            usage: None,
            stderr: StderrRing::new(STDERR_CAP),
        }
    }
}

/// Gateway-handled slash commands.
enum SlashCommand {
    ListModels,
    SetModel(String),
}

fn parse_slash_command(content: &str) -> Option<SlashCommand> {
    let trimmed = content.trim();
    if trimmed == "/models" {
        return Some(SlashCommand::ListModels);
    }
    if let Some(rest) = trimmed.strip_prefix("/model ") {
        let name = rest.trim();
        if !name.is_empty() {
            return Some(SlashCommand::SetModel(name.to_string()));
        }
    }
    None
}

/// Journal a full message as start / one text block / end-of-turn.
fn append_message(
    writer: &mut JournalWriter,
    message_id: &str,
    role: Role,
    session_id: &str,
    text: &str,
) -> Result<()> {
    let start = JournalEvent::MessageStart(MessageStart {
        id: message_id.to_string(),
        line_number: writer.next_cursor(),
        role,
        timestamp: Utc::now().to_rfc3339(),
        session_id: session_id.to_string(),
    });
    writer.append(&start)?;
    writer.append(&JournalEvent::ContentBlock(ContentBlockRecord {
        message_id: message_id.to_string(),
        index: 0,
        block: ContentBlock::Text {
            text: text.to_string(),
        },
    }))?;
    writer.append(&JournalEvent::MessageEnd(MessageEnd {
        id: message_id.to_string(),
        stop_reason: StopReason::EndTurn,
    }))?;
    Ok(())
}

fn append_block(writer: &mut JournalWriter, ctx: &mut TurnCtx, block: ContentBlock) -> Result<()> {
    let record = ContentBlockRecord {
        message_id: ctx.assistant_id.clone(),
        index: ctx.blocks,
        block,
    };
    writer.append(&JournalEvent::ContentBlock(record))?;
    ctx.blocks += 1;
    Ok(())
}

/// Map one stdout line into journal events per the transcoding table.
fn transcode_line(writer: &mut JournalWriter, ctx: &mut TurnCtx, line: &str) -> Result<()> {
    let Some(event) = ExecStreamParser::parse_line(line) else {
        return Ok(());
    };

    match event {
        ExecStreamEvent::ThreadStarted { thread_id } => ctx.thread_id = Some(thread_id),
        ExecStreamEvent::TurnCompleted { usage } => ctx.usage = Some(usage),
        ExecStreamEvent::ItemStarted { item } => {
            if let ExecItem::CommandExecution { id, command, .. } = item {
                append_block(
                    writer,
                    ctx,
                    ContentBlock::ToolUse {
                        tool_use_id: id,
                        tool_name: "bash".to_string(),
                        input: serde_json::json!({ "command": command }),
                    },
                )?;
            }
        }
        ExecStreamEvent::ItemCompleted { item } => match item {
            ExecItem::CommandExecution {
                id,
                aggregated_output,
                exit_code,
                ..
            } => {
                let char_count = aggregated_output.chars().count() as u64;
                append_block(
                    writer,
                    ctx,
                    ContentBlock::ToolResult {
                        tool_use_id: id,
                        content: aggregated_output,
                        is_error: exit_code.unwrap_or(0) != 0,
                        char_count,
                    },
                )?;
            }
            ExecItem::AgentMessage { text, .. } => {
                ctx.assistant_preview = Some(text.clone());
                append_block(writer, ctx, ContentBlock::Text { text })?;
            }
            ExecItem::Reasoning { text, .. } => {
                append_block(writer, ctx, ContentBlock::Thinking { thinking: text })?;
            }
            ExecItem::Other => {}
        },
        ExecStreamEvent::Other => {}
    }
    Ok(())
}

/// SIGTERM now, SIGKILL after the grace period if the child is stubborn.
fn terminate_child(child: &mut tokio::process::Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        eprintln!("DEBUG: terminate_child, id={:?}", child.id());
        if let Some(pid) = child.id() {
            let pid = Pid::from_raw(pid as i32);
            let res = kill(pid, Signal::SIGTERM);
            eprintln!("DEBUG: kill result {:?}", res);
            if res.is_ok() {
                tokio::spawn(async move {
                    tokio::time::sleep(KILL_GRACE).await;
                    let _ = kill(pid, Signal::SIGKILL);
                });
                return;
            }
        }
        let _ = child.start_kill();
    }
    #[cfg(not(unix))]
    {
        let _ = child.start_kill();
    }
}

/// Bounded drop-oldest byte ring for child stderr.
struct StderrRing {
    buf: VecDeque<u8>,
    cap: usize,
}

impl StderrRing {
    fn new(cap: usize) -> Self {
        Self {
            buf: VecDeque::new(),
            cap,
        }
    }

    fn push_line(&mut self, line: &str) {
        self.buf.extend(line.as_bytes());
        self.buf.push_back(b'\n');
        while self.buf.len() > self.cap {
            self.buf.pop_front();
        }
    }

    /// Last `max_chars` chars of the accumulated stderr.
    fn preview(&self, max_chars: usize) -> String {
        let bytes: Vec<u8> = self.buf.iter().copied().collect();
        let text = String::from_utf8_lossy(&bytes);
        let text = text.trim();
        let total = text.chars().count();
        if total <= max_chars {
            text.to_string()
        } else {
            text.chars().skip(total - max_chars).collect()
        }
    }
}

/// Truncate to at most `max` chars, without an ellipsis.
fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

/// Whether the exec binary resolves to a file (directly or via PATH).
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
