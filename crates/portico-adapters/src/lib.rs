//! Portico adapters
//!
//! Backend process drivers: the exec-provider turn engine (JSON-line child
//! process per turn) and the PTY session registry (long-lived interactive
//! shells with multi-client fan-out).

pub mod codex_stream;
pub mod exec_engine;
pub mod pty_registry;

pub use exec_engine::{CancelOutcome, ExecEngine};
pub use pty_registry::{PtyEvent, PtyRegistry};
