//! Portico core
//!
//! Append-only session journals, sidecar metadata, session directory and
//! gateway configuration. Everything here is transport-agnostic: the web
//! edge and the process adapters build on these types.

pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod journal;
pub mod sessions;
pub mod sidecar;

pub use config::{GatewayConfig, GatewayPaths};
pub use error::GatewayError;
pub use events::{
    ContentBlock, ContextInfo, JournalEvent, JournalRecord, MessageEnd, MessageStart, Role,
    SessionMeta, StopReason, UsageSummary,
};
pub use journal::JournalWriter;
pub use sidecar::SessionSidecar;
