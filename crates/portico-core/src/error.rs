//! Gateway error taxonomy.
//!
//! Every boundary-visible failure maps to a stable code so clients can
//! dispatch on it without parsing messages.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Session id does not match the uuid shape.
    #[error("invalid session id: {0}")]
    InvalidSessionId(String),

    /// Sidecar file is absent.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Required `session` query parameter is missing.
    #[error("missing session parameter")]
    MissingSession,

    /// POST body carried no `content`.
    #[error("missing content")]
    MissingContent,

    /// Requested working directory does not exist.
    #[error("working directory does not exist: {0}")]
    InvalidCwd(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GatewayError {
    /// Stable code surfaced in error responses.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::InvalidSessionId(_) => "INVALID_SESSION_ID",
            GatewayError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            GatewayError::MissingSession => "MISSING_SESSION",
            GatewayError::MissingContent => "MISSING_CONTENT",
            GatewayError::InvalidCwd(_) => "INVALID_CWD",
            GatewayError::Io(_) | GatewayError::Json(_) => "INTERNAL",
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
