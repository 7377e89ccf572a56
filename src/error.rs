//! Error types for Posture Flux

use thiserror::Error;

use crate::types::SessionId;

/// Errors surfaced by the scoring engine and the session aggregator
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid sample: {0}")]
    InvalidSample(String),

    #[error("Session {0} is closed")]
    SessionClosed(SessionId),

    #[error("Session not found: {0}")]
    NotFound(SessionId),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Stable machine-readable code for transports that need to map outcomes
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidSample(_) => "invalid_sample",
            EngineError::SessionClosed(_) => "session_closed",
            EngineError::NotFound(_) => "not_found",
            EngineError::InvalidConfig(_) => "invalid_config",
            EngineError::Json(_) => "json_error",
            EngineError::Io(_) => "io_error",
            EngineError::Store(_) => "store_error",
        }
    }
}

/// Errors raised by a session store backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Backend failure: {0}")]
    Backend(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Unknown session: {0}")]
    UnknownSession(SessionId),
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}
