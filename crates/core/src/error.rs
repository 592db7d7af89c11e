//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("bad time: {0}")]
    BadTime(String),

    #[error("bad time range: {0}")]
    TimeRange(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("bad envelope: {0}")]
    BadEnvelope(String),

    #[error("bad hub list: {0}")]
    BadHubList(String),

    #[error("unknown phase: {0}")]
    UnknownPhase(String),

    #[error("bad hit record: {0}")]
    BadRecord(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
