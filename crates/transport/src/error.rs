//! Transport error types.

use thiserror::Error;

/// File transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{backend} exited with status {status}; {} file(s) not delivered", .failed.len())]
    Failed {
        backend: &'static str,
        status: i32,
        failed: Vec<String>,
    },

    #[error("invalid destination: {0}")]
    InvalidDestination(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl TransportError {
    /// Files the backend reported as not delivered, if known.
    pub fn failed_files(&self) -> &[String] {
        match self {
            Self::Failed { failed, .. } => failed,
            _ => &[],
        }
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;
