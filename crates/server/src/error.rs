//! Service error types.

/// Errors raised inside the Publisher, Worker and Sender.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    // Worker failures; every one except CleanupFailed ends the hub's part
    // of a request with FAILED.
    #[error("bad time: {0}")]
    BadTime(String),

    #[error("window too long: {0}")]
    TooLong(String),

    #[error("no data: {0}")]
    NoData(String),

    #[error("hardlink failed: {0}")]
    LinkFailed(String),

    #[error("extraction failed: {0}")]
    ExtractFailed(String),

    #[error("transport failed: {0}")]
    TransportFailed(String),

    #[error("cleanup failed: {0}")]
    CleanupFailed(String),

    // Sender failures.
    #[error("move failed: {0}")]
    MoveFailed(String),

    #[error("archive failed: {0}")]
    ArchiveFailed(String),

    #[error("request {request_id} expired")]
    Expired { request_id: String },

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("channel closed: {0}")]
    Closed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("core error: {0}")]
    Core(#[from] hitspool_core::Error),

    #[error("metadata error: {0}")]
    Metadata(#[from] hitspool_metadata::MetadataError),

    #[error("transport error: {0}")]
    Transport(#[from] hitspool_transport::TransportError),
}

impl ServiceError {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadTime(_) => "bad_time",
            Self::TooLong(_) => "too_long",
            Self::NoData(_) => "no_data",
            Self::LinkFailed(_) => "link_failed",
            Self::ExtractFailed(_) => "extract_failed",
            Self::TransportFailed(_) => "transport_failed",
            Self::CleanupFailed(_) => "cleanup_failed",
            Self::MoveFailed(_) => "move_failed",
            Self::ArchiveFailed(_) => "archive_failed",
            Self::Expired { .. } => "expired",
            Self::BadRequest(_) => "bad_request",
            Self::Closed(_) => "closed",
            Self::Io(_) => "io",
            Self::Core(_) => "core",
            Self::Metadata(_) => "metadata",
            Self::Transport(_) => "transport",
        }
    }
}

/// Result type for service operations.
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;
