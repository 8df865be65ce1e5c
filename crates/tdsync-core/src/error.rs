use std::io;
use thiserror::Error;

/// Errors produced by the change-notification core.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The request path is malformed or escapes the storage root.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// The target does not exist on disk.
    #[error("not found: {0}")]
    NotFound(String),

    /// The waiting request was cancelled by the client.
    #[error("subscription cancelled")]
    Cancelled,

    /// Failed to start or drive a filesystem watch.
    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
