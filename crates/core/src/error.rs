//! Error types for the entrasync core crate.

use thiserror::Error;

/// Top-level error type for all entrasync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("Graph API error: {0}")]
    Graph(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience Result alias that defaults to [`SyncError`].
pub type Result<T> = std::result::Result<T, SyncError>;
