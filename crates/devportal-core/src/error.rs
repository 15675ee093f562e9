//! Error types for the core library.

use thiserror::Error;

use crate::portal::ClientError;

/// Core library error type.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A configuration-related error.
    #[error("configuration error: {0}")]
    Config(String),

    /// An I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A failure raised by the portal session pipeline.
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;
