//! Crate-level error type for server-side operations.

use thiserror::Error;

/// Errors raised by the store, the chat service and configuration loading.
#[derive(Debug, Error)]
pub enum TextifyError {
    /// A required field was missing or blank. Rejected before any side effect.
    #[error("{0}")]
    Validation(String),
    /// The referenced room does not exist.
    #[error("{0}")]
    NotFound(String),
    /// A unique constraint would be violated (duplicate room code).
    #[error("{0}")]
    Conflict(String),
    #[error("storage error: {0}")]
    Store(#[from] rusqlite::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TextifyError {
    /// HTTP status code this error is reported with.
    pub fn status_code(&self) -> u16 {
        match self {
            TextifyError::Validation(_) | TextifyError::Conflict(_) => 400,
            TextifyError::NotFound(_) => 404,
            TextifyError::Store(_) | TextifyError::Config(_) | TextifyError::Io(_) => 500,
        }
    }

    /// Whether the message is safe to show to API callers verbatim.
    pub fn is_client_error(&self) -> bool {
        self.status_code() < 500
    }
}

pub type Result<T> = std::result::Result<T, TextifyError>;
