//! Error types for tether-core

use thiserror::Error;

use crate::remote::RemoteError;

/// Result type alias using tether-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tether-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Row not found in local storage
    #[error("Row not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid table schema descriptor
    #[error("Invalid schema: {0}")]
    Schema(String),

    /// A value could not be converted between its domain and storage form
    #[error("Cannot convert column `{column}`: {message}")]
    Codec { column: String, message: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote API error
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// A tracked background task panicked or was aborted
    #[error("Background task failed: {0}")]
    Task(String),
}

impl Error {
    pub(crate) fn codec(column: &str, message: impl Into<String>) -> Self {
        Self::Codec {
            column: column.to_string(),
            message: message.into(),
        }
    }

    /// Whether this error came from the remote side (and is therefore retryable)
    pub const fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }
}
