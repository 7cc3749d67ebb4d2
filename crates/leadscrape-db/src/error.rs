//! Database error types.

use thiserror::Error;

/// Errors raised by the storage layer.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// The database file or pool could not be opened.
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("migration failed: {0}")]
    Migration(String),

    /// No row exists for the given key; the message names it.
    #[error("{0}")]
    NotFoundWithMessage(String),

    /// A stored value could not be turned back into its domain type.
    #[error("decode error: {0}")]
    Decode(String),

    /// Input rejected before reaching the database, such as an illegal
    /// status transition or an unknown retry kind.
    #[error("validation error: {0}")]
    Validation(String),

    /// JSON columns (config, summary, checkpoint payloads) failed to encode or decode.
    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Creating the database directory failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for DatabaseError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

/// Result type alias for database operations.
pub type Result<T> = std::result::Result<T, DatabaseError>;
