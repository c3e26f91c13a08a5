//! Error types for weighin-store.

use std::path::PathBuf;

/// Result type for weighin-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in weighin-store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to create database directory.
    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A stored row could not be turned back into a record.
    #[error("Invalid stored record: {0}")]
    InvalidRecord(#[from] weighin_types::ParseError),

    /// The requested secret version does not exist.
    #[error("Secret version not found: {name}/{version}")]
    SecretVersionNotFound { name: String, version: i64 },
}
