//! Database error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from database operations.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// SQLite error from rusqlite.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error when creating directories or files.
    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A migration failed to apply.
    #[error("Migration failed at version {version}: {reason}")]
    Migration { version: u32, reason: String },

    /// A stored value could not be decoded.
    #[error("Invalid value in column '{column}': {reason}")]
    InvalidRow { column: &'static str, reason: String },

    /// Records still point at a category that was about to be deleted.
    #[error("{references} image(s) still reference category '{category}'")]
    DanglingReferences { category: String, references: u64 },

    /// A listing cursor that was not produced by a previous page.
    #[error("Invalid listing cursor {0}")]
    InvalidCursor(String),

    /// The database lock was poisoned.
    #[error("Database lock poisoned")]
    LockPoisoned,
}
