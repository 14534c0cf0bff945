use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PicorgError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Import error: {0}")]
    Import(#[from] ImportError),

    #[error("Classification error: {0}")]
    Classification(#[from] ClassificationError),

    #[error("Category error: {0}")]
    Category(#[from] CategoryError),

    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

/// Rejection of an import invocation. Raised before any file is touched.
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Import root does not exist: {0}")]
    RootNotFound(PathBuf),

    #[error("Import root is not a directory: {0}")]
    RootNotDirectory(PathBuf),

    #[error("Failed to resolve import root '{path}': {source}")]
    ResolveRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Extension allowlist is empty")]
    EmptyExtensionAllowlist,

    #[error("Invalid exclude pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Failed to spawn import worker: {0}")]
    SpawnFailed(String),

    #[error("Import workers stopped unexpectedly")]
    WorkersStopped,
}

/// Per-file I/O failure. Recorded against the file, never fatal to a batch.
#[derive(Error, Debug)]
pub enum FileError {
    #[error("Failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to stat '{path}': {source}")]
    Metadata {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Any failed attempt to classify a single image.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClassificationError {
    #[error("Model service unreachable: {0}")]
    Unreachable(String),

    #[error("Model call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Malformed model response: {0}")]
    MalformedResponse(String),

    #[error("Model returned an empty response")]
    EmptyResponse,
}

impl ClassificationError {
    /// Connection-level failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClassificationError::Unreachable(_))
    }
}

#[derive(Error, Debug)]
pub enum CategoryError {
    #[error("Category not found: {0}")]
    NotFound(String),

    #[error("Category already exists: {0}")]
    AlreadyExists(String),

    #[error("Category '{0}' is builtin and cannot be changed")]
    Builtin(String),

    #[error("Invalid category name: {0:?}")]
    InvalidName(String),

    #[error("Image not found: {0}")]
    ImageNotFound(PathBuf),

    /// Reassignment left dangling references. Indicates a bug; the
    /// surrounding transaction is rolled back.
    #[error("Consistency violation for category '{category}': {references} image(s) still reference it")]
    Consistency { category: String, references: u64 },

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

pub type Result<T> = std::result::Result<T, PicorgError>;
