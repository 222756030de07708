//! Error types for aleph-ci-store

use thiserror::Error;

/// Errors raised by the artifact store and the compilation cache
#[derive(Error, Debug)]
pub enum StorageError {
    /// The source path of a write matched no file
    #[error("No files found at {path}")]
    NoFilesFound { path: String },

    /// No artifact is published under this name
    #[error("Artifact not found: {name}")]
    NotFound { name: String },

    /// Artifact names are used as directory names and must be plain
    #[error("Invalid artifact name: {name:?}")]
    InvalidName { name: String },

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Metadata (de)serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<tempfile::PersistError> for StorageError {
    fn from(err: tempfile::PersistError) -> Self {
        StorageError::Io(err.error)
    }
}
