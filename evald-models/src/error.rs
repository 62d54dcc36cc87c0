//! Error types for the model and dataset registry.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during registry operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Model not found in the catalog.
    #[error("model not found: {0}")]
    ModelNotFound(String),

    /// Dataset not found in the catalog.
    #[error("dataset not found: {0}")]
    DatasetNotFound(String),

    /// A dataset with this name is already registered.
    #[error("dataset already exists: {0}")]
    DatasetExists(String),

    /// Name cannot be used as a directory entry.
    #[error("invalid name: {0}")]
    InvalidName(String),

    /// The models or datasets directory could not be read.
    #[error("failed to scan {path}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The scanning task panicked or was cancelled.
    #[error("scan aborted: {0}")]
    ScanAborted(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
