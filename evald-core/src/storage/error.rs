//! Error types for record storage.

use thiserror::Error;

use crate::types::{ExcellentId, RecordId, Status};

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Database error from libSQL.
    #[error("database error: {0}")]
    Database(#[from] libsql::Error),

    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The database file's directory could not be created.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid data in the database.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Record not found.
    #[error("record not found: {0}")]
    RecordNotFound(RecordId),

    /// Only completed records can be marked excellent.
    #[error("record {id} is {status}")]
    NotPromotable { id: RecordId, status: Status },

    /// The record exists but carries no excellent marker.
    #[error("record {0} is not marked excellent")]
    NotExcellent(RecordId),

    /// Excellent marker not found.
    #[error("excellent record not found: {0}")]
    ExcellentNotFound(ExcellentId),
}
