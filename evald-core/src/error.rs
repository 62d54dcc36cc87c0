//! Error types for evaluation orchestration.

use thiserror::Error;

use crate::storage;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by orchestrator and record store operations.
///
/// Harness failures are not part of this taxonomy: they end up in the
/// failed run and its record, never in the submission result.
#[derive(Debug, Error)]
pub enum Error {
    /// The referenced model, dataset, task or record does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// The request is malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The entity exists but is in the wrong state for the operation.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// No capacity is available right now.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The orchestrator has been shut down.
    #[error("orchestrator is shut down")]
    Shutdown,

    /// Record store failure.
    #[error("storage error: {0}")]
    Storage(#[source] storage::Error),

    /// Registry failure other than a missing entry.
    #[error("registry error: {0}")]
    Registry(#[source] evald_models::Error),
}

impl Error {
    pub(crate) fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

impl From<evald_models::Error> for Error {
    fn from(err: evald_models::Error) -> Self {
        use evald_models::Error as E;
        match err {
            E::ModelNotFound(id) => Self::NotFound { kind: "model", id },
            E::DatasetNotFound(id) => Self::NotFound {
                kind: "dataset",
                id,
            },
            E::InvalidName(name) => Self::InvalidArgument(format!("invalid name: {name}")),
            E::DatasetExists(name) => Self::InvalidState(format!("dataset already exists: {name}")),
            other => Self::Registry(other),
        }
    }
}

impl From<storage::Error> for Error {
    fn from(err: storage::Error) -> Self {
        match err {
            storage::Error::RecordNotFound(id) => Self::not_found("record", id),
            storage::Error::NotExcellent(id) => {
                Self::not_found("excellent record", format!("record {id}"))
            }
            storage::Error::ExcellentNotFound(id) => Self::not_found("excellent record", id),
            storage::Error::NotPromotable { id, status } => Self::InvalidState(format!(
                "record {id} is {status}; only completed records can be promoted"
            )),
            other => Self::Storage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExcellentId, RecordId, Status};

    #[test]
    fn registry_misses_become_not_found() {
        let err: Error = evald_models::Error::DatasetNotFound("ds1".into()).into();
        assert!(matches!(err, Error::NotFound { kind: "dataset", .. }));
        assert_eq!(err.to_string(), "dataset not found: ds1");
    }

    #[test]
    fn duplicate_dataset_is_invalid_state() {
        let err: Error = evald_models::Error::DatasetExists("ds1".into()).into();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[test]
    fn unpromotable_record_is_invalid_state() {
        let err: Error = storage::Error::NotPromotable {
            id: RecordId(3),
            status: Status::Failed,
        }
        .into();
        assert!(matches!(err, Error::InvalidState(msg) if msg.contains("record 3 is failed")));
    }

    #[test]
    fn missing_excellent_markers_are_not_found() {
        let err: Error = storage::Error::NotExcellent(RecordId(4)).into();
        assert_eq!(err.to_string(), "excellent record not found: record 4");

        let err: Error = storage::Error::ExcellentNotFound(ExcellentId(9)).into();
        assert!(matches!(err, Error::NotFound { kind: "excellent record", ref id } if id == "9"));
    }
}
