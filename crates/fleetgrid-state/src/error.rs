//! Error types for the fleetgrid record store.

use thiserror::Error;

use crate::lifecycle::LifecycleError;
use crate::types::Revision;

/// Result type alias for record store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during record store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("revision conflict on {name}: expected {expected}, found {actual}")]
    Conflict {
        name: String,
        expected: Revision,
        actual: Revision,
    },

    #[error("immutable field: {0}")]
    Immutable(String),

    #[error("node claim {0} has not terminated")]
    NotTerminated(String),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

impl StateError {
    /// Whether retrying against a refreshed read can succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
