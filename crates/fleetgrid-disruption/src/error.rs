//! Error types for disruption evaluation.

use thiserror::Error;

use fleetgrid_state::{ConditionType, LifecycleError, StateError};

pub type DisruptionResult<T> = Result<T, DisruptionError>;

#[derive(Debug, Error)]
pub enum DisruptionError {
    /// The claim lacks a reference every claim must carry.
    #[error("node claim {claim} has no node pool reference")]
    MissingNodePool { claim: String },

    #[error("more than one evaluator owns the {0} condition")]
    DuplicateEvaluator(ConditionType),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    State(#[from] StateError),
}

impl DisruptionError {
    /// Whether the failure is expected to clear up on its own.
    ///
    /// Structural failures are still retried, but with backoff and
    /// surfaced once they persist.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::State(e) => e.is_conflict() || matches!(e, StateError::NotFound(_)),
            Self::MissingNodePool { .. } | Self::DuplicateEvaluator(_) | Self::Lifecycle(_) => false,
        }
    }
}
