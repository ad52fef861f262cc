//! Error types for the reconciliation driver.

use thiserror::Error;

use fleetgrid_disruption::DisruptionError;
use fleetgrid_state::StateError;

pub type ControllerResult<T> = Result<T, ControllerError>;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Disruption(#[from] DisruptionError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("condition write for {claim} still conflicting after {attempts} attempts")]
    ConflictRetriesExhausted { claim: String, attempts: u32 },

    #[error("ingestion queue is full")]
    QueueFull,

    #[error("ingestion queue is closed")]
    QueueClosed,
}

impl ControllerError {
    /// Transient failures are retried quietly; the rest are surfaced
    /// once they persist.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Disruption(e) => e.is_transient(),
            Self::State(e) => e.is_conflict() || matches!(e, StateError::NotFound(_)),
            Self::ConflictRetriesExhausted { .. } | Self::QueueFull => true,
            Self::QueueClosed => false,
        }
    }
}
