//! fleetgrid-disruption — decides which machines may be disrupted.
//!
//! Each policy is an `Evaluator` variant that reads a `ClaimView` and
//! produces the desired state of one side condition on the claim:
//!
//! - **Emptiness** sets `Empty` when nothing that would need
//!   rescheduling runs on the machine and it is not nominated.
//! - **Drift** sets `Drifted` when the machine no longer matches its
//!   node pool, as judged by a pluggable `DriftCheck`.
//!
//! `DisruptionController` combines them. Nothing here writes to the
//! record store; the reconciliation driver persists the result.

pub mod controller;
pub mod drift;
pub mod emptiness;
pub mod error;
pub mod evaluator;
pub mod occupancy;

#[cfg(test)]
mod testing;

pub use controller::{DisruptionController, Reconciled};
pub use drift::{DEFAULT_DRIFT_INTERVAL, DriftCheck, DriftEvaluator, TemplateDrift};
pub use emptiness::EmptinessEvaluator;
pub use error::{DisruptionError, DisruptionResult};
pub use evaluator::{Evaluation, Evaluator};
pub use occupancy::{OccupancyPolicy, TerminatingPolicy};
