//! The evaluator capability shared by every disruption policy.
//!
//! An evaluator is a pure function of a `ClaimView`: the same view
//! always yields the same `Evaluation`. It never writes anything; the
//! controller applies the outcome to the claim's conditions.

use std::time::Duration;

use fleetgrid_cluster::ClaimView;
use fleetgrid_state::{ConditionType, ConditionUpdate, NodePool};

use crate::drift::DriftEvaluator;
use crate::emptiness::EmptinessEvaluator;
use crate::error::{DisruptionError, DisruptionResult};

/// Outcome of evaluating one condition on one claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub condition: ConditionType,
    /// `None` leaves the condition untouched.
    pub update: Option<ConditionUpdate>,
    /// Evaluate again after this long even if nothing changes.
    pub requeue_after: Option<Duration>,
}

impl Evaluation {
    pub fn skip(condition: ConditionType) -> Self {
        Self {
            condition,
            update: None,
            requeue_after: None,
        }
    }

    pub fn clear(condition: ConditionType) -> Self {
        Self {
            condition,
            update: Some(ConditionUpdate::Clear),
            requeue_after: None,
        }
    }

    pub fn set_true(condition: ConditionType, reason: &str, message: &str) -> Self {
        Self {
            condition,
            update: Some(ConditionUpdate::set_true(reason, message)),
            requeue_after: None,
        }
    }

    pub fn requeue_after(mut self, delay: Duration) -> Self {
        self.requeue_after = Some(delay);
        self
    }
}

/// Disruption policies, each owning one side condition.
pub enum Evaluator {
    Emptiness(EmptinessEvaluator),
    Drift(DriftEvaluator),
}

impl Evaluator {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Emptiness(_) => "emptiness",
            Self::Drift(_) => "drift",
        }
    }

    pub fn condition(&self) -> ConditionType {
        match self {
            Self::Emptiness(_) => ConditionType::Empty,
            Self::Drift(_) => ConditionType::Drifted,
        }
    }

    pub fn evaluate(&self, view: &ClaimView) -> DisruptionResult<Evaluation> {
        match self {
            Self::Emptiness(e) => e.evaluate(view),
            Self::Drift(d) => d.evaluate(view),
        }
    }
}

/// Preconditions common to every evaluator.
pub(crate) enum Gate<'a> {
    /// The claim is terminating; its conditions are frozen.
    Skip,
    /// The condition cannot hold right now.
    Clear,
    Proceed(&'a NodePool),
}

pub(crate) fn gate(view: &ClaimView) -> DisruptionResult<Gate<'_>> {
    let claim = &view.claim;
    if claim.is_terminating() {
        return Ok(Gate::Skip);
    }
    if claim.node_pool.is_none() {
        return Err(DisruptionError::MissingNodePool {
            claim: claim.name.clone(),
        });
    }
    if !claim.is_initialized() {
        return Ok(Gate::Clear);
    }
    // A pool that has not reached the cache yet is not an error; its
    // arrival re-triggers the claim.
    match view.node_pool.as_deref() {
        Some(pool) => Ok(Gate::Proceed(pool)),
        None => Ok(Gate::Clear),
    }
}
