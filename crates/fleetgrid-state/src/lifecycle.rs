//! Node claim lifecycle tracking.
//!
//! The primary lifecycle is strictly ordered:
//!
//! ```text
//! Pending → Launched → Registered → Initialized → Ready → Terminating → Terminated
//! ```
//!
//! Each phase past `Pending` is a status condition set to `True`; the
//! current phase is the furthest one that is true. `Terminating` may be
//! entered from any phase. Once termination has begun the claim is
//! frozen: the only permitted change is `Terminating → Terminated`.
//!
//! `Drifted` and `Empty` are side conditions. They can be attached once
//! `Initialized` is true, removed at any point before termination, and
//! never move the primary lifecycle.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::conditions::{ConditionSet, ConditionStatus, ConditionType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Phase {
    Pending,
    Launched,
    Registered,
    Initialized,
    Ready,
    Terminating,
    Terminated,
}

impl Phase {
    const ORDER: [Phase; 7] = [
        Phase::Pending,
        Phase::Launched,
        Phase::Registered,
        Phase::Initialized,
        Phase::Ready,
        Phase::Terminating,
        Phase::Terminated,
    ];

    /// Condition that marks this phase, if any.
    pub fn condition(self) -> Option<ConditionType> {
        match self {
            Phase::Pending => None,
            Phase::Launched => Some(ConditionType::Launched),
            Phase::Registered => Some(ConditionType::Registered),
            Phase::Initialized => Some(ConditionType::Initialized),
            Phase::Ready => Some(ConditionType::Ready),
            Phase::Terminating => Some(ConditionType::Terminating),
            Phase::Terminated => Some(ConditionType::Terminated),
        }
    }

    /// The next phase on the happy path.
    pub fn next(self) -> Option<Phase> {
        let idx = Self::ORDER.iter().position(|p| *p == self)?;
        Self::ORDER.get(idx + 1).copied()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("claim is {current:?}; no further changes permitted")]
    Frozen { current: Phase },

    #[error("cannot move from {current:?} to {requested:?}")]
    OutOfOrder { current: Phase, requested: Phase },

    #[error("{0} is not a side condition")]
    NotSideCondition(ConditionType),

    #[error("{0} requires the claim to be initialized")]
    NotInitialized(ConditionType),
}

/// Current phase: the furthest primary condition that is true.
pub fn phase(conditions: &ConditionSet) -> Phase {
    Phase::ORDER
        .iter()
        .rev()
        .copied()
        .find(|p| p.condition().is_some_and(|c| conditions.is_true(c)))
        .unwrap_or(Phase::Pending)
}

/// Move a claim to `requested`. Returns whether anything changed.
///
/// Re-requesting the current phase is a no-op.
pub fn advance(
    conditions: &mut ConditionSet,
    requested: Phase,
    now: u64,
) -> Result<bool, LifecycleError> {
    let current = phase(conditions);
    if requested == current {
        return Ok(false);
    }

    let allowed = match current {
        Phase::Terminated => false,
        Phase::Terminating => requested == Phase::Terminated,
        _ => requested == Phase::Terminating || current.next() == Some(requested),
    };
    if !allowed {
        debug!(?current, ?requested, "rejected lifecycle transition");
        return Err(if current >= Phase::Terminating {
            LifecycleError::Frozen { current }
        } else {
            LifecycleError::OutOfOrder { current, requested }
        });
    }

    let Some(condition) = requested.condition() else {
        return Err(LifecycleError::OutOfOrder { current, requested });
    };
    conditions.set_true(condition, &format!("{requested:?}"), now);
    Ok(true)
}

fn ensure_side_condition(condition_type: ConditionType) -> Result<(), LifecycleError> {
    match condition_type {
        ConditionType::Drifted | ConditionType::Empty => Ok(()),
        other => Err(LifecycleError::NotSideCondition(other)),
    }
}

fn ensure_mutable(conditions: &ConditionSet) -> Result<(), LifecycleError> {
    let current = phase(conditions);
    if current >= Phase::Terminating {
        debug!(?current, "rejected change to terminating claim");
        return Err(LifecycleError::Frozen { current });
    }
    Ok(())
}

/// Attach (or update) a side condition on an initialized claim.
pub fn set_side_condition(
    conditions: &mut ConditionSet,
    condition_type: ConditionType,
    status: ConditionStatus,
    reason: &str,
    message: &str,
    now: u64,
) -> Result<bool, LifecycleError> {
    ensure_side_condition(condition_type)?;
    ensure_mutable(conditions)?;
    if !conditions.is_true(ConditionType::Initialized) {
        return Err(LifecycleError::NotInitialized(condition_type));
    }
    Ok(conditions.set(condition_type, status, reason, message, now))
}

/// Remove a side condition. Allowed at any point before termination.
pub fn clear_side_condition(
    conditions: &mut ConditionSet,
    condition_type: ConditionType,
) -> Result<bool, LifecycleError> {
    ensure_side_condition(condition_type)?;
    ensure_mutable(conditions)?;
    Ok(conditions.clear(condition_type))
}
