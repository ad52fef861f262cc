//! DisruptionController — runs every evaluator against one claim view
//! and folds the outcomes into the claim's condition set.

use std::collections::BTreeSet;
use std::time::Duration;

use tracing::{debug, trace};

use fleetgrid_cluster::{ClaimView, epoch_secs};
use fleetgrid_state::lifecycle::{clear_side_condition, set_side_condition};
use fleetgrid_state::{ConditionSet, ConditionUpdate};

use crate::drift::DriftEvaluator;
use crate::emptiness::EmptinessEvaluator;
use crate::error::{DisruptionError, DisruptionResult};
use crate::evaluator::Evaluator;
use crate::occupancy::OccupancyPolicy;

/// Result of reconciling one claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    /// The claim's conditions after applying every evaluation.
    pub conditions: ConditionSet,
    /// Whether `conditions` differs from what the claim carried.
    pub changed: bool,
    /// Earliest requested re-evaluation.
    pub requeue_after: Option<Duration>,
}

pub struct DisruptionController {
    evaluators: Vec<Evaluator>,
}

impl DisruptionController {
    /// Each condition must be owned by exactly one evaluator.
    pub fn new(evaluators: Vec<Evaluator>) -> DisruptionResult<Self> {
        let mut owned = BTreeSet::new();
        for evaluator in &evaluators {
            if !owned.insert(evaluator.condition()) {
                return Err(DisruptionError::DuplicateEvaluator(evaluator.condition()));
            }
        }
        Ok(Self { evaluators })
    }

    /// Emptiness and drift with the given settings.
    pub fn standard(policy: OccupancyPolicy, drift: DriftEvaluator) -> Self {
        Self {
            evaluators: vec![
                Evaluator::Emptiness(EmptinessEvaluator::new(policy)),
                Evaluator::Drift(drift),
            ],
        }
    }

    /// Compute the desired conditions for the claim in `view`.
    ///
    /// Pure: an unchanged view yields `changed == false`.
    pub fn reconcile(&self, view: &ClaimView) -> DisruptionResult<Reconciled> {
        let claim = &view.claim.name;
        let now = epoch_secs(view.observed_at);
        let mut conditions = view.claim.status.conditions.clone();
        let mut changed = false;
        let mut requeue_after: Option<Duration> = None;

        for evaluator in &self.evaluators {
            let condition = evaluator.condition();
            let eval = evaluator.evaluate(view)?;
            debug_assert_eq!(eval.condition, condition);
            let updated = match &eval.update {
                None => false,
                Some(ConditionUpdate::Set {
                    status,
                    reason,
                    message,
                }) => set_side_condition(&mut conditions, condition, *status, reason, message, now)?,
                Some(ConditionUpdate::Clear) => clear_side_condition(&mut conditions, condition)?,
            };
            if updated {
                debug!(%claim, evaluator = evaluator.name(), %condition, update = ?eval.update, "condition changed");
            } else {
                trace!(%claim, evaluator = evaluator.name(), "condition unchanged");
            }
            changed |= updated;
            requeue_after = match (requeue_after, eval.requeue_after) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
        }

        Ok(Reconciled {
            conditions,
            changed,
            requeue_after,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use fleetgrid_state::{ConditionType, Phase};
    use std::sync::Arc;

    fn controller() -> DisruptionController {
        DisruptionController::standard(
            OccupancyPolicy::default(),
            DriftEvaluator::new(Arc::new(crate::drift::TemplateDrift), Duration::from_secs(300)),
        )
    }

    #[test]
    fn reconcile_is_idempotent() {
        let view = view_with(initialized_claim(), Some(pool_after(30)), vec![], false);
        let first = controller().reconcile(&view).unwrap();
        assert!(first.changed);
        assert!(first.conditions.is_true(ConditionType::Empty));

        let mut claim = initialized_claim();
        claim.status.conditions = first.conditions.clone();
        let again = controller()
            .reconcile(&view_with(claim, Some(pool_after(30)), vec![], false))
            .unwrap();
        assert!(!again.changed);
        assert_eq!(again.conditions, first.conditions);
    }

    #[test]
    fn earliest_requeue_wins() {
        let view = view_with(initialized_claim(), Some(pool_after(30)), vec![], true);
        let out = controller().reconcile(&view).unwrap();
        assert_eq!(out.requeue_after, Some(Duration::from_secs(30)));
        assert!(out.conditions.get(ConditionType::Empty).is_none());
    }

    #[test]
    fn terminating_claim_is_untouched() {
        let mut claim = terminating_claim();
        claim.status.conditions = conditions_at(Phase::Terminating);
        let view = view_with(claim, Some(pool_after(30)), vec![], false);
        let out = controller().reconcile(&view).unwrap();
        assert!(!out.changed);
        assert_eq!(out.requeue_after, None);
    }

    #[test]
    fn uninitialized_claim_gets_no_side_conditions() {
        let view = view_with(pending_claim(), Some(pool_after(30)), vec![], false);
        let out = controller().reconcile(&view).unwrap();
        assert!(!out.changed);
        assert!(out.conditions.get(ConditionType::Empty).is_none());
        assert!(out.conditions.get(ConditionType::Drifted).is_none());
    }

    #[test]
    fn each_condition_has_one_owner() {
        let err = DisruptionController::new(vec![
            Evaluator::Emptiness(EmptinessEvaluator::default()),
            Evaluator::Emptiness(EmptinessEvaluator::default()),
        ])
        .err()
        .unwrap();
        assert!(matches!(err, DisruptionError::DuplicateEvaluator(ConditionType::Empty)));

        let only_drift = DisruptionController::new(vec![Evaluator::Drift(DriftEvaluator::default())]).unwrap();
        let out = only_drift
            .reconcile(&view_with(initialized_claim(), Some(pool_after(30)), vec![], false))
            .unwrap();
        assert!(out.conditions.get(ConditionType::Empty).is_none());
    }
}
