//! Emptiness — marks initialized claims whose machine runs nothing
//! that would need to be rescheduled.

use std::time::Duration;

use tracing::debug;

use fleetgrid_cluster::ClaimView;
use fleetgrid_state::ConditionType;

use crate::error::DisruptionResult;
use crate::evaluator::{Evaluation, Gate, gate};
use crate::occupancy::OccupancyPolicy;

/// Reason recorded on `Empty=True`.
pub const REASON_EMPTY: &str = "Empty";

/// Floor for the nomination requeue when the pool's delay is zero.
const MIN_NOMINATION_REQUEUE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Default)]
pub struct EmptinessEvaluator {
    policy: OccupancyPolicy,
}

impl EmptinessEvaluator {
    pub fn new(policy: OccupancyPolicy) -> Self {
        Self { policy }
    }

    pub fn evaluate(&self, view: &ClaimView) -> DisruptionResult<Evaluation> {
        let pool = match gate(view)? {
            Gate::Skip => return Ok(Evaluation::skip(ConditionType::Empty)),
            Gate::Clear => return Ok(Evaluation::clear(ConditionType::Empty)),
            Gate::Proceed(pool) => pool,
        };
        let claim = &view.claim.name;

        let Some(delay) = pool.disruption.consolidate_after.delay() else {
            return Ok(Evaluation::clear(ConditionType::Empty));
        };
        let Some(machine) = &view.machine else {
            return Ok(Evaluation::clear(ConditionType::Empty));
        };

        if view.nominated {
            debug!(%claim, machine = %machine.name, "machine nominated; not empty");
            return Ok(Evaluation::clear(ConditionType::Empty)
                .requeue_after(delay.max(MIN_NOMINATION_REQUEUE)));
        }

        let occupants = view
            .workloads
            .iter()
            .filter(|w| self.policy.counts_as_occupant(w))
            .count();
        if occupants > 0 {
            return Ok(Evaluation::clear(ConditionType::Empty));
        }
        Ok(Evaluation::set_true(ConditionType::Empty, REASON_EMPTY, ""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use fleetgrid_state::{ConditionStatus, ConditionUpdate, ConsolidateAfter, Workload};

    fn empty() -> EmptinessEvaluator {
        EmptinessEvaluator::default()
    }

    fn deleting(name: &str, owner_kind: &str) -> Workload {
        let mut w = workload(name, Some(owner_kind));
        w.deleting = true;
        w
    }

    #[test]
    fn idle_machine_is_empty() {
        let view = view_with(initialized_claim(), Some(pool_after(30)), vec![], false);
        let eval = empty().evaluate(&view).unwrap();
        assert_eq!(
            eval.update,
            Some(ConditionUpdate::set_true(REASON_EMPTY, ""))
        );
        assert_eq!(eval.requeue_after, None);
    }

    #[test]
    fn nominated_machine_is_not_empty_and_requeues() {
        let view = view_with(initialized_claim(), Some(pool_after(30)), vec![], true);
        let eval = empty().evaluate(&view).unwrap();
        assert_eq!(eval.update, Some(ConditionUpdate::Clear));
        assert_eq!(eval.requeue_after, Some(Duration::from_secs(30)));
    }

    #[test]
    fn disabled_delay_clears() {
        let mut pool = pool_after(30);
        pool.disruption.consolidate_after = ConsolidateAfter::Never;
        let mut claim = initialized_claim();
        claim
            .status
            .conditions
            .set_true(ConditionType::Empty, REASON_EMPTY, 1);

        let eval = empty()
            .evaluate(&view_with(claim, Some(pool), vec![], false))
            .unwrap();
        assert_eq!(eval.update, Some(ConditionUpdate::Clear));
        assert_eq!(eval.requeue_after, None);
    }

    #[test]
    fn daemon_only_machine_is_empty() {
        let view = view_with(
            initialized_claim(),
            Some(pool_after(30)),
            vec![workload("agent", Some("DaemonSet"))],
            false,
        );
        let eval = empty().evaluate(&view).unwrap();
        assert_eq!(
            eval.update,
            Some(ConditionUpdate::set_true(REASON_EMPTY, ""))
        );
    }

    #[test]
    fn one_real_workload_clears() {
        let view = view_with(
            initialized_claim(),
            Some(pool_after(30)),
            vec![
                workload("agent", Some("DaemonSet")),
                workload("web-0", Some("ReplicaSet")),
            ],
            false,
        );
        let eval = empty().evaluate(&view).unwrap();
        assert_eq!(eval.update, Some(ConditionUpdate::Clear));
    }

    #[test]
    fn uninitialized_or_missing_inputs_clear() {
        let not_ready = view_with(pending_claim(), Some(pool_after(30)), vec![], false);
        assert_eq!(
            empty().evaluate(&not_ready).unwrap().update,
            Some(ConditionUpdate::Clear)
        );

        let no_pool = view_with(initialized_claim(), None, vec![], false);
        assert_eq!(
            empty().evaluate(&no_pool).unwrap().update,
            Some(ConditionUpdate::Clear)
        );

        let mut no_machine = view_with(initialized_claim(), Some(pool_after(30)), vec![], false);
        no_machine.machine = None;
        assert_eq!(
            empty().evaluate(&no_machine).unwrap().update,
            Some(ConditionUpdate::Clear)
        );
    }

    #[test]
    fn terminating_claim_is_left_alone() {
        let view = view_with(terminating_claim(), Some(pool_after(30)), vec![], false);
        assert_eq!(empty().evaluate(&view).unwrap().update, None);
    }

    #[test]
    fn missing_pool_reference_is_structural() {
        let mut claim = initialized_claim();
        claim.node_pool = None;
        let err = empty()
            .evaluate(&view_with(claim, Some(pool_after(30)), vec![], false))
            .unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn deleting_replica_set_units_do_not_occupy() {
        let view = view_with(
            initialized_claim(),
            Some(pool_after(30)),
            vec![deleting("web-0", "ReplicaSet"), deleting("web-1", "ReplicaSet")],
            false,
        );
        assert_eq!(
            empty().evaluate(&view).unwrap().update,
            Some(ConditionUpdate::set_true(REASON_EMPTY, ""))
        );
    }

    #[test]
    fn deleting_stateful_set_unit_still_occupies() {
        let view = view_with(
            initialized_claim(),
            Some(pool_after(30)),
            vec![deleting("db-0", "StatefulSet")],
            false,
        );
        assert_eq!(
            empty().evaluate(&view).unwrap().update,
            Some(ConditionUpdate::Clear)
        );
    }

    #[test]
    fn deleting_policy_follows_configuration() {
        let policy: OccupancyPolicy = toml::from_str(
            r#"
            terminating_default = "block"
            [terminating_overrides]
            StatefulSet = "ignore"
            "#,
        )
        .unwrap();
        let evaluator = EmptinessEvaluator::new(policy);

        let stateful = view_with(
            initialized_claim(),
            Some(pool_after(30)),
            vec![deleting("db-0", "StatefulSet")],
            false,
        );
        assert_eq!(
            evaluator.evaluate(&stateful).unwrap().update,
            Some(ConditionUpdate::set_true(REASON_EMPTY, ""))
        );

        let replica = view_with(
            initialized_claim(),
            Some(pool_after(30)),
            vec![deleting("web-0", "ReplicaSet")],
            false,
        );
        assert_eq!(
            evaluator.evaluate(&replica).unwrap().update,
            Some(ConditionUpdate::Clear)
        );
    }

    #[test]
    fn lost_initialization_clears_even_when_ready() {
        for status in [ConditionStatus::Unknown, ConditionStatus::False] {
            let mut claim = initialized_claim();
            claim
                .status
                .conditions
                .set_true(ConditionType::Empty, REASON_EMPTY, 1);
            claim
                .status
                .conditions
                .set(ConditionType::Initialized, status, "NotInitialized", "", 2);
            assert!(claim.status.conditions.is_true(ConditionType::Ready));

            let eval = empty()
                .evaluate(&view_with(claim, Some(pool_after(30)), vec![], false))
                .unwrap();
            assert_eq!(eval.update, Some(ConditionUpdate::Clear), "{status:?}");
        }
    }

    #[test]
    fn nominated_machine_with_workloads_is_not_empty() {
        let view = view_with(
            initialized_claim(),
            Some(pool_after(30)),
            vec![
                workload("agent", Some("DaemonSet")),
                deleting("web-0", "ReplicaSet"),
            ],
            true,
        );
        let eval = empty().evaluate(&view).unwrap();
        assert_eq!(eval.update, Some(ConditionUpdate::Clear));
        assert_eq!(eval.requeue_after, Some(Duration::from_secs(30)));
    }
}
