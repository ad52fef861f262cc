//! Drift — marks claims whose machine no longer matches its node pool.
//!
//! The comparison itself is pluggable through `DriftCheck`; the
//! evaluator only handles the shared preconditions and the cadence.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use fleetgrid_cluster::ClaimView;
use fleetgrid_state::{ConditionType, Machine, NodeClaim, NodePool};

use crate::error::DisruptionResult;
use crate::evaluator::{Evaluation, Gate, gate};

pub const REASON_NODE_POOL_DRIFTED: &str = "NodePoolDrifted";
pub const REASON_REQUIREMENTS_DRIFTED: &str = "RequirementsDrifted";

/// Default re-evaluation period for drift.
pub const DEFAULT_DRIFT_INTERVAL: Duration = Duration::from_secs(300);

/// Decides whether a claim has drifted from its pool.
pub trait DriftCheck: Send + Sync {
    /// `Some(reason)` when drifted.
    fn check(&self, claim: &NodeClaim, pool: &NodePool, machine: Option<&Machine>) -> Option<String>;
}

/// Template hash comparison followed by requirement matching.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateDrift;

impl DriftCheck for TemplateDrift {
    fn check(&self, claim: &NodeClaim, pool: &NodePool, machine: Option<&Machine>) -> Option<String> {
        // Claims created before hashing was recorded cannot drift statically.
        if let Some(stamped) = &claim.template_hash
            && *stamped != pool.template_hash()
        {
            return Some(REASON_NODE_POOL_DRIFTED.to_string());
        }
        let machine = machine?;
        pool.template
            .requirements
            .iter()
            .any(|r| !r.matches(&machine.labels))
            .then(|| REASON_REQUIREMENTS_DRIFTED.to_string())
    }
}

#[derive(Clone)]
pub struct DriftEvaluator {
    check: Arc<dyn DriftCheck>,
    interval: Duration,
}

impl Default for DriftEvaluator {
    fn default() -> Self {
        Self::new(Arc::new(TemplateDrift), DEFAULT_DRIFT_INTERVAL)
    }
}

impl DriftEvaluator {
    pub fn new(check: Arc<dyn DriftCheck>, interval: Duration) -> Self {
        Self { check, interval }
    }

    pub fn evaluate(&self, view: &ClaimView) -> DisruptionResult<Evaluation> {
        let pool = match gate(view)? {
            Gate::Skip => return Ok(Evaluation::skip(ConditionType::Drifted)),
            Gate::Clear => return Ok(Evaluation::clear(ConditionType::Drifted)),
            Gate::Proceed(pool) => pool,
        };

        // A reserved machine is about to receive work; it is not disruptable.
        if view.nominated {
            debug!(claim = %view.claim.name, "machine nominated; drift deferred");
            return Ok(Evaluation::clear(ConditionType::Drifted).requeue_after(self.interval));
        }

        let eval = match self.check.check(&view.claim, pool, view.machine.as_deref()) {
            Some(reason) => {
                debug!(claim = %view.claim.name, pool = %pool.name, %reason, "claim drifted");
                Evaluation::set_true(ConditionType::Drifted, &reason, "")
            }
            None => Evaluation::clear(ConditionType::Drifted),
        };
        Ok(eval.requeue_after(self.interval))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use fleetgrid_state::{ConditionUpdate, Operator, Requirement};

    fn drift() -> DriftEvaluator {
        DriftEvaluator::new(Arc::new(TemplateDrift), Duration::from_secs(60))
    }

    #[test]
    fn unchanged_pool_is_not_drifted() {
        let view = view_with(initialized_claim(), Some(pool_after(30)), vec![], false);
        let eval = drift().evaluate(&view).unwrap();
        assert_eq!(eval.update, Some(ConditionUpdate::Clear));
        assert_eq!(eval.requeue_after, Some(Duration::from_secs(60)));
    }

    #[test]
    fn template_change_is_drift() {
        let mut pool = pool_after(30);
        pool.template
            .labels
            .insert("team".to_string(), "edge".to_string());

        let eval = drift()
            .evaluate(&view_with(initialized_claim(), Some(pool), vec![], false))
            .unwrap();
        assert_eq!(
            eval.update,
            Some(ConditionUpdate::set_true(REASON_NODE_POOL_DRIFTED, ""))
        );
    }

    #[test]
    fn disruption_settings_do_not_drift() {
        let mut pool = pool_after(30);
        pool.disruption.consolidate_after = fleetgrid_state::ConsolidateAfter::Never;

        let mut claim = initialized_claim();
        claim.template_hash = Some(pool.template_hash());
        let eval = drift()
            .evaluate(&view_with(claim, Some(pool), vec![], false))
            .unwrap();
        assert_eq!(eval.update, Some(ConditionUpdate::Clear));
    }

    #[test]
    fn unmet_requirement_is_drift() {
        let mut pool = pool_after(30);
        pool.template.requirements.push(Requirement {
            key: "zone".to_string(),
            operator: Operator::In,
            values: vec!["a".to_string()],
        });
        let mut claim = initialized_claim();
        claim.template_hash = Some(pool.template_hash());

        let eval = drift()
            .evaluate(&view_with(claim, Some(pool), vec![], false))
            .unwrap();
        assert_eq!(
            eval.update,
            Some(ConditionUpdate::set_true(REASON_REQUIREMENTS_DRIFTED, ""))
        );
    }

    #[test]
    fn custom_check_is_used() {
        struct Always;
        impl DriftCheck for Always {
            fn check(&self, _: &NodeClaim, _: &NodePool, _: Option<&Machine>) -> Option<String> {
                Some("ImageDrifted".to_string())
            }
        }

        let evaluator = DriftEvaluator::new(Arc::new(Always), Duration::from_secs(10));
        let view = view_with(initialized_claim(), Some(pool_after(30)), vec![], false);
        assert_eq!(
            evaluator.evaluate(&view).unwrap().update,
            Some(ConditionUpdate::set_true("ImageDrifted", ""))
        );

        let frozen = view_with(terminating_claim(), Some(pool_after(30)), vec![], false);
        let eval = evaluator.evaluate(&frozen).unwrap();
        assert_eq!(eval.update, None);
        assert_eq!(eval.requeue_after, None);
    }

    #[test]
    fn nominated_machine_is_not_marked_drifted() {
        let mut pool = pool_after(30);
        pool.template
            .labels
            .insert("team".to_string(), "edge".to_string());
        let mut claim = initialized_claim();
        claim.status.conditions.set_true(
            ConditionType::Drifted,
            REASON_NODE_POOL_DRIFTED,
            1,
        );

        let eval = drift()
            .evaluate(&view_with(claim, Some(pool), vec![], true))
            .unwrap();
        assert_eq!(eval.update, Some(ConditionUpdate::Clear));
        assert_eq!(eval.requeue_after, Some(Duration::from_secs(60)));
    }
}
