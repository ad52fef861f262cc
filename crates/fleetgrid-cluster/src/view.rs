//! Immutable read views over the cluster state.
//!
//! Views hold `Arc`s to committed objects, so they stay coherent after
//! the lock is released even if the cache moves on.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::SystemTime;

use serde::Serialize;

use fleetgrid_state::{Machine, NodeClaim, NodePool, Revision, Workload};

use crate::nomination::Nomination;

/// Everything an evaluator needs to decide one claim, read atomically.
#[derive(Debug, Clone)]
pub struct ClaimView {
    pub claim: Arc<NodeClaim>,
    /// `None` when the referenced pool is not (yet) in the cache.
    pub node_pool: Option<Arc<NodePool>>,
    /// The machine the claim is bound to, if it is known.
    pub machine: Option<Arc<Machine>>,
    /// Units bound to `machine`.
    pub workloads: Vec<Arc<Workload>>,
    pub nominated: bool,
    pub observed_at: SystemTime,
}

/// Point-in-time copy of the whole cache.
#[derive(Debug, Clone, Default)]
pub struct ClusterSnapshot {
    pub machines: BTreeMap<String, Arc<Machine>>,
    pub workloads: BTreeMap<String, Arc<Workload>>,
    pub node_claims: BTreeMap<String, Arc<NodeClaim>>,
    pub node_pools: BTreeMap<String, Arc<NodePool>>,
    pub nominations: Vec<Nomination>,
    /// Highest revision the cache has observed.
    pub revision: Revision,
}

/// Object counts for the query API.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SnapshotSummary {
    pub revision: Revision,
    pub machines: usize,
    pub workloads: usize,
    pub node_claims: usize,
    pub node_pools: usize,
    pub nominations: usize,
    pub empty_claims: usize,
    pub drifted_claims: usize,
}

impl ClusterSnapshot {
    /// How many more of a pool's claims may start disrupting now.
    ///
    /// The tightest budget wins; claims already terminating count
    /// against it. Unknown pools allow nothing.
    pub fn allowed_disruptions(&self, pool_name: &str) -> usize {
        let Some(pool) = self.node_pools.get(pool_name) else {
            return 0;
        };
        let claims: Vec<&NodeClaim> = self
            .node_claims
            .values()
            .filter(|c| c.node_pool.as_deref() == Some(pool_name))
            .map(|c| c.as_ref())
            .collect();
        let total = claims.len();
        let disrupting = claims.iter().filter(|c| c.is_terminating()).count();

        let limit = pool
            .disruption
            .budgets
            .iter()
            .map(|b| b.allowed(total))
            .min()
            .unwrap_or(total);
        limit.saturating_sub(disrupting)
    }

    pub fn summary(&self) -> SnapshotSummary {
        use fleetgrid_state::ConditionType;

        let count = |t: ConditionType| {
            self.node_claims
                .values()
                .filter(|c| c.status.conditions.is_true(t))
                .count()
        };
        SnapshotSummary {
            revision: self.revision,
            machines: self.machines.len(),
            workloads: self.workloads.len(),
            node_claims: self.node_claims.len(),
            node_pools: self.node_pools.len(),
            nominations: self.nominations.len(),
            empty_claims: count(ConditionType::Empty),
            drifted_claims: count(ConditionType::Drifted),
        }
    }
}
