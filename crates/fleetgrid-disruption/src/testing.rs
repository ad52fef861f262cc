//! Fixtures shared by the evaluator tests.

use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use fleetgrid_cluster::ClaimView;
use fleetgrid_state::lifecycle::{Phase, advance};
use fleetgrid_state::{
    ConditionSet, ConsolidateAfter, DisruptionPolicy, Machine, NodeClaim, NodeClaimStatus,
    NodePool, NodeTemplate, OwnerReference, Resources, Workload, WorkloadPhase,
};

pub fn conditions_at(target: Phase) -> ConditionSet {
    let mut set = ConditionSet::new();
    let mut p = Phase::Pending;
    while p < target {
        p = p.next().unwrap();
        advance(&mut set, p, 1).unwrap();
    }
    set
}

fn claim_at(target: Phase) -> NodeClaim {
    NodeClaim {
        name: "claim-a".to_string(),
        node_pool: Some("default".to_string()),
        requirements: vec![],
        template_hash: Some(pool_after(30).template_hash()),
        created_at: 1,
        status: NodeClaimStatus {
            provider_id: Some("fake://node-a".to_string()),
            node_name: Some("node-a".to_string()),
            conditions: conditions_at(target),
        },
        revision: 10,
    }
}

pub fn initialized_claim() -> NodeClaim {
    claim_at(Phase::Ready)
}

pub fn pending_claim() -> NodeClaim {
    claim_at(Phase::Registered)
}

pub fn terminating_claim() -> NodeClaim {
    claim_at(Phase::Terminating)
}

pub fn pool_after(secs: u64) -> NodePool {
    NodePool {
        name: "default".to_string(),
        template: NodeTemplate::default(),
        disruption: DisruptionPolicy {
            consolidate_after: ConsolidateAfter::After(Duration::from_secs(secs)),
            ..Default::default()
        },
        revision: 1,
    }
}

pub fn machine() -> Machine {
    Machine {
        name: "node-a".to_string(),
        provider_id: "fake://node-a".to_string(),
        capacity: Resources::default(),
        allocatable: Resources::default(),
        ready: true,
        labels: Default::default(),
        taints: vec![],
        revision: 2,
    }
}

pub fn workload(name: &str, owner_kind: Option<&str>) -> Workload {
    Workload {
        namespace: "default".to_string(),
        name: name.to_string(),
        owner: owner_kind.map(|k| OwnerReference {
            kind: k.to_string(),
            name: format!("{name}-owner"),
        }),
        node_name: Some("node-a".to_string()),
        ready: true,
        phase: WorkloadPhase::Running,
        deleting: false,
        revision: 3,
    }
}

pub fn view_with(
    claim: NodeClaim,
    pool: Option<NodePool>,
    workloads: Vec<Workload>,
    nominated: bool,
) -> ClaimView {
    ClaimView {
        claim: Arc::new(claim),
        node_pool: pool.map(Arc::new),
        machine: Some(Arc::new(machine())),
        workloads: workloads.into_iter().map(Arc::new).collect(),
        nominated,
        observed_at: UNIX_EPOCH + Duration::from_secs(1_700_000_000),
    }
}
