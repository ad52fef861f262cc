//! Change feed events and authoritative listings.

use serde::{Deserialize, Serialize};

use crate::types::{Machine, NodeClaim, NodePool, ProviderId, Revision, Workload};

/// A create/update or delete notification for one object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Change<T> {
    Upserted(T),
    Deleted { key: String, revision: Revision },
}

/// One notification from the change feed.
///
/// Delivery may repeat, arrive out of order, or skip events; consumers
/// compare revisions and rely on periodic resync to fill gaps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "change", rename_all = "snake_case")]
pub enum ChangeEvent {
    Machine(Change<Machine>),
    Workload(Change<Workload>),
    NodeClaim(Change<NodeClaim>),
    NodePool(Change<NodePool>),
    /// Placement reserved a machine for in-flight workloads.
    Nominated { provider_id: ProviderId, ttl_secs: u64 },
}

impl ChangeEvent {
    /// Short label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Machine(_) => "machine",
            Self::Workload(_) => "workload",
            Self::NodeClaim(_) => "node_claim",
            Self::NodePool(_) => "node_pool",
            Self::Nominated { .. } => "nominated",
        }
    }
}

/// Full listing of every object, taken in one consistent read.
///
/// `revision` is the control plane's revision at the time of the read:
/// nothing in the listing is newer, and anything newer was written after.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FleetListing {
    pub revision: Revision,
    pub machines: Vec<Machine>,
    pub workloads: Vec<Workload>,
    pub node_claims: Vec<NodeClaim>,
    pub node_pools: Vec<NodePool>,
}
