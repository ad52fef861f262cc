//! Which workload units keep a machine from being empty.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use fleetgrid_state::Workload;

/// How a unit whose deletion is in progress is treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminatingPolicy {
    /// The unit is on its way out and does not occupy the machine.
    #[default]
    Ignore,
    /// The unit still occupies the machine until it is gone.
    Block,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccupancyPolicy {
    /// Owner kinds that run on every machine and never count.
    #[serde(default = "default_daemon_kinds")]
    pub daemon_owner_kinds: BTreeSet<String>,
    #[serde(default)]
    pub terminating_default: TerminatingPolicy,
    /// Per owner kind overrides of `terminating_default`.
    #[serde(default = "default_overrides")]
    pub terminating_overrides: BTreeMap<String, TerminatingPolicy>,
}

fn default_daemon_kinds() -> BTreeSet<String> {
    BTreeSet::from(["DaemonSet".to_string()])
}

fn default_overrides() -> BTreeMap<String, TerminatingPolicy> {
    // Stateful replicas hold identity until they finish shutting down.
    BTreeMap::from([("StatefulSet".to_string(), TerminatingPolicy::Block)])
}

impl Default for OccupancyPolicy {
    fn default() -> Self {
        Self {
            daemon_owner_kinds: default_daemon_kinds(),
            terminating_default: TerminatingPolicy::default(),
            terminating_overrides: default_overrides(),
        }
    }
}

impl OccupancyPolicy {
    pub fn terminating_policy(&self, owner_kind: Option<&str>) -> TerminatingPolicy {
        owner_kind
            .and_then(|k| self.terminating_overrides.get(k))
            .copied()
            .unwrap_or(self.terminating_default)
    }

    /// Whether `workload` keeps its machine from being empty.
    pub fn counts_as_occupant(&self, workload: &Workload) -> bool {
        if workload.is_terminal() {
            return false;
        }
        let kind = workload.owner_kind();
        if kind.is_some_and(|k| self.daemon_owner_kinds.contains(k)) {
            return false;
        }
        if workload.deleting {
            return self.terminating_policy(kind) == TerminatingPolicy::Block;
        }
        true
    }
}
