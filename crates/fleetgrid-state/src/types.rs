//! Domain types for fleetgrid.
//!
//! These types represent machines, the workloads bound to them, the
//! node pools that govern them, and the node claims that record the
//! autoscaler's ownership of each machine. All types are serializable
//! to/from JSON for storage in redb tables and for the HTTP surface.
//!
//! Label maps are `BTreeMap` so that serialization (and therefore the
//! node pool template hash) is deterministic.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::conditions::{ConditionSet, ConditionType};
use crate::duration::{Budget, ConsolidateAfter};
use crate::lifecycle::{self, Phase};

/// Revision assigned by the control plane on every write.
pub type Revision = u64;

/// Cloud provider identity of a machine (e.g. `fake://i-0abc`).
pub type ProviderId = String;

/// Objects that carry a revision and a stable key.
pub trait Revisioned {
    /// Key under which the object is stored and cached.
    fn key(&self) -> String;
    fn revision(&self) -> Revision;
    fn set_revision(&mut self, revision: Revision);
}

macro_rules! revisioned {
    ($ty:ty, |$this:ident| $key:expr) => {
        impl Revisioned for $ty {
            fn key(&self) -> String {
                let $this = self;
                $key
            }
            fn revision(&self) -> Revision {
                self.revision
            }
            fn set_revision(&mut self, revision: Revision) {
                self.revision = revision;
            }
        }
    };
}

// ── Shared ────────────────────────────────────────────────────────

/// Resource quantities for a machine.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resources {
    pub cpu_millis: u64,
    pub memory_bytes: u64,
    pub pods: u32,
}

/// Scheduling taint carried by a machine or node pool template.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Taint {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub effect: TaintEffect,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaintEffect {
    NoSchedule,
    PreferNoSchedule,
    NoExecute,
}

/// Label selector requirement (`key In [a, b]`, `key Exists`, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Requirement {
    pub key: String,
    pub operator: Operator,
    #[serde(default)]
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Operator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
    Gt,
    Lt,
}

impl Requirement {
    /// Whether `labels` satisfy this requirement.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let value = labels.get(&self.key);
        match self.operator {
            Operator::In => value.is_some_and(|v| self.values.contains(v)),
            Operator::NotIn => value.is_none_or(|v| !self.values.contains(v)),
            Operator::Exists => value.is_some(),
            Operator::DoesNotExist => value.is_none(),
            Operator::Gt | Operator::Lt => {
                let (Some(actual), Some(bound)) = (
                    value.and_then(|v| v.parse::<i64>().ok()),
                    self.values.first().and_then(|v| v.parse::<i64>().ok()),
                ) else {
                    return false;
                };
                if self.operator == Operator::Gt {
                    actual > bound
                } else {
                    actual < bound
                }
            }
        }
    }
}

// ── Machine ───────────────────────────────────────────────────────

/// A running compute instance, as observed from the fleet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Machine {
    /// Node name; workloads bind to machines by this name.
    pub name: String,
    pub provider_id: ProviderId,
    #[serde(default)]
    pub capacity: Resources,
    #[serde(default)]
    pub allocatable: Resources,
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub taints: Vec<Taint>,
    #[serde(default)]
    pub revision: Revision,
}

revisioned!(Machine, |m| m.name.clone());

// ── Workload ──────────────────────────────────────────────────────

/// Controller that owns a workload unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OwnerReference {
    /// Controller kind, e.g. `DaemonSet`, `StatefulSet`, `ReplicaSet`.
    pub kind: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// A schedulable unit of work bound (or not yet bound) to a machine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workload {
    pub namespace: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<OwnerReference>,
    /// Name of the machine this unit is bound to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub phase: WorkloadPhase,
    /// Deletion has been requested but the unit has not gone away yet.
    #[serde(default)]
    pub deleting: bool,
    #[serde(default)]
    pub revision: Revision,
}

revisioned!(Workload, |w| format!("{}/{}", w.namespace, w.name));

impl Workload {
    /// Finished units (succeeded or failed) no longer occupy a machine.
    pub fn is_terminal(&self) -> bool {
        matches!(self.phase, WorkloadPhase::Succeeded | WorkloadPhase::Failed)
    }

    /// Owner controller kind, if any.
    pub fn owner_kind(&self) -> Option<&str> {
        self.owner.as_ref().map(|o| o.kind.as_str())
    }
}

// ── NodePool ──────────────────────────────────────────────────────

/// Disruption rules for a node pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DisruptionPolicy {
    #[serde(default)]
    pub consolidate_after: ConsolidateAfter,
    #[serde(default = "default_budgets")]
    pub budgets: Vec<Budget>,
}

fn default_budgets() -> Vec<Budget> {
    vec![Budget::default()]
}

impl Default for DisruptionPolicy {
    fn default() -> Self {
        Self {
            consolidate_after: ConsolidateAfter::default(),
            budgets: default_budgets(),
        }
    }
}

/// Template stamped onto every machine a pool launches.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NodeTemplate {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub taints: Vec<Taint>,
    #[serde(default)]
    pub requirements: Vec<Requirement>,
}

/// Fleet policy governing a class of machines.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodePool {
    pub name: String,
    #[serde(default)]
    pub template: NodeTemplate,
    #[serde(default)]
    pub disruption: DisruptionPolicy,
    #[serde(default)]
    pub revision: Revision,
}

revisioned!(NodePool, |p| p.name.clone());

impl NodePool {
    /// Stable hash of the launch template, stamped on claims at creation.
    /// Covers the template only; disruption settings never cause drift.
    pub fn template_hash(&self) -> String {
        let json = serde_json::to_vec(&self.template).unwrap_or_default();
        let digest = Sha256::digest(&json);
        hex::encode(&digest[..8])
    }
}

// ── NodeClaim ─────────────────────────────────────────────────────

/// Observed state of a node claim.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NodeClaimStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<ProviderId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    #[serde(default)]
    pub conditions: ConditionSet,
}

/// The autoscaler's durable record of a requested/owned machine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeClaim {
    pub name: String,
    /// Owning node pool. Required; immutable once created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_pool: Option<String>,
    #[serde(default)]
    pub requirements: Vec<Requirement>,
    /// `NodePool::template_hash` at the time the claim was created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_hash: Option<String>,
    /// Unix timestamp (seconds) when the claim was created.
    #[serde(default)]
    pub created_at: u64,
    #[serde(default)]
    pub status: NodeClaimStatus,
    #[serde(default)]
    pub revision: Revision,
}

revisioned!(NodeClaim, |c| c.name.clone());

impl NodeClaim {
    /// Current lifecycle phase, derived from status conditions.
    pub fn phase(&self) -> Phase {
        lifecycle::phase(&self.status.conditions)
    }

    /// Whether termination has begun.
    pub fn is_terminating(&self) -> bool {
        self.phase() >= Phase::Terminating
    }

    pub fn is_initialized(&self) -> bool {
        self.status.conditions.is_true(ConditionType::Initialized)
    }
}
