//! ClusterState — the in-memory fleet view.
//!
//! Holds the latest committed version of every machine, workload, node
//! claim and node pool behind one `RwLock`. Writes are last-write-wins
//! by revision: an update whose revision is not newer than what the
//! cache holds (or than a recorded deletion) is dropped, so duplicate
//! and reordered change events are harmless.
//!
//! Two secondary indexes are maintained under the same lock:
//! workloads by bound node name, and claims by machine identity.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use fleetgrid_state::{
    Change, ChangeEvent, FleetListing, Machine, NodeClaim, NodePool, ProviderId, Revision,
    Revisioned, Workload,
};

use crate::clock::Clock;
use crate::nomination::NominationLedger;
use crate::view::{ClaimView, ClusterSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKind {
    Machine,
    Workload,
    NodeClaim,
    NodePool,
}

/// What a resync changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResyncReport {
    /// Objects stored because the listing had a newer version.
    pub upserted: usize,
    /// Cached objects missing from the listing and no newer than it.
    pub removed: usize,
    /// Cached objects missing from the listing but newer than it.
    pub retained: usize,
}

enum Outcome<T> {
    Stale,
    Stored { previous: Option<Arc<T>> },
}

#[derive(Default)]
struct Inner {
    machines: HashMap<String, Arc<Machine>>,
    workloads: HashMap<String, Arc<Workload>>,
    node_claims: HashMap<String, Arc<NodeClaim>>,
    node_pools: HashMap<String, Arc<NodePool>>,

    workloads_by_node: HashMap<String, BTreeSet<String>>,
    machines_by_provider: HashMap<ProviderId, String>,
    claims_by_provider: HashMap<ProviderId, String>,
    claims_by_node: HashMap<String, String>,

    /// Revision at which each removed object was deleted.
    tombstones: HashMap<(ObjectKind, String), Revision>,
    /// Watermark of the last applied listing. Unknown objects at or
    /// below it were deleted before the listing was taken.
    floor: Revision,
    /// Highest revision observed.
    revision: Revision,
}

fn store<T: Revisioned>(
    map: &mut HashMap<String, Arc<T>>,
    tombstones: &mut HashMap<(ObjectKind, String), Revision>,
    floor: Revision,
    kind: ObjectKind,
    obj: T,
) -> Outcome<T> {
    let key = obj.key();
    let revision = obj.revision();
    if let Some(existing) = map.get(&key) {
        if existing.revision() >= revision {
            return Outcome::Stale;
        }
    } else {
        let tomb = (kind, key.clone());
        if tombstones.get(&tomb).is_some_and(|r| *r >= revision) || revision <= floor {
            return Outcome::Stale;
        }
        tombstones.remove(&tomb);
    }
    let previous = map.insert(key, Arc::new(obj));
    Outcome::Stored { previous }
}

fn evict<T: Revisioned>(
    map: &mut HashMap<String, Arc<T>>,
    tombstones: &mut HashMap<(ObjectKind, String), Revision>,
    kind: ObjectKind,
    key: &str,
    revision: Revision,
) -> Option<Arc<T>> {
    if map.get(key).is_some_and(|existing| existing.revision() > revision) {
        return None;
    }
    let tomb = tombstones.entry((kind, key.to_string())).or_insert(revision);
    *tomb = (*tomb).max(revision);
    map.remove(key)
}

/// Remove `index[at]` only if it still points at `owner`. Returns
/// whether the slot was freed.
fn unlink(index: &mut HashMap<String, String>, at: &str, owner: &str) -> bool {
    if index.get(at).is_some_and(|o| o == owner) {
        index.remove(at);
        return true;
    }
    false
}

/// Point `index[at]` at `claim` unless another claim already holds it.
fn link_claim(index: &mut HashMap<String, String>, at: String, claim: &str, field: &str) {
    match index.get(&at) {
        Some(other) if other != claim => {
            warn!(%claim, %other, %field, value = %at, "machine already claimed");
        }
        _ => {
            index.insert(at, claim.to_string());
        }
    }
}

impl Inner {
    fn observe(&mut self, revision: Revision) {
        self.revision = self.revision.max(revision);
    }

    fn upsert_machine(&mut self, machine: Machine) -> bool {
        let name = machine.name.clone();
        let provider_id = machine.provider_id.clone();
        let revision = machine.revision;
        match store(&mut self.machines, &mut self.tombstones, self.floor, ObjectKind::Machine, machine) {
            Outcome::Stale => false,
            Outcome::Stored { previous } => {
                if let Some(prev) = previous {
                    unlink(&mut self.machines_by_provider, &prev.provider_id, &name);
                }
                self.machines_by_provider.insert(provider_id, name);
                self.observe(revision);
                true
            }
        }
    }

    fn remove_machine(&mut self, name: &str, revision: Revision) -> bool {
        self.observe(revision);
        match evict(&mut self.machines, &mut self.tombstones, ObjectKind::Machine, name, revision) {
            Some(prev) => {
                unlink(&mut self.machines_by_provider, &prev.provider_id, name);
                true
            }
            None => false,
        }
    }

    fn upsert_workload(&mut self, workload: Workload) -> bool {
        let key = workload.key();
        let node = workload.node_name.clone();
        let revision = workload.revision;
        match store(&mut self.workloads, &mut self.tombstones, self.floor, ObjectKind::Workload, workload) {
            Outcome::Stale => false,
            Outcome::Stored { previous } => {
                if let Some(prev_node) = previous.and_then(|p| p.node_name.clone()) {
                    self.unindex_workload(&prev_node, &key);
                }
                if let Some(node) = node {
                    self.workloads_by_node.entry(node).or_default().insert(key);
                }
                self.observe(revision);
                true
            }
        }
    }

    fn remove_workload(&mut self, key: &str, revision: Revision) -> bool {
        self.observe(revision);
        match evict(&mut self.workloads, &mut self.tombstones, ObjectKind::Workload, key, revision) {
            Some(prev) => {
                if let Some(node) = &prev.node_name {
                    self.unindex_workload(node, key);
                }
                true
            }
            None => false,
        }
    }

    fn unindex_workload(&mut self, node: &str, key: &str) {
        if let Some(keys) = self.workloads_by_node.get_mut(node) {
            keys.remove(key);
            if keys.is_empty() {
                self.workloads_by_node.remove(node);
            }
        }
    }

    fn upsert_node_claim(&mut self, claim: NodeClaim) -> bool {
        let name = claim.name.clone();
        let provider_id = claim.status.provider_id.clone();
        let node_name = claim.status.node_name.clone();
        let revision = claim.revision;
        match store(&mut self.node_claims, &mut self.tombstones, self.floor, ObjectKind::NodeClaim, claim) {
            Outcome::Stale => false,
            Outcome::Stored { previous } => {
                if let Some(prev) = previous {
                    self.unindex_claim(&prev);
                }
                if let Some(pid) = provider_id {
                    link_claim(&mut self.claims_by_provider, pid, &name, "provider_id");
                }
                if let Some(node) = node_name {
                    link_claim(&mut self.claims_by_node, node, &name, "node_name");
                }
                self.observe(revision);
                true
            }
        }
    }

    fn remove_node_claim(&mut self, name: &str, revision: Revision) -> bool {
        self.observe(revision);
        match evict(&mut self.node_claims, &mut self.tombstones, ObjectKind::NodeClaim, name, revision) {
            Some(prev) => {
                self.unindex_claim(&prev);
                true
            }
            None => false,
        }
    }

    /// Drop `claim` from the identity indexes. A slot it held passes to
    /// any other cached claim bound to the same identity.
    fn unindex_claim(&mut self, claim: &NodeClaim) {
        if let Some(pid) = &claim.status.provider_id
            && unlink(&mut self.claims_by_provider, pid, &claim.name)
            && let Some(next) = self.claim_bound_to(|c| c.status.provider_id.as_ref() == Some(pid))
        {
            self.claims_by_provider.insert(pid.clone(), next);
        }
        if let Some(node) = &claim.status.node_name
            && unlink(&mut self.claims_by_node, node, &claim.name)
            && let Some(next) = self.claim_bound_to(|c| c.status.node_name.as_ref() == Some(node))
        {
            self.claims_by_node.insert(node.clone(), next);
        }
    }

    /// First cached claim, by name, matching `bound`.
    fn claim_bound_to(&self, bound: impl Fn(&NodeClaim) -> bool) -> Option<String> {
        self.node_claims
            .values()
            .filter(|c| bound(c))
            .map(|c| c.name.clone())
            .min()
    }

    fn upsert_node_pool(&mut self, pool: NodePool) -> bool {
        let revision = pool.revision;
        match store(&mut self.node_pools, &mut self.tombstones, self.floor, ObjectKind::NodePool, pool) {
            Outcome::Stale => false,
            Outcome::Stored { .. } => {
                self.observe(revision);
                true
            }
        }
    }

    fn remove_node_pool(&mut self, name: &str, revision: Revision) -> bool {
        self.observe(revision);
        evict(&mut self.node_pools, &mut self.tombstones, ObjectKind::NodePool, name, revision).is_some()
    }

    /// The machine a claim is bound to: by provider id, then node name.
    fn machine_for(&self, claim: &NodeClaim) -> Option<Arc<Machine>> {
        claim
            .status
            .provider_id
            .as_ref()
            .and_then(|pid| self.machines_by_provider.get(pid))
            .or(claim.status.node_name.as_ref())
            .and_then(|name| self.machines.get(name))
            .cloned()
    }

    fn workloads_on(&self, node: &str) -> Vec<Arc<Workload>> {
        self.workloads_by_node
            .get(node)
            .into_iter()
            .flatten()
            .filter_map(|key| self.workloads.get(key).cloned())
            .collect()
    }

    /// Claims bound to the named machine, through either identity.
    fn claims_on_node(&self, node: &str, out: &mut BTreeSet<String>) {
        if let Some(claim) = self.claims_by_node.get(node) {
            out.insert(claim.clone());
        }
        if let Some(claim) = self
            .machines
            .get(node)
            .and_then(|m| self.claims_by_provider.get(&m.provider_id))
        {
            out.insert(claim.clone());
        }
    }
}

/// Concurrently readable fleet cache plus the nomination ledger.
pub struct ClusterState {
    inner: RwLock<Inner>,
    nominations: NominationLedger,
    clock: Arc<dyn Clock>,
}

impl ClusterState {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            nominations: NominationLedger::new(clock.clone()),
            clock,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn nominations(&self) -> &NominationLedger {
        &self.nominations
    }

    /// Highest revision observed so far.
    pub fn revision(&self) -> Revision {
        self.read().revision
    }

    // ── Writes ─────────────────────────────────────────────────────

    /// Apply one change event. Returns whether the cache changed.
    pub fn apply(&self, event: ChangeEvent) -> bool {
        let kind = event.kind();
        let changed = match event {
            ChangeEvent::Machine(Change::Upserted(m)) => self.upsert_machine(m),
            ChangeEvent::Machine(Change::Deleted { key, revision }) => {
                self.remove_machine(&key, revision)
            }
            ChangeEvent::Workload(Change::Upserted(w)) => self.upsert_workload(w),
            ChangeEvent::Workload(Change::Deleted { key, revision }) => {
                self.remove_workload(&key, revision)
            }
            ChangeEvent::NodeClaim(Change::Upserted(c)) => self.upsert_node_claim(c),
            ChangeEvent::NodeClaim(Change::Deleted { key, revision }) => {
                self.remove_node_claim(&key, revision)
            }
            ChangeEvent::NodePool(Change::Upserted(p)) => self.upsert_node_pool(p),
            ChangeEvent::NodePool(Change::Deleted { key, revision }) => {
                self.remove_node_pool(&key, revision)
            }
            ChangeEvent::Nominated {
                provider_id,
                ttl_secs,
            } => {
                self.nominate(&provider_id, Duration::from_secs(ttl_secs));
                true
            }
        };
        if !changed {
            debug!(kind, "stale or duplicate change ignored");
        }
        changed
    }

    pub fn upsert_machine(&self, machine: Machine) -> bool {
        self.write().upsert_machine(machine)
    }

    pub fn remove_machine(&self, name: &str, revision: Revision) -> bool {
        self.write().remove_machine(name, revision)
    }

    pub fn upsert_workload(&self, workload: Workload) -> bool {
        self.write().upsert_workload(workload)
    }

    pub fn remove_workload(&self, key: &str, revision: Revision) -> bool {
        self.write().remove_workload(key, revision)
    }

    pub fn upsert_node_claim(&self, claim: NodeClaim) -> bool {
        self.write().upsert_node_claim(claim)
    }

    pub fn remove_node_claim(&self, name: &str, revision: Revision) -> bool {
        self.write().remove_node_claim(name, revision)
    }

    pub fn upsert_node_pool(&self, pool: NodePool) -> bool {
        self.write().upsert_node_pool(pool)
    }

    pub fn remove_node_pool(&self, name: &str, revision: Revision) -> bool {
        self.write().remove_node_pool(name, revision)
    }

    /// Reserve a machine on behalf of the placement path.
    pub fn nominate(&self, provider_id: &str, ttl: Duration) {
        self.nominations.nominate(provider_id, ttl);
    }

    /// Reconcile the cache against an authoritative listing.
    ///
    /// Everything in the listing is applied with the usual revision
    /// rule. Cached objects absent from the listing are dropped only if
    /// they are no newer than the listing's watermark; anything newer
    /// arrived after the listing was taken and stays.
    pub fn resync(&self, listing: FleetListing) -> ResyncReport {
        let watermark = listing.revision;
        let mut report = ResyncReport::default();
        let mut inner = self.write();

        let machine_keys: HashSet<String> = listing.machines.iter().map(|o| o.key()).collect();
        let workload_keys: HashSet<String> = listing.workloads.iter().map(|o| o.key()).collect();
        let claim_keys: HashSet<String> = listing.node_claims.iter().map(|o| o.key()).collect();
        let pool_keys: HashSet<String> = listing.node_pools.iter().map(|o| o.key()).collect();

        for m in listing.machines {
            report.upserted += usize::from(inner.upsert_machine(m));
        }
        for w in listing.workloads {
            report.upserted += usize::from(inner.upsert_workload(w));
        }
        for c in listing.node_claims {
            report.upserted += usize::from(inner.upsert_node_claim(c));
        }
        for p in listing.node_pools {
            report.upserted += usize::from(inner.upsert_node_pool(p));
        }

        let (stale, retained) = absent(&inner.machines, &machine_keys, watermark);
        report.retained += retained;
        for key in stale {
            report.removed += usize::from(inner.remove_machine(&key, watermark));
        }
        let (stale, retained) = absent(&inner.workloads, &workload_keys, watermark);
        report.retained += retained;
        for key in stale {
            report.removed += usize::from(inner.remove_workload(&key, watermark));
        }
        let (stale, retained) = absent(&inner.node_claims, &claim_keys, watermark);
        report.retained += retained;
        for key in stale {
            report.removed += usize::from(inner.remove_node_claim(&key, watermark));
        }
        let (stale, retained) = absent(&inner.node_pools, &pool_keys, watermark);
        report.retained += retained;
        for key in stale {
            report.removed += usize::from(inner.remove_node_pool(&key, watermark));
        }

        inner.floor = inner.floor.max(watermark);
        let floor = inner.floor;
        inner.tombstones.retain(|_, r| *r > floor);
        inner.observe(watermark);
        drop(inner);

        self.nominations.sweep();
        info!(
            watermark,
            upserted = report.upserted,
            removed = report.removed,
            retained = report.retained,
            "cluster state resynced"
        );
        report
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// Consistent inputs for evaluating one claim, or `None` if the
    /// claim is not cached.
    pub fn view_for_claim(&self, name: &str) -> Option<ClaimView> {
        let inner = self.read();
        let claim = inner.node_claims.get(name)?.clone();
        let node_pool = claim
            .node_pool
            .as_ref()
            .and_then(|p| inner.node_pools.get(p))
            .cloned();
        let machine = inner.machine_for(&claim);
        let workloads = machine
            .as_ref()
            .map(|m| inner.workloads_on(&m.name))
            .unwrap_or_default();
        let provider_id = machine
            .as_ref()
            .map(|m| m.provider_id.as_str())
            .or(claim.status.provider_id.as_deref());
        let nominated = provider_id.is_some_and(|pid| self.nominations.is_nominated(pid));

        Some(ClaimView {
            claim,
            node_pool,
            machine,
            workloads,
            nominated,
            observed_at: self.clock.now(),
        })
    }

    pub fn snapshot(&self) -> ClusterSnapshot {
        let inner = self.read();
        ClusterSnapshot {
            machines: clone_sorted(&inner.machines),
            workloads: clone_sorted(&inner.workloads),
            node_claims: clone_sorted(&inner.node_claims),
            node_pools: clone_sorted(&inner.node_pools),
            nominations: self.nominations.active(),
            revision: inner.revision,
        }
    }

    pub fn node_claim(&self, name: &str) -> Option<Arc<NodeClaim>> {
        self.read().node_claims.get(name).cloned()
    }

    pub fn claim_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().node_claims.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn workloads_on(&self, node: &str) -> Vec<Arc<Workload>> {
        self.read().workloads_on(node)
    }

    /// Claims whose evaluation may change because of `event`, judged
    /// against the current cache contents.
    ///
    /// Call it both before and after applying an event to catch claims
    /// tied to the old and the new version of an object.
    pub fn claims_affected_by(&self, event: &ChangeEvent) -> Vec<String> {
        let inner = self.read();
        let mut out = BTreeSet::new();
        match event {
            ChangeEvent::Machine(change) => {
                let name = match change {
                    Change::Upserted(m) => {
                        if let Some(claim) = inner.claims_by_provider.get(&m.provider_id) {
                            out.insert(claim.clone());
                        }
                        m.name.as_str()
                    }
                    Change::Deleted { key, .. } => key.as_str(),
                };
                inner.claims_on_node(name, &mut out);
            }
            ChangeEvent::Workload(change) => {
                let key = match change {
                    Change::Upserted(w) => {
                        if let Some(node) = &w.node_name {
                            inner.claims_on_node(node, &mut out);
                        }
                        w.key()
                    }
                    Change::Deleted { key, .. } => key.clone(),
                };
                if let Some(node) = inner.workloads.get(&key).and_then(|w| w.node_name.as_ref()) {
                    inner.claims_on_node(node, &mut out);
                }
            }
            ChangeEvent::NodeClaim(Change::Upserted(c)) => {
                out.insert(c.name.clone());
            }
            ChangeEvent::NodeClaim(Change::Deleted { key, .. }) => {
                out.insert(key.clone());
            }
            ChangeEvent::NodePool(change) => {
                let pool = match change {
                    Change::Upserted(p) => p.name.as_str(),
                    Change::Deleted { key, .. } => key.as_str(),
                };
                out.extend(
                    inner
                        .node_claims
                        .values()
                        .filter(|c| c.node_pool.as_deref() == Some(pool))
                        .map(|c| c.name.clone()),
                );
            }
            ChangeEvent::Nominated { provider_id, .. } => {
                if let Some(claim) = inner.claims_by_provider.get(provider_id) {
                    out.insert(claim.clone());
                }
                if let Some(node) = inner.machines_by_provider.get(provider_id) {
                    inner.claims_on_node(node, &mut out);
                }
            }
        }
        out.into_iter().collect()
    }
}

fn clone_sorted<T>(map: &HashMap<String, Arc<T>>) -> std::collections::BTreeMap<String, Arc<T>> {
    map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

/// Cached keys missing from a listing: (removable, retained count).
fn absent<T: Revisioned>(
    cached: &HashMap<String, Arc<T>>,
    listed: &HashSet<String>,
    watermark: Revision,
) -> (Vec<String>, usize) {
    let mut removable = Vec::new();
    let mut retained = 0;
    for (key, obj) in cached {
        if listed.contains(key) {
            continue;
        }
        if obj.revision() <= watermark {
            removable.push(key.clone());
        } else {
            retained += 1;
        }
    }
    (removable, retained)
}
