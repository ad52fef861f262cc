//! RecordStore — redb-backed stand-in for the fleet control plane.
//!
//! Stores machines, workloads, node pools and node claims as JSON in
//! redb's `&[u8]` value columns. Every write takes the next value of a
//! store-wide revision counter inside the same transaction, so a
//! committed object's revision is unique and totally ordered.
//!
//! Node claim writes are optimistic: callers pass the revision they
//! read, and a mismatch fails with `StateError::Conflict` rather than
//! overwriting someone else's update. The store supports both on-disk
//! and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadTransaction, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::conditions::ConditionSet;
use crate::error::{StateError, StateResult};
use crate::event::FleetListing;
use crate::lifecycle::{self, Phase};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type ObjectTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Machine identity reported alongside a lifecycle transition.
#[derive(Debug, Clone, Default, Serialize, serde::Deserialize, PartialEq)]
pub struct Binding {
    #[serde(default)]
    pub provider_id: Option<ProviderId>,
    #[serde(default)]
    pub node_name: Option<String>,
}

/// Thread-safe record store backed by redb.
#[derive(Clone)]
pub struct RecordStore {
    db: Arc<Database>,
}

impl RecordStore {
    /// Open (or create) a persistent record store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "record store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory record store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory record store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        for def in [MACHINES, WORKLOADS, NODE_CLAIMS, NODE_POOLS] {
            txn.open_table(def).map_err(map_err!(Table))?;
        }
        txn.open_table(META).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Last revision handed out.
    pub fn current_revision(&self) -> StateResult<Revision> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        read_revision(&txn)
    }

    // ── Generic object access ─────────────────────────────────────

    fn get_object<T: DeserializeOwned>(&self, def: ObjectTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let obj = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(obj))
            }
            None => Ok(None),
        }
    }

    fn list_objects<T: DeserializeOwned>(&self, def: ObjectTable) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        collect(&txn, def)
    }

    fn put_object<T: Serialize + Revisioned + Clone>(&self, def: ObjectTable, obj: &T) -> StateResult<T> {
        let key = obj.key();
        let mut stored = obj.clone();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            stored.set_revision(next_revision(&txn)?);
            let value = serde_json::to_vec(&stored).map_err(map_err!(Serialize))?;
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, revision = stored.revision(), "object stored");
        Ok(stored)
    }

    /// Remove an object. Returns the deletion's revision if it existed.
    fn delete_object(&self, def: ObjectTable, key: &str) -> StateResult<Option<Revision>> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed = {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            table.remove(key).map_err(map_err!(Write))?.is_some()
        };
        let revision = if existed {
            Some(next_revision(&txn)?)
        } else {
            None
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, existed, "object deleted");
        Ok(revision)
    }

    // ── Machines ───────────────────────────────────────────────────

    /// Insert or update a machine. Returns it with its new revision.
    pub fn put_machine(&self, machine: &Machine) -> StateResult<Machine> {
        self.put_object(MACHINES, machine)
    }

    pub fn get_machine(&self, name: &str) -> StateResult<Option<Machine>> {
        self.get_object(MACHINES, name)
    }

    pub fn list_machines(&self) -> StateResult<Vec<Machine>> {
        self.list_objects(MACHINES)
    }

    pub fn delete_machine(&self, name: &str) -> StateResult<Option<Revision>> {
        self.delete_object(MACHINES, name)
    }

    // ── Workloads ──────────────────────────────────────────────────

    pub fn put_workload(&self, workload: &Workload) -> StateResult<Workload> {
        self.put_object(WORKLOADS, workload)
    }

    /// Get a workload by `{namespace}/{name}` key.
    pub fn get_workload(&self, key: &str) -> StateResult<Option<Workload>> {
        self.get_object(WORKLOADS, key)
    }

    pub fn list_workloads(&self) -> StateResult<Vec<Workload>> {
        self.list_objects(WORKLOADS)
    }

    pub fn delete_workload(&self, key: &str) -> StateResult<Option<Revision>> {
        self.delete_object(WORKLOADS, key)
    }

    // ── Node pools ─────────────────────────────────────────────────

    pub fn put_node_pool(&self, pool: &NodePool) -> StateResult<NodePool> {
        self.put_object(NODE_POOLS, pool)
    }

    pub fn get_node_pool(&self, name: &str) -> StateResult<Option<NodePool>> {
        self.get_object(NODE_POOLS, name)
    }

    pub fn list_node_pools(&self) -> StateResult<Vec<NodePool>> {
        self.list_objects(NODE_POOLS)
    }

    pub fn delete_node_pool(&self, name: &str) -> StateResult<Option<Revision>> {
        self.delete_object(NODE_POOLS, name)
    }

    // ── Node claims ────────────────────────────────────────────────

    /// Record a new node claim.
    ///
    /// Stamps `created_at` when unset and, if the owning pool is known,
    /// the pool's current template hash.
    pub fn create_node_claim(&self, claim: &NodeClaim, now: u64) -> StateResult<NodeClaim> {
        let mut stored = claim.clone();
        if stored.created_at == 0 {
            stored.created_at = now;
        }
        if stored.template_hash.is_none()
            && let Some(pool_name) = &stored.node_pool
            && let Some(pool) = self.get_node_pool(pool_name)?
        {
            stored.template_hash = Some(pool.template_hash());
        }

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(NODE_CLAIMS).map_err(map_err!(Table))?;
            if table.get(stored.name.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::AlreadyExists(stored.name));
            }
            stored.revision = next_revision(&txn)?;
            let value = serde_json::to_vec(&stored).map_err(map_err!(Serialize))?;
            table
                .insert(stored.name.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(claim = %stored.name, revision = stored.revision, "node claim created");
        Ok(stored)
    }

    pub fn get_node_claim(&self, name: &str) -> StateResult<Option<NodeClaim>> {
        self.get_object(NODE_CLAIMS, name)
    }

    pub fn list_node_claims(&self) -> StateResult<Vec<NodeClaim>> {
        self.list_objects(NODE_CLAIMS)
    }

    /// Load, modify and store a node claim in one write transaction.
    ///
    /// When `expected` is set the stored revision must match it.
    fn modify_node_claim<F>(&self, name: &str, expected: Option<Revision>, f: F) -> StateResult<NodeClaim>
    where
        F: FnOnce(&mut NodeClaim) -> StateResult<()>,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let claim = {
            let mut table = txn.open_table(NODE_CLAIMS).map_err(map_err!(Table))?;
            let mut claim: NodeClaim = match table.get(name).map_err(map_err!(Read))? {
                Some(guard) => serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
                None => return Err(StateError::NotFound(name.to_string())),
            };
            if let Some(expected) = expected
                && claim.revision != expected
            {
                return Err(StateError::Conflict {
                    name: name.to_string(),
                    expected,
                    actual: claim.revision,
                });
            }
            f(&mut claim)?;
            claim.revision = next_revision(&txn)?;
            let value = serde_json::to_vec(&claim).map_err(map_err!(Serialize))?;
            table.insert(name, value.as_slice()).map_err(map_err!(Write))?;
            claim
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(claim)
    }

    /// Replace a node claim's desired fields, guarded by its revision.
    ///
    /// The owning pool reference and the status are left untouched.
    pub fn update_node_claim(&self, claim: &NodeClaim) -> StateResult<NodeClaim> {
        self.modify_node_claim(&claim.name, Some(claim.revision), |stored| {
            if stored.node_pool.is_some() && stored.node_pool != claim.node_pool {
                return Err(StateError::Immutable(format!("{}: node_pool", claim.name)));
            }
            if stored.is_terminating() {
                return Err(lifecycle::LifecycleError::Frozen {
                    current: stored.phase(),
                }
                .into());
            }
            stored.node_pool = claim.node_pool.clone();
            stored.requirements = claim.requirements.clone();
            stored.template_hash = claim.template_hash.clone();
            Ok(())
        })
    }

    /// Write a claim's conditions, guarded by the revision the caller read.
    pub fn update_node_claim_conditions(
        &self,
        name: &str,
        expected: Revision,
        conditions: &ConditionSet,
    ) -> StateResult<NodeClaim> {
        let claim = self.modify_node_claim(name, Some(expected), |stored| {
            stored.status.conditions = conditions.clone();
            Ok(())
        })?;
        debug!(claim = %name, revision = claim.revision, "node claim conditions updated");
        Ok(claim)
    }

    /// Advance a claim's lifecycle, recording its machine identity when given.
    pub fn transition_node_claim(
        &self,
        name: &str,
        phase: Phase,
        binding: &Binding,
        now: u64,
    ) -> StateResult<NodeClaim> {
        let claim = self.modify_node_claim(name, None, |stored| {
            let current = stored.phase();
            if current >= Phase::Terminating {
                let rebinds = binding
                    .provider_id
                    .as_ref()
                    .is_some_and(|p| stored.status.provider_id.as_ref() != Some(p))
                    || binding
                        .node_name
                        .as_ref()
                        .is_some_and(|n| stored.status.node_name.as_ref() != Some(n));
                if phase == current || rebinds {
                    debug!(claim = %name, ?current, ?phase, rebinds, "rejected change to terminating claim");
                    return Err(lifecycle::LifecycleError::Frozen { current }.into());
                }
            }
            lifecycle::advance(&mut stored.status.conditions, phase, now)?;
            if let Some(provider_id) = &binding.provider_id {
                stored.status.provider_id = Some(provider_id.clone());
            }
            if let Some(node_name) = &binding.node_name {
                stored.status.node_name = Some(node_name.clone());
            }
            Ok(())
        })?;
        debug!(claim = %name, ?phase, "node claim transitioned");
        Ok(claim)
    }

    /// Delete a node claim. Only terminated claims may be removed.
    pub fn delete_node_claim(&self, name: &str) -> StateResult<Option<Revision>> {
        match self.get_node_claim(name)? {
            None => Ok(None),
            Some(claim) if claim.phase() != Phase::Terminated => {
                Err(StateError::NotTerminated(name.to_string()))
            }
            Some(_) => self.delete_object(NODE_CLAIMS, name),
        }
    }

    // ── Listing ────────────────────────────────────────────────────

    /// Every object plus the revision watermark, from one read transaction.
    pub fn listing(&self) -> StateResult<FleetListing> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        Ok(FleetListing {
            revision: read_revision(&txn)?,
            machines: collect(&txn, MACHINES)?,
            workloads: collect(&txn, WORKLOADS)?,
            node_claims: collect(&txn, NODE_CLAIMS)?,
            node_pools: collect(&txn, NODE_POOLS)?,
        })
    }
}

fn read_revision(txn: &ReadTransaction) -> StateResult<Revision> {
    let meta = txn.open_table(META).map_err(map_err!(Table))?;
    Ok(meta
        .get(REVISION_KEY)
        .map_err(map_err!(Read))?
        .map(|g| g.value())
        .unwrap_or(0))
}

fn next_revision(txn: &WriteTransaction) -> StateResult<Revision> {
    let mut meta = txn.open_table(META).map_err(map_err!(Table))?;
    let next = meta
        .get(REVISION_KEY)
        .map_err(map_err!(Read))?
        .map(|g| g.value())
        .unwrap_or(0)
        + 1;
    meta.insert(REVISION_KEY, next).map_err(map_err!(Write))?;
    Ok(next)
}

fn collect<T: DeserializeOwned>(txn: &ReadTransaction, def: ObjectTable) -> StateResult<Vec<T>> {
    let table = txn.open_table(def).map_err(map_err!(Table))?;
    let mut results = Vec::new();
    for entry in table.iter().map_err(map_err!(Read))? {
        let (_, value) = entry.map_err(map_err!(Read))?;
        results.push(serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::ConditionType;
    use crate::lifecycle::LifecycleError;

    fn test_machine(name: &str) -> Machine {
        Machine {
            name: name.to_string(),
            provider_id: format!("fake://{name}"),
            capacity: Resources::default(),
            allocatable: Resources::default(),
            ready: true,
            labels: Default::default(),
            taints: vec![],
            revision: 0,
        }
    }

    fn test_pool(name: &str) -> NodePool {
        NodePool {
            name: name.to_string(),
            template: NodeTemplate::default(),
            disruption: DisruptionPolicy::default(),
            revision: 0,
        }
    }

    fn test_claim(name: &str, pool: &str) -> NodeClaim {
        NodeClaim {
            name: name.to_string(),
            node_pool: Some(pool.to_string()),
            requirements: vec![],
            template_hash: None,
            created_at: 0,
            status: NodeClaimStatus::default(),
            revision: 0,
        }
    }

    fn walk(store: &RecordStore, name: &str, to: Phase) {
        let mut p = Phase::Pending;
        while p < to {
            p = p.next().unwrap();
            store
                .transition_node_claim(name, p, &Binding::default(), 10)
                .unwrap();
        }
    }

    // ── Revisions ──────────────────────────────────────────────────

    #[test]
    fn every_write_gets_a_fresh_revision() {
        let store = RecordStore::open_in_memory().unwrap();
        let a = store.put_machine(&test_machine("a")).unwrap();
        let b = store.put_machine(&test_machine("b")).unwrap();
        let a2 = store.put_machine(&a).unwrap();

        assert_eq!(a.revision, 1);
        assert_eq!(b.revision, 2);
        assert_eq!(a2.revision, 3);
        assert_eq!(store.current_revision().unwrap(), 3);
    }

    #[test]
    fn delete_reports_revision_only_when_present() {
        let store = RecordStore::open_in_memory().unwrap();
        store.put_machine(&test_machine("a")).unwrap();

        assert_eq!(store.delete_machine("a").unwrap(), Some(2));
        assert_eq!(store.delete_machine("a").unwrap(), None);
        assert!(store.get_machine("a").unwrap().is_none());
    }

    // ── Node claims ────────────────────────────────────────────────

    #[test]
    fn create_stamps_template_hash_and_created_at() {
        let store = RecordStore::open_in_memory().unwrap();
        let pool = store.put_node_pool(&test_pool("default")).unwrap();

        let claim = store
            .create_node_claim(&test_claim("claim-a", "default"), 1234)
            .unwrap();
        assert_eq!(claim.created_at, 1234);
        assert_eq!(claim.template_hash, Some(pool.template_hash()));

        let err = store
            .create_node_claim(&test_claim("claim-a", "default"), 1234)
            .unwrap_err();
        assert!(matches!(err, StateError::AlreadyExists(_)));
    }

    #[test]
    fn condition_write_with_stale_revision_conflicts() {
        let store = RecordStore::open_in_memory().unwrap();
        let claim = store
            .create_node_claim(&test_claim("claim-a", "default"), 1)
            .unwrap();

        let mut conditions = ConditionSet::new();
        conditions.set_true(ConditionType::Empty, "Empty", 5);

        let updated = store
            .update_node_claim_conditions("claim-a", claim.revision, &conditions)
            .unwrap();
        assert!(updated.status.conditions.is_true(ConditionType::Empty));

        // Writing again with the old revision must not clobber.
        let err = store
            .update_node_claim_conditions("claim-a", claim.revision, &ConditionSet::new())
            .unwrap_err();
        assert!(err.is_conflict());
        let stored = store.get_node_claim("claim-a").unwrap().unwrap();
        assert!(stored.status.conditions.is_true(ConditionType::Empty));
    }

    #[test]
    fn node_pool_reference_is_immutable() {
        let store = RecordStore::open_in_memory().unwrap();
        let mut claim = store
            .create_node_claim(&test_claim("claim-a", "default"), 1)
            .unwrap();

        claim.node_pool = Some("other".to_string());
        let err = store.update_node_claim(&claim).unwrap_err();
        assert!(matches!(err, StateError::Immutable(_)));
    }

    #[test]
    fn transition_records_binding() {
        let store = RecordStore::open_in_memory().unwrap();
        store
            .create_node_claim(&test_claim("claim-a", "default"), 1)
            .unwrap();

        let binding = Binding {
            provider_id: Some("fake://a".to_string()),
            node_name: None,
        };
        let claim = store
            .transition_node_claim("claim-a", Phase::Launched, &binding, 2)
            .unwrap();
        assert_eq!(claim.phase(), Phase::Launched);
        assert_eq!(claim.status.provider_id.as_deref(), Some("fake://a"));

        let err = store
            .transition_node_claim("claim-a", Phase::Ready, &Binding::default(), 3)
            .unwrap_err();
        assert!(matches!(err, StateError::Lifecycle(_)));
    }

    #[test]
    fn terminating_claim_cannot_be_rebound_or_retransitioned() {
        let store = RecordStore::open_in_memory().unwrap();
        store
            .create_node_claim(&test_claim("claim-a", "default"), 1)
            .unwrap();
        let launched = Binding {
            provider_id: Some("fake://a".to_string()),
            node_name: Some("node-a".to_string()),
        };
        store
            .transition_node_claim("claim-a", Phase::Launched, &launched, 2)
            .unwrap();
        let terminating = store
            .transition_node_claim("claim-a", Phase::Terminating, &Binding::default(), 3)
            .unwrap();

        let rebind = Binding {
            provider_id: Some("fake://other".to_string()),
            node_name: Some("x".to_string()),
        };
        for (phase, binding) in [
            (Phase::Terminating, &rebind),
            (Phase::Terminating, &Binding::default()),
            (Phase::Terminated, &rebind),
        ] {
            let err = store
                .transition_node_claim("claim-a", phase, binding, 4)
                .unwrap_err();
            assert!(
                matches!(err, StateError::Lifecycle(LifecycleError::Frozen { .. })),
                "{phase:?}: {err}"
            );
        }

        let stored = store.get_node_claim("claim-a").unwrap().unwrap();
        assert_eq!(stored.revision, terminating.revision);
        assert_eq!(stored.status.provider_id.as_deref(), Some("fake://a"));

        // Restating the existing binding does not block the final step.
        let done = store
            .transition_node_claim("claim-a", Phase::Terminated, &launched, 5)
            .unwrap();
        assert_eq!(done.phase(), Phase::Terminated);
        let err = store
            .transition_node_claim("claim-a", Phase::Terminated, &Binding::default(), 6)
            .unwrap_err();
        assert!(matches!(err, StateError::Lifecycle(LifecycleError::Frozen { .. })));
    }

    #[test]
    fn only_terminated_claims_can_be_deleted() {
        let store = RecordStore::open_in_memory().unwrap();
        store
            .create_node_claim(&test_claim("claim-a", "default"), 1)
            .unwrap();
        walk(&store, "claim-a", Phase::Ready);

        assert!(matches!(
            store.delete_node_claim("claim-a").unwrap_err(),
            StateError::NotTerminated(_)
        ));

        walk_terminate(&store, "claim-a");
        assert!(store.delete_node_claim("claim-a").unwrap().is_some());
        assert!(store.delete_node_claim("claim-a").unwrap().is_none());
    }

    fn walk_terminate(store: &RecordStore, name: &str) {
        for p in [Phase::Terminating, Phase::Terminated] {
            store
                .transition_node_claim(name, p, &Binding::default(), 20)
                .unwrap();
        }
    }

    // ── Listing ────────────────────────────────────────────────────

    #[test]
    fn listing_carries_watermark() {
        let store = RecordStore::open_in_memory().unwrap();
        store.put_node_pool(&test_pool("default")).unwrap();
        store.put_machine(&test_machine("a")).unwrap();
        store
            .create_node_claim(&test_claim("claim-a", "default"), 1)
            .unwrap();

        let listing = store.listing().unwrap();
        assert_eq!(listing.revision, 3);
        assert_eq!(listing.machines.len(), 1);
        assert_eq!(listing.node_pools.len(), 1);
        assert_eq!(listing.node_claims.len(), 1);
        assert!(listing.workloads.is_empty());
        assert!(
            listing
                .node_claims
                .iter()
                .all(|c| c.revision <= listing.revision)
        );
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = RecordStore::open(&db_path).unwrap();
            store.put_machine(&test_machine("a")).unwrap();
        }

        // Reopen the same database file; the revision counter continues.
        let store = RecordStore::open(&db_path).unwrap();
        assert!(store.get_machine("a").unwrap().is_some());
        let b = store.put_machine(&test_machine("b")).unwrap();
        assert_eq!(b.revision, 2);
    }
}
