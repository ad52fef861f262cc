//! redb table definitions for the fleetgrid record store.
//!
//! Object tables use `&str` keys and `&[u8]` values (JSON-serialized
//! domain types). Workloads are keyed `{namespace}/{name}`; everything
//! else by name.

use redb::TableDefinition;

/// Machines keyed by node name.
pub const MACHINES: TableDefinition<&str, &[u8]> = TableDefinition::new("machines");

/// Workloads keyed by `{namespace}/{name}`.
pub const WORKLOADS: TableDefinition<&str, &[u8]> = TableDefinition::new("workloads");

/// Node claims keyed by name.
pub const NODE_CLAIMS: TableDefinition<&str, &[u8]> = TableDefinition::new("node_claims");

/// Node pools keyed by name.
pub const NODE_POOLS: TableDefinition<&str, &[u8]> = TableDefinition::new("node_pools");

/// Store-wide counters.
pub const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

/// Key in `META` holding the last assigned revision.
pub const REVISION_KEY: &str = "revision";
