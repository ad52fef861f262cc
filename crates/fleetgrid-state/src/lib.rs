//! fleetgrid-state — domain model and record store for fleetgrid.
//!
//! Holds the types every other crate speaks: machines, workloads, node
//! pools (fleet policies), node claims (provisioning records) and their
//! status conditions, plus the change events that carry them.
//!
//! # Architecture
//!
//! ```text
//! types       Machine, Workload, NodePool, NodeClaim
//! conditions  ConditionSet (typed, deterministic ordering)
//! lifecycle   Pending → Launched → … → Terminated, side conditions
//! event       ChangeEvent / Change<T> (the change feed)
//! store       RecordStore: redb-backed stand-in for the control plane
//! ```
//!
//! The `RecordStore` assigns a single monotonically increasing revision
//! to every write, so per-object ordering and listing watermarks can be
//! compared directly.

pub mod conditions;
pub mod duration;
pub mod error;
pub mod event;
pub mod lifecycle;
pub mod store;
pub mod tables;
pub mod types;

pub use conditions::{Condition, ConditionSet, ConditionStatus, ConditionType, ConditionUpdate};
pub use duration::{Budget, ConsolidateAfter, parse_duration};
pub use error::{StateError, StateResult};
pub use event::{Change, ChangeEvent, FleetListing};
pub use lifecycle::{LifecycleError, Phase};
pub use store::{Binding, RecordStore};
pub use types::*;
