//! fleetgrid-controller — the reconciliation driver.
//!
//! ```text
//! EventSender ─► Ingestor ─► ClusterState ─► WorkQueue ─► Driver workers
//!                                 ▲                          │
//!                  Resyncer ──────┘        RecordStore ◄─────┘
//! ```
//!
//! Ingestion and resync keep the cache current and queue affected
//! claims. Workers evaluate one claim at a time per key and write
//! condition changes back to the record store.

pub mod backoff;
pub mod diagnostics;
pub mod driver;
pub mod error;
pub mod ingest;
pub mod queue;
pub mod resync;

pub use backoff::Backoff;
pub use diagnostics::{Diagnostics, FailureRecord};
pub use driver::{Driver, DriverConfig, Processed};
pub use error::{ControllerError, ControllerResult};
pub use ingest::{EventSender, Ingestor};
pub use queue::WorkQueue;
pub use resync::Resyncer;
