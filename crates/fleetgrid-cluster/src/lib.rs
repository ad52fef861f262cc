//! fleetgrid-cluster — the live fleet view the disruption logic reads.
//!
//! `ClusterState` is constructed once by the daemon and shared by
//! reference; there is no global instance. It is fed by change events
//! and periodic listings, and read through `ClaimView` (one claim and
//! everything it touches) or `ClusterSnapshot` (the whole cache).

pub mod clock;
pub mod nomination;
pub mod state;
pub mod view;

pub use clock::{Clock, FakeClock, SystemClock, epoch_secs};
pub use nomination::{MAX_NOMINATION_TTL, Nomination, NominationLedger};
pub use state::{ClusterState, ObjectKind, ResyncReport};
pub use view::{ClaimView, ClusterSnapshot, SnapshotSummary};
