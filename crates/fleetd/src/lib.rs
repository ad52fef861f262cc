//! fleetd library surface: configuration and subsystem wiring, shared
//! by the binary and its integration tests.

pub mod config;
pub mod fleet;

pub use config::FleetdConfig;
pub use fleet::Fleet;
