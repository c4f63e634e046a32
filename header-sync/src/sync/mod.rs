//! Header synchronization state machine and its periodic driver.

pub mod coordinator;
pub mod driver;
pub mod state;

pub use coordinator::{BatchOutcome, HeaderSyncCoordinator};
pub use driver::{MAINTENANCE_INTERVAL, spawn_maintenance};
pub use state::SyncState;
