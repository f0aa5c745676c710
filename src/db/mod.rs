//! Database module: entity models and SQL repositories.
//!
//! - `model`: typed rows returned by repositories.
//! - `repo`: pool setup, migrations and the delivery task queue.
//! - `devices`: the device registry.
//! - `batches`: persisted multicast batches.
//! - `snapshot`: the last change set seen by the change detector.
//!
//! Callers import from `change_notifier::db`; the repository API is
//! re-exported here.

pub mod batches;
pub mod devices;
pub mod model;
pub mod repo;
pub mod snapshot;

pub use batches::*;
pub use devices::*;
pub use repo::*;
pub use snapshot::*;

pub use model::{DeviceRecord, QueuedTask};
