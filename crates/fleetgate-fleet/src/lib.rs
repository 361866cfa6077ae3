//! Fleet runtime: connection lifecycle, health probing, bulk operations and
//! attendance synchronization.
//!
//! The [`ConnectionManager`] owns every live terminal session and is the
//! only component that moves device status. The [`HealthMonitor`] drives its
//! probe cycle on a fixed interval; the [`BulkOperationCoordinator`] runs
//! multi-device operations sequentially in detached tasks; the
//! [`DeviceSyncWorker`] pulls users and attendance logs from connected
//! terminals on a single fleet-wide deadline queue.
//!
//! Errors follow one rule throughout: operations with a waiting caller
//! return `Err`, background loops convert failures into state and events.

pub mod bulk;
pub mod connection;
pub mod health;
pub mod scheduler;
pub mod sync;

pub use bulk::{
    BulkOperation, BulkOperationCoordinator, BulkOperationKind, BulkOperationStatus,
    BulkStepResult,
};
pub use connection::{ConnectionManager, ConnectionManagerConfig, ProbeReport};
pub use fleetgate_core::{Error, Result};
pub use health::HealthMonitor;
pub use scheduler::DeadlineQueue;
pub use sync::{DeviceSyncWorker, SyncEngine, SyncEngineConfig, SyncReport};
