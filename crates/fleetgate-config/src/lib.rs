//! Durable device/group/template records for the fleet.
//!
//! The [`ConfigStore`] is the single owner of every [`DeviceConfig`]: the
//! connection manager never holds its own copy and may only request mutation
//! of the connection-derived fields (`status`, `last_connected`,
//! `capabilities`) through [`ConfigStore::record_connection_state`].
//!
//! # Persistence model
//!
//! Three independent collections (devices, groups, templates) each live in
//! memory and are rewritten as a complete JSON snapshot after every mutating
//! call: serialize to a temp file in the target directory, then atomic
//! rename. There is no incremental diffing and no index structure; filtering
//! is in-memory predicate evaluation, which is fine at fleet scale.
//!
//! A failed snapshot write is logged and swallowed: memory stays the source
//! of truth until the next successful write. Callers only ever see
//! `DuplicateId`/`NotFound` style errors.

pub mod models;
pub mod snapshot;
pub mod store;

pub use fleetgate_core::{Error, Result};
pub use models::{
    DeviceConfig, DeviceConfigUpdate, DeviceFilter, DeviceGroup, DeviceGroupUpdate, DeviceTemplate,
};
pub use snapshot::SnapshotStore;
pub use store::ConfigStore;
