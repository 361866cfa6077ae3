//! Capability traits for terminal protocol clients.
//!
//! These traits use explicit `impl Future + Send` return positions rather
//! than bare `async fn` because client calls are driven from spawned tasks
//! (health cycles, sync passes, bulk executors) and their futures must cross
//! task boundaries.

use crate::error::Result;
use crate::types::{LogPage, TerminalAddress, UserPage, VersionInfo};
use chrono::{DateTime, Utc};
use fleetgate_core::DeviceCapabilities;

/// Live protocol session with one terminal.
///
/// A client exists only while its device is considered connected; the
/// connection manager owns exactly one per device id and drops it on
/// disconnect. `version_info` doubles as the lightweight health probe: it is
/// the cheapest round trip every terminal supports.
pub trait TerminalClient: Send + 'static {
    /// Fetch firmware/algorithm versions. Also used as the health probe.
    fn version_info(&mut self) -> impl Future<Output = Result<VersionInfo>> + Send;

    /// Fetch the feature set the terminal supports.
    fn capabilities(&mut self) -> impl Future<Output = Result<DeviceCapabilities>> + Send;

    /// Fetch one page of the enrolled-user table.
    fn users(&mut self, offset: u32, count: u32) -> impl Future<Output = Result<UserPage>> + Send;

    /// Fetch one page of attendance logs within a time window.
    fn attendance_logs(
        &mut self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        offset: u32,
        count: u32,
    ) -> impl Future<Output = Result<LogPage>> + Send;
}

/// Constructs protocol clients from terminal addresses.
///
/// The factory is the single injection point for the external collaborator:
/// the core supplies only host, port, credential and transport flag, and
/// never reaches past the returned [`TerminalClient`].
pub trait TerminalFactory: Send + Sync + 'static {
    type Client: TerminalClient;

    /// Open a session with the terminal at `address`.
    ///
    /// Implementations should fail fast on unreachable hosts and rejected
    /// credentials; the caller wraps this in its own connect timeout.
    fn create(
        &self,
        address: &TerminalAddress,
    ) -> impl Future<Output = Result<Self::Client>> + Send;
}
