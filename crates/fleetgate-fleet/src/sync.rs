//! Attendance and user synchronization.
//!
//! [`SyncEngine`] performs one pass for one device: page through the
//! terminal's user table and recent attendance log, merge users into the
//! employee store, insert unseen attendance entries, and emit the
//! corresponding events. [`DeviceSyncWorker`] is the owner task that decides
//! *when* passes run: immediately when a device connects, then on a
//! recurring per-device deadline from one fleet-wide [`DeadlineQueue`].

use crate::connection::ConnectionManager;
use crate::scheduler::DeadlineQueue;
use chrono::{Duration as ChronoDuration, Utc};
use fleetgate_core::{
    DeviceId, DeviceStatus, DomainEvent, EventSender, Result,
    constants::{DEFAULT_ATTENDANCE_WINDOW_HOURS, DEFAULT_SYNC_INTERVAL_SECS},
};
use fleetgate_protocol::TerminalFactory;
use fleetgate_storage::{
    AttendanceRepository, EmployeeRepository, NewAttendanceEntry, SqliteAttendanceRepository,
    SqliteEmployeeRepository,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::{Id, JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Tuning knobs for sync passes.
#[derive(Debug, Clone)]
pub struct SyncEngineConfig {
    /// How far back each pass looks for attendance entries.
    pub attendance_window: ChronoDuration,
    /// Page size for user and log fetches.
    pub page_size: u32,
}

impl Default for SyncEngineConfig {
    fn default() -> Self {
        Self {
            attendance_window: ChronoDuration::hours(DEFAULT_ATTENDANCE_WINDOW_HOURS),
            page_size: 100,
        }
    }
}

/// Counters from one completed sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub users_merged: usize,
    pub entries_inserted: usize,
    pub errors: usize,
}

/// Performs single sync passes against one device at a time.
pub struct SyncEngine<F: TerminalFactory> {
    manager: Arc<ConnectionManager<F>>,
    employees: SqliteEmployeeRepository,
    attendance: SqliteAttendanceRepository,
    events: EventSender,
    config: SyncEngineConfig,
}

impl<F: TerminalFactory> SyncEngine<F> {
    pub fn new(
        manager: Arc<ConnectionManager<F>>,
        employees: SqliteEmployeeRepository,
        attendance: SqliteAttendanceRepository,
        events: EventSender,
        config: SyncEngineConfig,
    ) -> Self {
        Self {
            manager,
            employees,
            attendance,
            events,
            config,
        }
    }

    fn emit(&self, event: DomainEvent) {
        let _ = self.events.send(event);
    }

    /// Run one full pass for a device: users first, then the attendance
    /// window. Per-item failures are counted and logged; only a failed page
    /// fetch aborts the pass.
    pub async fn sync_device(&self, id: &DeviceId) -> Result<SyncReport> {
        let mut report = SyncReport::default();

        let mut offset = 0;
        loop {
            let page = self
                .manager
                .fetch_users(id, offset, self.config.page_size)
                .await?;
            for user in &page.users {
                match self.merge_user(&user.id, &user.name, user.department.as_deref()).await {
                    Ok(true) => report.users_merged += 1,
                    Ok(false) => {}
                    Err(e) => {
                        report.errors += 1;
                        warn!(device_id = %id, terminal_user_id = %user.id, "User merge failed: {e}");
                    }
                }
            }
            match page.next_offset {
                Some(next) => offset = next,
                None => break,
            }
        }

        let end = Utc::now();
        let start = end - self.config.attendance_window;
        let mut offset = 0;
        loop {
            let page = self
                .manager
                .fetch_attendance(id, start, end, offset, self.config.page_size)
                .await?;
            for record in &page.records {
                match self.ingest_record(id, record).await {
                    Ok(true) => {
                        report.entries_inserted += 1;
                        self.emit(DomainEvent::UserVerification {
                            device_id: id.clone(),
                            terminal_user_id: record.user_id.clone(),
                            verified_at: record.timestamp,
                            method: record.method.clone(),
                        });
                    }
                    Ok(false) => {}
                    Err(e) => {
                        report.errors += 1;
                        warn!(device_id = %id, "Attendance insert failed: {e}");
                    }
                }
            }
            match page.next_offset {
                Some(next) => offset = next,
                None => break,
            }
        }

        self.emit(DomainEvent::SyncCompleted {
            device_id: id.clone(),
            users_merged: report.users_merged,
            entries_inserted: report.entries_inserted,
            errors: report.errors,
            at: Utc::now(),
        });
        info!(
            device_id = %id,
            users = report.users_merged,
            entries = report.entries_inserted,
            errors = report.errors,
            "Sync pass completed"
        );
        Ok(report)
    }

    /// Insert a new employee or refresh an existing one's name. Returns true
    /// when anything was written.
    async fn merge_user(
        &self,
        terminal_user_id: &str,
        name: &str,
        department: Option<&str>,
    ) -> Result<bool> {
        let existing = self
            .employees
            .find_by_terminal_user_id(terminal_user_id)
            .await
            .map_err(|e| fleetgate_core::Error::Storage(e.to_string()))?;

        match existing {
            None => {
                self.employees
                    .create(terminal_user_id, name, department)
                    .await
                    .map_err(|e| fleetgate_core::Error::Storage(e.to_string()))?;
                Ok(true)
            }
            Some(employee) if employee.name != name => {
                self.employees
                    .update_name(terminal_user_id, name)
                    .await
                    .map_err(|e| fleetgate_core::Error::Storage(e.to_string()))?;
                Ok(true)
            }
            Some(_) => Ok(false),
        }
    }

    /// Store an attendance record unless the same (user, device, timestamp)
    /// was already ingested. Returns true on a fresh insert.
    async fn ingest_record(
        &self,
        device_id: &DeviceId,
        record: &fleetgate_protocol::AttendanceRecord,
    ) -> Result<bool> {
        let seen = self
            .attendance
            .exists(&record.user_id, device_id.as_str(), record.timestamp)
            .await
            .map_err(|e| fleetgate_core::Error::Storage(e.to_string()))?;
        if seen {
            return Ok(false);
        }
        self.attendance
            .insert(&NewAttendanceEntry {
                terminal_user_id: record.user_id.clone(),
                device_id: device_id.to_string(),
                verified_at: record.timestamp,
                method: record.method.clone(),
            })
            .await
            .map_err(|e| fleetgate_core::Error::Storage(e.to_string()))?;
        Ok(true)
    }
}

/// Owner task scheduling sync passes across the fleet.
///
/// Reacts to status events: a device turning Connected gets an immediate
/// pass and a recurring schedule; a device turning Disconnected has its
/// schedule cancelled. A device already mid-pass is skipped, never queued
/// twice.
pub struct DeviceSyncWorker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl DeviceSyncWorker {
    /// Spawn the worker. `interval` is the recurring per-device pass cadence.
    pub fn spawn<F: TerminalFactory>(
        engine: Arc<SyncEngine<F>>,
        events: broadcast::Receiver<DomainEvent>,
        interval: Duration,
    ) -> Self {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_worker(engine, events, interval, cancel.clone()));
        Self { cancel, handle }
    }

    /// Default recurring cadence.
    pub fn default_interval() -> Duration {
        Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS)
    }

    /// Cancel the schedule and wait for the worker to wind down.
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}

async fn run_worker<F: TerminalFactory>(
    engine: Arc<SyncEngine<F>>,
    mut events: broadcast::Receiver<DomainEvent>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut queue = DeadlineQueue::new();
    // Devices that should keep a recurring schedule
    let mut active: HashSet<DeviceId> = HashSet::new();
    let mut in_flight: HashSet<DeviceId> = HashSet::new();
    let mut passes: JoinSet<DeviceId> = JoinSet::new();
    // Task id -> device, so a panicked pass still frees its device
    let mut pass_ids: HashMap<Id, DeviceId> = HashMap::new();

    info!("Sync worker started");
    loop {
        let deadline = queue.next_deadline();
        tokio::select! {
            () = cancel.cancelled() => break,

            received = events.recv() => match received {
                Ok(DomainEvent::DeviceStatusChanged { device_id, current, .. }) => match current {
                    DeviceStatus::Connected => {
                        active.insert(device_id.clone());
                        if in_flight.contains(&device_id) {
                            debug!(device_id = %device_id, "Pass already in flight, skipping");
                        } else {
                            start_pass(&engine, &mut passes, &mut pass_ids, &mut in_flight, device_id);
                        }
                    }
                    DeviceStatus::Disconnected => {
                        active.remove(&device_id);
                        queue.cancel(&device_id);
                    }
                    _ => {}
                },
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "Sync worker lagged behind the event stream");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },

            () = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            } => {
                let now = Instant::now();
                while let Some(device_id) = queue.pop_due(now) {
                    if !active.contains(&device_id) {
                        continue;
                    }
                    if in_flight.contains(&device_id) {
                        debug!(device_id = %device_id, "Pass already in flight, skipping");
                        continue;
                    }
                    start_pass(&engine, &mut passes, &mut pass_ids, &mut in_flight, device_id);
                }
            }

            Some(joined) = passes.join_next_with_id() => {
                let device_id = match joined {
                    Ok((task_id, device_id)) => {
                        pass_ids.remove(&task_id);
                        Some(device_id)
                    }
                    Err(e) => {
                        warn!("Sync pass task panicked: {e}");
                        pass_ids.remove(&e.id())
                    }
                };
                if let Some(device_id) = device_id {
                    in_flight.remove(&device_id);
                    if active.contains(&device_id) {
                        queue.schedule(device_id, Instant::now() + interval);
                    }
                }
            }
        }
    }
    info!("Sync worker stopped");
}

fn start_pass<F: TerminalFactory>(
    engine: &Arc<SyncEngine<F>>,
    passes: &mut JoinSet<DeviceId>,
    pass_ids: &mut HashMap<Id, DeviceId>,
    in_flight: &mut HashSet<DeviceId>,
    device_id: DeviceId,
) {
    in_flight.insert(device_id.clone());
    let engine = Arc::clone(engine);
    let task_device = device_id.clone();
    let handle = passes.spawn(async move {
        if let Err(e) = engine.sync_device(&task_device).await {
            warn!(device_id = %task_device, "Sync pass failed: {e}");
        }
        task_device
    });
    pass_ids.insert(handle.id(), device_id);
}
