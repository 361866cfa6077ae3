//! Connection lifecycle for the terminal fleet.
//!
//! The manager holds at most one live protocol client per device id and is
//! the sole writer of device status. All status mutations flow through
//! [`ConfigStore::record_connection_state`], and a `DeviceStatusChanged`
//! event is emitted only when the persisted status actually changed.
//!
//! The handle map sits behind one mutex: device I/O through a handle
//! (probes, page fetches) happens under the lock, which serializes traffic
//! per fleet and guarantees a handle is never used while being replaced.

use chrono::Utc;
use fleetgate_config::{ConfigStore, DeviceConfig, DeviceConfigUpdate, DeviceFilter};
use fleetgate_core::{
    DeviceHealth, DeviceId, DeviceStatus, DomainEvent, Error, EventSender, Result,
    constants::{DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_PROBE_TIMEOUT_SECS},
};
use fleetgate_protocol::{LogPage, TerminalClient, TerminalFactory, UserPage};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Timeouts for connection establishment and probes.
#[derive(Debug, Clone)]
pub struct ConnectionManagerConfig {
    /// Ceiling on factory create plus handshake.
    pub connect_timeout: Duration,
    /// Ceiling on a single health probe round trip.
    pub probe_timeout: Duration,
}

impl Default for ConnectionManagerConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            probe_timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
        }
    }
}

/// Outcome of an on-demand connectivity probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub success: bool,
    /// Round-trip time of the probe when it succeeded.
    pub latency: Option<Duration>,
}

/// Owns live terminal sessions and drives the device status state machine.
pub struct ConnectionManager<F: TerminalFactory> {
    store: Arc<ConfigStore>,
    factory: F,
    handles: Mutex<HashMap<DeviceId, F::Client>>,
    health: Mutex<HashMap<DeviceId, DeviceHealth>>,
    events: EventSender,
    config: ConnectionManagerConfig,
}

impl<F: TerminalFactory> ConnectionManager<F> {
    pub fn new(
        store: Arc<ConfigStore>,
        factory: F,
        events: EventSender,
        config: ConnectionManagerConfig,
    ) -> Self {
        Self {
            store,
            factory,
            handles: Mutex::new(HashMap::new()),
            health: Mutex::new(HashMap::new()),
            events,
            config,
        }
    }

    fn emit(&self, event: DomainEvent) {
        // A send error just means nobody is listening right now
        let _ = self.events.send(event);
    }

    /// Persist a status transition and emit a change event when the status
    /// actually moved.
    async fn transition(
        &self,
        config: &DeviceConfig,
        status: DeviceStatus,
        connected_now: bool,
        capabilities: Option<fleetgate_core::DeviceCapabilities>,
    ) -> Result<()> {
        let last_connected = connected_now.then(Utc::now);
        let previous = self
            .store
            .record_connection_state(&config.id, status, last_connected, capabilities)
            .await?;
        if previous != status {
            self.emit(DomainEvent::DeviceStatusChanged {
                device_id: config.id.clone(),
                branch: config.branch.clone(),
                previous,
                current: status,
                at: Utc::now(),
            });
        }
        Ok(())
    }

    async fn record_health_success(&self, id: &DeviceId, latency: Duration) {
        let mut health = self.health.lock().await;
        health
            .entry(id.clone())
            .or_insert_with(|| DeviceHealth::new(id.clone()))
            .record_success(latency.as_millis() as u64);
    }

    async fn record_health_failure(&self, id: &DeviceId, error: &str) {
        let mut health = self.health.lock().await;
        health
            .entry(id.clone())
            .or_insert_with(|| DeviceHealth::new(id.clone()))
            .record_failure(error);
    }

    /// Connect to a device.
    ///
    /// Any stale handle for the id is discarded first, so a second connect
    /// replaces the session rather than leaking one. The status moves to
    /// Connecting before the attempt, then to Connected or Error.
    ///
    /// # Errors
    /// `DeviceNotFound` for unknown ids, `ConnectionFailed` when the factory
    /// or handshake fails or the connect timeout expires.
    pub async fn connect(&self, id: &DeviceId) -> Result<()> {
        let config = self
            .store
            .get_device(id)
            .await
            .ok_or_else(|| Error::DeviceNotFound(id.to_string()))?;

        self.handles.lock().await.remove(id);
        self.transition(&config, DeviceStatus::Connecting, false, None)
            .await?;

        let attempt = async {
            let mut client = self.factory.create(&config.address).await?;
            let started = Instant::now();
            client.version_info().await?;
            let latency = started.elapsed();
            let capabilities = client.capabilities().await?;
            Ok::<_, fleetgate_protocol::ProtocolError>((client, latency, capabilities))
        };

        let outcome = match timeout(self.config.connect_timeout, attempt).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!(
                "connect timed out after {:?}",
                self.config.connect_timeout
            )),
        };

        match outcome {
            Ok((client, latency, capabilities)) => {
                self.handles.lock().await.insert(id.clone(), client);
                self.record_health_success(id, latency).await;
                self.transition(&config, DeviceStatus::Connected, true, Some(capabilities))
                    .await?;
                info!(device_id = %id, address = %config.address, "Device connected");
                Ok(())
            }
            Err(message) => {
                self.record_health_failure(id, &message).await;
                self.transition(&config, DeviceStatus::Error, false, None)
                    .await?;
                warn!(device_id = %id, "Connect failed: {message}");
                Err(Error::connection_failed(id.to_string(), message))
            }
        }
    }

    /// Drop a device's session.
    ///
    /// Idempotent; returns `true` only when a handle actually existed. The
    /// persisted status moves to Disconnected on that path only.
    pub async fn disconnect(&self, id: &DeviceId) -> Result<bool> {
        let existed = self.handles.lock().await.remove(id).is_some();
        if !existed {
            return Ok(false);
        }
        if let Some(config) = self.store.get_device(id).await {
            self.transition(&config, DeviceStatus::Disconnected, false, None)
                .await?;
        }
        info!(device_id = %id, "Device disconnected");
        Ok(true)
    }

    /// Apply a partial config update.
    ///
    /// The store merge commits first; if a connection-relevant address field
    /// changed value and a session is live, the device is reconnected on a
    /// best-effort basis; a reconnect failure is logged, not returned.
    pub async fn update_config(
        &self,
        id: &DeviceId,
        update: &DeviceConfigUpdate,
    ) -> Result<DeviceConfig> {
        let (updated, address_changed) = self.store.update_device(id, update).await?;

        if address_changed && self.handles.lock().await.contains_key(id) {
            info!(device_id = %id, "Address changed, reconnecting");
            if let Err(e) = self.connect(id).await {
                warn!(device_id = %id, "Reconnect after config change failed: {e}");
            }
        }
        Ok(updated)
    }

    /// Remove a device entirely: session, config record (which prunes group
    /// memberships) and health history.
    pub async fn remove_device(&self, id: &DeviceId) -> Result<()> {
        self.handles.lock().await.remove(id);
        self.store.delete_device(id).await?;
        self.health.lock().await.remove(id);
        info!(device_id = %id, "Device removed");
        Ok(())
    }

    /// Probe a device on demand.
    ///
    /// Updates the health record either way; the persisted status is not
    /// touched, this is a read-only check from the caller's point of view.
    ///
    /// # Errors
    /// `NotConnected` when no session is held for the id.
    pub async fn test_connection(&self, id: &DeviceId) -> Result<ProbeReport> {
        let mut handles = self.handles.lock().await;
        let client = handles
            .get_mut(id)
            .ok_or_else(|| Error::NotConnected(id.to_string()))?;

        let started = Instant::now();
        let result = timeout(self.config.probe_timeout, client.version_info()).await;
        let latency = started.elapsed();
        drop(handles);

        match result {
            Ok(Ok(_)) => {
                self.record_health_success(id, latency).await;
                Ok(ProbeReport {
                    success: true,
                    latency: Some(latency),
                })
            }
            Ok(Err(e)) => {
                self.record_health_failure(id, &e.to_string()).await;
                Ok(ProbeReport {
                    success: false,
                    latency: None,
                })
            }
            Err(_) => {
                self.record_health_failure(id, "probe timed out").await;
                Ok(ProbeReport {
                    success: false,
                    latency: None,
                })
            }
        }
    }

    /// Probe every held session once. Health monitor entry point.
    ///
    /// A failed probe demotes the device to Error but keeps the handle, so
    /// the next cycle can observe recovery without a reconnect. A
    /// `DeviceHealthUpdated` event is emitted per probed device.
    pub async fn probe_connected(&self) -> usize {
        let ids: Vec<DeviceId> = self.handles.lock().await.keys().cloned().collect();
        let mut probed = 0;

        for id in ids {
            let Some(config) = self.store.get_device(&id).await else {
                continue;
            };

            let result = {
                let mut handles = self.handles.lock().await;
                let Some(client) = handles.get_mut(&id) else {
                    continue;
                };
                let started = Instant::now();
                let outcome = timeout(self.config.probe_timeout, client.version_info()).await;
                (outcome, started.elapsed())
            };
            probed += 1;

            match result {
                (Ok(Ok(_)), latency) => {
                    self.record_health_success(&id, latency).await;
                    debug!(device_id = %id, latency_ms = latency.as_millis() as u64, "Probe ok");
                }
                (Ok(Err(e)), _) => {
                    self.record_health_failure(&id, &e.to_string()).await;
                    if let Err(e) = self.transition(&config, DeviceStatus::Error, false, None).await
                    {
                        warn!(device_id = %id, "Failed to record probe failure: {e}");
                    }
                }
                (Err(_), _) => {
                    self.record_health_failure(&id, "probe timed out").await;
                    if let Err(e) = self.transition(&config, DeviceStatus::Error, false, None).await
                    {
                        warn!(device_id = %id, "Failed to record probe failure: {e}");
                    }
                }
            }

            if let Some(health) = self.health.lock().await.get(&id) {
                self.emit(DomainEvent::DeviceHealthUpdated {
                    device_id: id.clone(),
                    branch: config.branch.clone(),
                    latency_ms: health.latency_ms,
                    error_count: health.error_count,
                    last_error: health.last_error.clone(),
                    at: Utc::now(),
                });
            }
        }
        probed
    }

    /// Fetch one page of enrolled users through the device's session.
    pub async fn fetch_users(&self, id: &DeviceId, offset: u32, count: u32) -> Result<UserPage> {
        let mut handles = self.handles.lock().await;
        let client = handles
            .get_mut(id)
            .ok_or_else(|| Error::NotConnected(id.to_string()))?;
        client
            .users(offset, count)
            .await
            .map_err(|e| Error::Protocol(e.to_string()))
    }

    /// Fetch one page of attendance logs through the device's session.
    pub async fn fetch_attendance(
        &self,
        id: &DeviceId,
        start: chrono::DateTime<Utc>,
        end: chrono::DateTime<Utc>,
        offset: u32,
        count: u32,
    ) -> Result<LogPage> {
        let mut handles = self.handles.lock().await;
        let client = handles
            .get_mut(id)
            .ok_or_else(|| Error::NotConnected(id.to_string()))?;
        client
            .attendance_logs(start, end, offset, count)
            .await
            .map_err(|e| Error::Protocol(e.to_string()))
    }

    pub async fn is_connected(&self, id: &DeviceId) -> bool {
        self.handles.lock().await.contains_key(id)
    }

    pub async fn connected_devices(&self) -> Vec<DeviceId> {
        self.handles.lock().await.keys().cloned().collect()
    }

    /// Health record for one device, when any probe or connect has touched it.
    pub async fn health(&self, id: &DeviceId) -> Option<DeviceHealth> {
        self.health.lock().await.get(id).cloned()
    }

    pub async fn all_health(&self) -> Vec<DeviceHealth> {
        self.health.lock().await.values().cloned().collect()
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }
}

impl<F: TerminalFactory> ConnectionManager<F> {
    /// Connect every auto-reconnect device concurrently.
    ///
    /// Per-device failures are isolated and logged; returns the number of
    /// successful connects.
    pub async fn reconnect_all(self: &Arc<Self>) -> usize {
        let filter = DeviceFilter {
            active: Some(true),
            ..DeviceFilter::default()
        };
        let configs = self.store.list_devices(&filter).await;
        info!("Reconnecting {} auto-reconnect devices", configs.len());

        let mut tasks = JoinSet::new();
        for config in configs {
            let manager = Arc::clone(self);
            tasks.spawn(async move {
                let id = config.id.clone();
                let result = manager.connect(&id).await;
                (id, result)
            });
        }

        let mut connected = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => connected += 1,
                Ok((id, Err(e))) => warn!(device_id = %id, "Startup connect failed: {e}"),
                Err(e) => warn!("Startup connect task panicked: {e}"),
            }
        }
        connected
    }
}
