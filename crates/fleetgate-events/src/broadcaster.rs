//! Routes domain events from the internal broadcast channel to observer
//! rooms, and maintains the rolling system-status snapshot.

use crate::messages::{ServerMessage, StatusSnapshot, UNASSIGNED_BRANCH};
use crate::rooms::{Room, RoomRegistry};
use chrono::Utc;
use fleetgate_core::{DeviceId, DeviceStatus, DomainEvent};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Consumes the domain-event stream and fans each event out to the rooms it
/// belongs to.
///
/// Also keeps the per-branch device status snapshot answered on
/// `get_system_status`, built from observed status changes (optionally
/// seeded at startup), and periodically pushes `system_metrics` to every
/// connected observer.
pub struct Broadcaster {
    registry: Arc<RoomRegistry>,
    status: Mutex<StatusSnapshot>,
    events_routed: AtomicU64,
    started_at: Instant,
    metrics_interval: Duration,
}

impl Broadcaster {
    pub fn new(registry: Arc<RoomRegistry>, metrics_interval: Duration) -> Self {
        Self {
            registry,
            status: Mutex::new(StatusSnapshot::new()),
            events_routed: AtomicU64::new(0),
            started_at: Instant::now(),
            metrics_interval,
        }
    }

    /// Record a device's status before any event has been observed for it.
    /// Called once per device when the daemon starts.
    pub async fn seed_status(&self, device_id: &DeviceId, branch: Option<&str>, status: DeviceStatus) {
        let mut snapshot = self.status.lock().await;
        snapshot
            .entry(branch.unwrap_or(UNASSIGNED_BRANCH).to_string())
            .or_default()
            .insert(device_id.to_string(), status);
    }

    /// Current per-branch status snapshot.
    pub async fn snapshot(&self) -> StatusSnapshot {
        self.status.lock().await.clone()
    }

    /// Spawn the routing loop. Stops when `cancel` fires or the event
    /// channel closes.
    pub fn run(
        self: Arc<Self>,
        mut events: broadcast::Receiver<DomainEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut metrics = tokio::time::interval(self.metrics_interval);
            metrics.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so metrics are periodic
            metrics.tick().await;

            info!("Broadcaster started");
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("Broadcaster stopping");
                        break;
                    }
                    received = events.recv() => match received {
                        Ok(event) => self.route(event).await,
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, "Broadcaster lagged behind the event stream");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            info!("Event channel closed, broadcaster stopping");
                            break;
                        }
                    },
                    _ = metrics.tick() => self.push_metrics().await,
                }
            }
        })
    }

    /// Deliver one event to its rooms and fold it into the snapshot.
    pub async fn route(&self, event: DomainEvent) {
        if let DomainEvent::DeviceStatusChanged {
            device_id,
            branch,
            current,
            ..
        } = &event
        {
            let mut snapshot = self.status.lock().await;
            snapshot
                .entry(
                    branch
                        .as_deref()
                        .unwrap_or(UNASSIGNED_BRANCH)
                        .to_string(),
                )
                .or_default()
                .insert(device_id.to_string(), *current);
        }

        let rooms = Self::rooms_for(&event);
        let message = ServerMessage::from_event(event);
        let delivered = self.registry.broadcast(&rooms, &message).await;
        self.events_routed.fetch_add(1, Ordering::Relaxed);
        debug!(?rooms, delivered, "Routed event");
    }

    fn rooms_for(event: &DomainEvent) -> Vec<Room> {
        if event.admin_only() {
            return vec![Room::Admin];
        }
        let mut rooms = vec![Room::Event(event.kind())];
        if let Some(device_id) = event.device_id() {
            rooms.push(Room::Device(device_id.clone()));
        }
        if let Some(branch) = event.branch() {
            rooms.push(Room::Branch(branch.to_string()));
        }
        rooms
    }

    async fn push_metrics(&self) {
        let message = ServerMessage::SystemMetrics {
            connections: self.registry.connection_count().await,
            events_routed: self.events_routed.load(Ordering::Relaxed),
            uptime_secs: self.started_at.elapsed().as_secs(),
            at: Utc::now(),
        };
        self.registry.broadcast_all(&message).await;
    }
}
