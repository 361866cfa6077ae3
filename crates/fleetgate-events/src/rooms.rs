//! Explicit room membership for observer connections.
//!
//! Rooms are the only routing mechanism: a connection receives an event if
//! and only if it is a member of at least one room the event is published
//! to. All membership state lives behind a single mutex so joins, leaves,
//! disconnects, and fan-outs observe one consistent picture.

use crate::auth::ObserverRole;
use crate::messages::ServerMessage;
use chrono::Utc;
use fleetgate_core::{DeviceId, EventKind};
use std::collections::{HashMap, HashSet};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info};
use uuid::Uuid;

/// Identifier for one observer connection.
pub type ConnectionId = Uuid;

/// Subscription rooms an observer can be a member of.
///
/// `Admin` is never joined explicitly; admin-role connections belong to it
/// implicitly for as long as they are connected.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Room {
    Event(EventKind),
    Device(DeviceId),
    Branch(String),
    Admin,
}

struct ConnectionState {
    role: ObserverRole,
    sender: mpsc::UnboundedSender<ServerMessage>,
    rooms: HashSet<Room>,
}

#[derive(Default)]
struct Inner {
    connections: HashMap<ConnectionId, ConnectionState>,
    rooms: HashMap<Room, HashSet<ConnectionId>>,
}

impl Inner {
    /// Connection ids that should receive a message published to `rooms`,
    /// each id at most once.
    fn recipients(&self, rooms: &[Room]) -> HashSet<ConnectionId> {
        let mut out = HashSet::new();
        for room in rooms {
            match room {
                Room::Admin => {
                    out.extend(
                        self.connections
                            .iter()
                            .filter(|(_, state)| state.role == ObserverRole::Admin)
                            .map(|(id, _)| *id),
                    );
                }
                other => {
                    if let Some(members) = self.rooms.get(other) {
                        out.extend(members.iter().copied());
                    }
                }
            }
        }
        out
    }

    fn drop_connection(&mut self, id: ConnectionId) -> Option<ConnectionState> {
        let state = self.connections.remove(&id)?;
        for room in &state.rooms {
            if let Some(members) = self.rooms.get_mut(room) {
                members.remove(&id);
                if members.is_empty() {
                    self.rooms.remove(room);
                }
            }
        }
        Some(state)
    }
}

/// Registry of authenticated observer connections and their rooms.
pub struct RoomRegistry {
    inner: Mutex<Inner>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Register an authenticated connection and hand back its outbound queue.
    pub async fn register(
        &self,
        role: ObserverRole,
    ) -> (ConnectionId, mpsc::UnboundedReceiver<ServerMessage>) {
        let id = Uuid::new_v4();
        let (sender, receiver) = mpsc::unbounded_channel();

        let mut inner = self.inner.lock().await;
        inner.connections.insert(
            id,
            ConnectionState {
                role,
                sender,
                rooms: HashSet::new(),
            },
        );
        info!(connection_id = %id, ?role, total = inner.connections.len(), "Observer registered");
        (id, receiver)
    }

    /// Remove a connection and release all of its room memberships.
    pub async fn remove(&self, id: ConnectionId) {
        let mut inner = self.inner.lock().await;
        if inner.drop_connection(id).is_some() {
            info!(connection_id = %id, total = inner.connections.len(), "Observer removed");
        }
    }

    /// Join a room. No-op when already a member or when the connection is
    /// gone. Joining `Room::Admin` is rejected; admin membership is by role.
    pub async fn join(&self, id: ConnectionId, room: Room) -> bool {
        if room == Room::Admin {
            return false;
        }
        let mut inner = self.inner.lock().await;
        let inner = &mut *inner;
        let Some(state) = inner.connections.get_mut(&id) else {
            return false;
        };
        if state.rooms.insert(room.clone()) {
            inner.rooms.entry(room.clone()).or_default().insert(id);
            debug!(connection_id = %id, ?room, "Joined room");
        }
        true
    }

    /// Leave a room. Returns false when the connection was not a member.
    pub async fn leave(&self, id: ConnectionId, room: &Room) -> bool {
        let mut inner = self.inner.lock().await;
        let inner = &mut *inner;
        let Some(state) = inner.connections.get_mut(&id) else {
            return false;
        };
        if !state.rooms.remove(room) {
            return false;
        }
        if let Some(members) = inner.rooms.get_mut(room) {
            members.remove(&id);
            if members.is_empty() {
                inner.rooms.remove(room);
            }
        }
        debug!(connection_id = %id, ?room, "Left room");
        true
    }

    /// Deliver `message` once to every connection in any of `rooms`.
    ///
    /// Returns the number of connections the message was queued for. Send
    /// failures mean the connection task has already exited; the entry is
    /// cleaned up on its disconnect path.
    pub async fn broadcast(&self, rooms: &[Room], message: &ServerMessage) -> usize {
        let inner = self.inner.lock().await;
        let recipients = inner.recipients(rooms);
        let mut delivered = 0;
        for id in recipients {
            if let Some(state) = inner.connections.get(&id)
                && state.sender.send(message.clone()).is_ok()
            {
                delivered += 1;
            }
        }
        delivered
    }

    /// Deliver `message` to every authenticated connection.
    pub async fn broadcast_all(&self, message: &ServerMessage) -> usize {
        let inner = self.inner.lock().await;
        let mut delivered = 0;
        for state in inner.connections.values() {
            if state.sender.send(message.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Send a message to one connection.
    pub async fn send_to(&self, id: ConnectionId, message: ServerMessage) -> bool {
        let inner = self.inner.lock().await;
        inner
            .connections
            .get(&id)
            .is_some_and(|state| state.sender.send(message).is_ok())
    }

    /// Notify a connection it is being dropped, then remove it. Closing its
    /// outbound queue makes the connection task shut the socket down.
    pub async fn force_disconnect(&self, id: ConnectionId, reason: impl Into<String>) -> bool {
        let mut inner = self.inner.lock().await;
        let Some(state) = inner.drop_connection(id) else {
            return false;
        };
        let _ = state.sender.send(ServerMessage::ForceDisconnect {
            reason: reason.into(),
            at: Utc::now(),
        });
        info!(connection_id = %id, "Observer force-disconnected");
        true
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.lock().await.connections.len()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ping() -> ServerMessage {
        ServerMessage::Pong { at: Utc::now() }
    }

    fn device(id: &str) -> DeviceId {
        DeviceId::new(id).unwrap()
    }

    #[tokio::test]
    async fn test_broadcast_reaches_room_members_only() {
        let registry = RoomRegistry::new();
        let (a, mut rx_a) = registry.register(ObserverRole::Observer).await;
        let (_b, mut rx_b) = registry.register(ObserverRole::Observer).await;

        registry.join(a, Room::Device(device("door-01"))).await;

        let delivered = registry
            .broadcast(&[Room::Device(device("door-01"))], &ping())
            .await;
        assert_eq!(delivered, 1);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_overlapping_rooms_deliver_once() {
        let registry = RoomRegistry::new();
        let (a, mut rx_a) = registry.register(ObserverRole::Observer).await;

        registry.join(a, Room::Device(device("door-01"))).await;
        registry
            .join(a, Room::Event(EventKind::DeviceStatusChange))
            .await;

        let delivered = registry
            .broadcast(
                &[
                    Room::Event(EventKind::DeviceStatusChange),
                    Room::Device(device("door-01")),
                ],
                &ping(),
            )
            .await;
        assert_eq!(delivered, 1);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_admin_room_is_role_based() {
        let registry = RoomRegistry::new();
        let (admin, mut rx_admin) = registry.register(ObserverRole::Admin).await;
        let (observer, mut rx_observer) = registry.register(ObserverRole::Observer).await;

        // Neither connection can join the admin room explicitly
        assert!(!registry.join(admin, Room::Admin).await);
        assert!(!registry.join(observer, Room::Admin).await);

        registry.broadcast(&[Room::Admin], &ping()).await;
        assert!(rx_admin.try_recv().is_ok());
        assert!(rx_observer.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_remove_releases_memberships() {
        let registry = RoomRegistry::new();
        let (a, _rx) = registry.register(ObserverRole::Observer).await;
        registry.join(a, Room::Branch("hq".to_string())).await;

        registry.remove(a).await;
        assert_eq!(registry.connection_count().await, 0);
        let delivered = registry
            .broadcast(&[Room::Branch("hq".to_string())], &ping())
            .await;
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn test_leave_without_membership_is_false() {
        let registry = RoomRegistry::new();
        let (a, _rx) = registry.register(ObserverRole::Observer).await;
        assert!(!registry.leave(a, &Room::Branch("hq".to_string())).await);
    }

    #[tokio::test]
    async fn test_force_disconnect_sends_notice_and_removes() {
        let registry = RoomRegistry::new();
        let (a, mut rx) = registry.register(ObserverRole::Observer).await;

        assert!(registry.force_disconnect(a, "rotated token").await);
        assert!(matches!(
            rx.try_recv(),
            Ok(ServerMessage::ForceDisconnect { .. })
        ));
        assert_eq!(registry.connection_count().await, 0);
        assert!(!registry.force_disconnect(a, "again").await);
    }
}
