//! Authenticated TCP server for observer connections.
//!
//! Each accepted socket gets its own task. The task enforces the auth gate
//! (first frame must be a valid `auth` within the deadline), registers the
//! connection with the [`RoomRegistry`], then pumps two streams: room
//! broadcasts out of the connection's queue, and client requests off the
//! socket. No room exists for a connection until authentication succeeds.

use crate::auth::TokenValidator;
use crate::broadcaster::Broadcaster;
use crate::codec::WireCodec;
use crate::error::{EventServerError, Result};
use crate::messages::{ClientMessage, ServerMessage};
use crate::rooms::{Room, RoomRegistry};
use chrono::Utc;
use fleetgate_core::{DeviceId, EventKind};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Configuration for the observer event server.
#[derive(Debug, Clone)]
pub struct EventServerConfig {
    /// Address to bind the listener to
    pub bind_addr: SocketAddr,

    /// Maximum number of simultaneous observer connections
    pub max_connections: usize,

    /// How long a new connection has to present its auth frame
    pub auth_deadline: Duration,
}

impl Default for EventServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8765".parse().expect("static addr"),
            max_connections: 100,
            auth_deadline: Duration::from_secs(5),
        }
    }
}

/// TCP server distributing fleet events to authenticated observers.
pub struct EventServer {
    listener: TcpListener,
    registry: Arc<RoomRegistry>,
    broadcaster: Arc<Broadcaster>,
    validator: Arc<dyn TokenValidator>,
    config: EventServerConfig,
}

impl EventServer {
    /// Bind the listener; the server accepts nothing until [`run`] is called.
    ///
    /// [`run`]: EventServer::run
    pub async fn bind(
        config: EventServerConfig,
        registry: Arc<RoomRegistry>,
        broadcaster: Arc<Broadcaster>,
        validator: Arc<dyn TokenValidator>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(|_| EventServerError::Bind(config.bind_addr))?;

        info!(
            "Observer server listening on {} (max {} connections)",
            config.bind_addr, config.max_connections
        );

        Ok(Self {
            listener,
            registry,
            broadcaster,
            validator,
            config,
        })
    }

    /// The bound address; useful when binding to port 0 in tests.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(Into::into)
    }

    /// Spawn the accept loop. Stops accepting when `cancel` fires; live
    /// connection tasks observe the same token and shut down with it.
    pub fn run(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("Observer server stopping");
                        break;
                    }
                    accepted = self.listener.accept() => {
                        let (stream, addr) = match accepted {
                            Ok(pair) => pair,
                            Err(e) => {
                                warn!("Accept failed: {e}");
                                continue;
                            }
                        };

                        if self.registry.connection_count().await >= self.config.max_connections {
                            warn!(
                                %addr,
                                max_connections = self.config.max_connections,
                                "Connection rejected: maximum connections reached"
                            );
                            drop(stream);
                            continue;
                        }

                        if let Err(e) = stream.set_nodelay(true) {
                            warn!("Failed to set TCP_NODELAY for {addr}: {e}");
                        }

                        let session = Session {
                            registry: self.registry.clone(),
                            broadcaster: self.broadcaster.clone(),
                            validator: self.validator.clone(),
                            auth_deadline: self.config.auth_deadline,
                        };
                        let cancel = cancel.clone();
                        tokio::spawn(async move {
                            session.serve(stream, addr, cancel).await;
                        });
                    }
                }
            }
        })
    }
}

/// Per-connection state shared by the accept loop with each handler task.
struct Session {
    registry: Arc<RoomRegistry>,
    broadcaster: Arc<Broadcaster>,
    validator: Arc<dyn TokenValidator>,
    auth_deadline: Duration,
}

impl Session {
    async fn serve(self, stream: TcpStream, addr: SocketAddr, cancel: CancellationToken) {
        let mut framed = Framed::new(stream, WireCodec::new());

        // Auth gate: exactly one frame, within the deadline, must be auth
        let role = match timeout(self.auth_deadline, framed.next()).await {
            Ok(Some(Ok(ClientMessage::Auth { token }))) => {
                match self.validator.validate(&token) {
                    Some(role) => role,
                    None => {
                        warn!(%addr, "Rejected observer: invalid token");
                        return;
                    }
                }
            }
            Ok(Some(Ok(_))) => {
                warn!(%addr, "Rejected observer: first frame was not auth");
                return;
            }
            Ok(Some(Err(e))) => {
                warn!(%addr, "Rejected observer: {e}");
                return;
            }
            Ok(None) => {
                debug!(%addr, "Connection closed before auth");
                return;
            }
            Err(_) => {
                warn!(%addr, "Rejected observer: auth deadline expired");
                return;
            }
        };

        let (conn_id, mut outbound) = self.registry.register(role).await;
        info!(%addr, connection_id = %conn_id, ?role, "Observer authenticated");

        if framed
            .send(ServerMessage::Connected {
                role,
                at: Utc::now(),
            })
            .await
            .is_err()
        {
            self.registry.remove(conn_id).await;
            return;
        }

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                queued = outbound.recv() => match queued {
                    Some(message) => {
                        if framed.send(message).await.is_err() {
                            break;
                        }
                    }
                    // Queue closed: the registry dropped us (force disconnect)
                    None => break,
                },
                inbound = framed.next() => match inbound {
                    Some(Ok(message)) => {
                        if let Some(reply) = self.handle(conn_id, message).await
                            && framed.send(reply).await.is_err()
                        {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        // Framed does not recover after a decode error
                        warn!(connection_id = %conn_id, "Bad frame from observer, closing: {e}");
                        break;
                    }
                    None => break,
                },
            }
        }

        self.registry.remove(conn_id).await;
        debug!(connection_id = %conn_id, "Observer session ended");
    }

    async fn handle(
        &self,
        conn_id: crate::rooms::ConnectionId,
        message: ClientMessage,
    ) -> Option<ServerMessage> {
        match message {
            ClientMessage::Auth { .. } => {
                debug!(connection_id = %conn_id, "Ignoring repeated auth");
                None
            }
            ClientMessage::Subscribe { events } => {
                let kinds = parse_kinds(&events);
                for kind in &kinds {
                    self.registry.join(conn_id, Room::Event(*kind)).await;
                }
                Some(ServerMessage::Subscribed {
                    events: kinds,
                    at: Utc::now(),
                })
            }
            ClientMessage::Unsubscribe { events } => {
                let kinds = parse_kinds(&events);
                for kind in &kinds {
                    self.registry.leave(conn_id, &Room::Event(*kind)).await;
                }
                Some(ServerMessage::Unsubscribed {
                    events: kinds,
                    at: Utc::now(),
                })
            }
            ClientMessage::JoinDevice { device_id } => {
                let device_id = match DeviceId::new(&device_id) {
                    Ok(id) => id,
                    Err(e) => {
                        warn!(connection_id = %conn_id, "join_device rejected: {e}");
                        return None;
                    }
                };
                self.registry
                    .join(conn_id, Room::Device(device_id.clone()))
                    .await;
                Some(ServerMessage::JoinedDevice {
                    device_id,
                    at: Utc::now(),
                })
            }
            ClientMessage::LeaveDevice { device_id } => {
                let device_id = DeviceId::new(&device_id).ok()?;
                self.registry
                    .leave(conn_id, &Room::Device(device_id.clone()))
                    .await;
                Some(ServerMessage::LeftDevice {
                    device_id,
                    at: Utc::now(),
                })
            }
            ClientMessage::JoinBranch { branch } => {
                self.registry
                    .join(conn_id, Room::Branch(branch.clone()))
                    .await;
                Some(ServerMessage::JoinedBranch {
                    branch,
                    at: Utc::now(),
                })
            }
            ClientMessage::GetSystemStatus => Some(ServerMessage::SystemStatus {
                branches: self.broadcaster.snapshot().await,
                at: Utc::now(),
            }),
            ClientMessage::Ping => Some(ServerMessage::Pong { at: Utc::now() }),
        }
    }
}

/// Parse subscription names, dropping (and logging) unknown kinds.
fn parse_kinds(names: &[String]) -> Vec<EventKind> {
    let mut kinds = Vec::with_capacity(names.len());
    for name in names {
        match name.parse::<EventKind>() {
            Ok(kind) => {
                if !kinds.contains(&kind) {
                    kinds.push(kind);
                }
            }
            Err(e) => warn!("Ignoring subscription: {e}"),
        }
    }
    kinds
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kinds_drops_unknown_and_duplicates() {
        let kinds = parse_kinds(&[
            "system_alert".to_string(),
            "not_a_kind".to_string(),
            "system_alert".to_string(),
        ]);
        assert_eq!(kinds, vec![EventKind::SystemAlert]);
    }

    #[test]
    fn test_default_config() {
        let config = EventServerConfig::default();
        assert_eq!(config.bind_addr.port(), 8765);
        assert_eq!(config.max_connections, 100);
    }
}
