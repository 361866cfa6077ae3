//! Observer-facing event distribution for the device fleet.
//!
//! This crate turns the internal [`fleetgate_core::DomainEvent`] stream into
//! a newline-delimited JSON feed over TCP. Observers authenticate with a
//! token as their first frame, then join rooms (event kinds, single devices,
//! branches) to choose what they receive.
//!
//! # Architecture
//!
//! ```text
//! DomainEvent broadcast ──> Broadcaster ──> RoomRegistry ──> per-connection
//!                               │                             mpsc queues
//! TcpListener ──> EventServer ──┴── auth gate ── room joins
//! ```
//!
//! The [`RoomRegistry`] is the single source of truth for who receives what:
//! an explicit map from room to connection set behind one lock. Broadcast is
//! a pure fan-out with per-connection deduplication, so an event matching
//! several of a connection's rooms is delivered once.

pub mod auth;
pub mod broadcaster;
pub mod codec;
pub mod error;
pub mod messages;
pub mod rooms;
pub mod server;

pub use auth::{ObserverRole, StaticTokenValidator, TokenValidator};
pub use broadcaster::Broadcaster;
pub use codec::WireCodec;
pub use error::{EventServerError, Result};
pub use messages::{ClientMessage, ServerMessage};
pub use rooms::{ConnectionId, Room, RoomRegistry};
pub use server::{EventServer, EventServerConfig};
