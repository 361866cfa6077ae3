//! Terminal protocol client boundary.
//!
//! The orchestration core never speaks the terminal wire protocol itself; it
//! consumes a narrow capability interface ([`TerminalClient`]) produced by a
//! [`TerminalFactory`] from nothing but a network address. Everything behind
//! that interface (HTTP/JSON command framing, enrollment, low-level device
//! commands) is an external collaborator and out of scope here.
//!
//! The crate ships a scriptable [`mock::MockTerminalFactory`] used by tests
//! and the demo path of the daemon; a production factory implementing the
//! real device protocol plugs into the same traits.

pub mod client;
pub mod error;
pub mod mock;
pub mod types;

pub use client::{TerminalClient, TerminalFactory};
pub use error::{ProtocolError, Result};
pub use types::{AttendanceRecord, LogPage, TerminalAddress, TerminalUser, UserPage, VersionInfo};
