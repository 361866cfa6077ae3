use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Network coordinates of one terminal.
///
/// This is the entire construction input a [`crate::TerminalFactory`]
/// receives; the core never hands a factory anything else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalAddress {
    pub host: String,
    pub port: u16,
    /// API key presented to the terminal, when it requires one.
    pub api_key: Option<String>,
    /// Use TLS for the terminal transport.
    pub use_tls: bool,
}

impl TerminalAddress {
    /// Create an address with no credential over plain transport.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            api_key: None,
            use_tls: false,
        }
    }

    /// Attach an API key.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Enable TLS transport.
    #[must_use]
    pub fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }
}

impl fmt::Display for TerminalAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Firmware/algorithm versions reported during the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub firmware: String,
    pub algorithm: String,
}

/// One enrolled user as the terminal reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalUser {
    pub id: String,
    pub name: String,
    pub department: Option<String>,
    pub privilege: Option<String>,
}

/// One attendance log entry as the terminal reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    /// Verification method (face, fingerprint, card, ...), when reported.
    pub method: Option<String>,
}

/// One page of a user listing.
///
/// Terminals page their user tables; `next_offset` is `None` on the final
/// page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserPage {
    pub users: Vec<TerminalUser>,
    pub next_offset: Option<u32>,
}

/// One page of an attendance log listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogPage {
    pub records: Vec<AttendanceRecord>,
    pub next_offset: Option<u32>,
}
