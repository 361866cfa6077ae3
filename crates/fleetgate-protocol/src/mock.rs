//! Scriptable mock terminal for tests and development.
//!
//! [`MockFleet`] is a shared control surface: tests script per-host behavior
//! (offline, credential checks, forced probe failures, canned user and
//! attendance data) and hand a [`MockTerminalFactory`] bound to the same
//! fleet to the connection manager. No network is involved.

use crate::client::{TerminalClient, TerminalFactory};
use crate::error::{ProtocolError, Result};
use crate::types::{AttendanceRecord, LogPage, TerminalAddress, TerminalUser, UserPage, VersionInfo};
use chrono::{DateTime, Utc};
use fleetgate_core::DeviceCapabilities;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
struct HostState {
    offline: bool,
    expected_api_key: Option<String>,
    /// Number of upcoming probes that fail before the host recovers.
    fail_probes: u32,
    /// Number of upcoming user fetches that panic, simulating a client bug.
    panic_user_fetches: u32,
    latency_ms: u64,
    users: Vec<TerminalUser>,
    records: Vec<AttendanceRecord>,
    version: VersionInfo,
    capabilities: DeviceCapabilities,
    connect_count: u32,
    probe_count: u32,
}

impl Default for HostState {
    fn default() -> Self {
        Self {
            offline: false,
            expected_api_key: None,
            fail_probes: 0,
            panic_user_fetches: 0,
            latency_ms: 1,
            users: Vec::new(),
            records: Vec::new(),
            version: VersionInfo {
                firmware: "1.4.2".to_string(),
                algorithm: "face-3.1".to_string(),
            },
            capabilities: DeviceCapabilities {
                face: true,
                fingerprint: true,
                palm: false,
                card: true,
                max_users: Some(3000),
            },
            connect_count: 0,
            probe_count: 0,
        }
    }
}

/// Shared scripting handle for a set of mock terminals, keyed by host name.
///
/// Cloning is cheap; all clones control the same fleet.
///
/// # Examples
///
/// ```
/// use fleetgate_protocol::mock::MockFleet;
///
/// let fleet = MockFleet::new();
/// fleet.set_offline("10.0.0.5", true);
/// assert_eq!(fleet.connect_count("10.0.0.5"), 0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockFleet {
    hosts: Arc<Mutex<HashMap<String, HostState>>>,
}

impl MockFleet {
    /// Create an empty fleet. Hosts materialize on first use with healthy
    /// defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_host<R>(&self, host: &str, f: impl FnOnce(&mut HostState) -> R) -> R {
        let mut hosts = self.hosts.lock().expect("mock fleet lock poisoned");
        f(hosts.entry(host.to_string()).or_default())
    }

    /// Mark a host unreachable (connects and probes fail with a transport
    /// error) or reachable again.
    pub fn set_offline(&self, host: &str, offline: bool) {
        self.with_host(host, |s| s.offline = offline);
    }

    /// Require a specific API key on connect; a mismatch is rejected as an
    /// auth error.
    pub fn expect_api_key(&self, host: &str, key: impl Into<String>) {
        let key = key.into();
        self.with_host(host, |s| s.expected_api_key = Some(key));
    }

    /// Fail the next `n` probes on this host, then recover.
    pub fn fail_next_probes(&self, host: &str, n: u32) {
        self.with_host(host, |s| s.fail_probes = n);
    }

    /// Panic inside the next `n` user fetches, then recover. Exercises
    /// caller resilience against a crashing client task.
    pub fn panic_next_user_fetches(&self, host: &str, n: u32) {
        self.with_host(host, |s| s.panic_user_fetches = n);
    }

    /// Set the simulated probe latency.
    pub fn set_latency_ms(&self, host: &str, latency_ms: u64) {
        self.with_host(host, |s| s.latency_ms = latency_ms);
    }

    /// Enroll a user on the mock terminal.
    pub fn push_user(&self, host: &str, user: TerminalUser) {
        self.with_host(host, |s| s.users.push(user));
    }

    /// Append an attendance record to the mock terminal's log.
    pub fn push_record(&self, host: &str, record: AttendanceRecord) {
        self.with_host(host, |s| s.records.push(record));
    }

    /// How many successful connects this host has served.
    #[must_use]
    pub fn connect_count(&self, host: &str) -> u32 {
        self.with_host(host, |s| s.connect_count)
    }

    /// How many probes (successful or not) this host has seen.
    #[must_use]
    pub fn probe_count(&self, host: &str) -> u32 {
        self.with_host(host, |s| s.probe_count)
    }
}

/// Factory producing [`MockTerminal`] sessions against a [`MockFleet`].
#[derive(Debug, Clone)]
pub struct MockTerminalFactory {
    fleet: MockFleet,
}

impl MockTerminalFactory {
    #[must_use]
    pub fn new(fleet: MockFleet) -> Self {
        Self { fleet }
    }
}

impl TerminalFactory for MockTerminalFactory {
    type Client = MockTerminal;

    async fn create(&self, address: &TerminalAddress) -> Result<MockTerminal> {
        let host = address.host.clone();
        let api_key = address.api_key.clone();
        self.fleet.with_host(&host, |s| {
            if s.offline {
                return Err(ProtocolError::transport(format!(
                    "no route to host {host}"
                )));
            }
            if let Some(expected) = &s.expected_api_key
                && api_key.as_deref() != Some(expected.as_str())
            {
                return Err(ProtocolError::auth("invalid api key"));
            }
            s.connect_count += 1;
            Ok(())
        })?;

        Ok(MockTerminal {
            host,
            fleet: self.fleet.clone(),
        })
    }
}

/// Mock protocol session bound to one scripted host.
#[derive(Debug)]
pub struct MockTerminal {
    host: String,
    fleet: MockFleet,
}

fn page_bounds(len: usize, offset: u32, count: u32) -> (usize, usize, Option<u32>) {
    let start = (offset as usize).min(len);
    let end = (start + count as usize).min(len);
    let next = if end < len { Some(end as u32) } else { None };
    (start, end, next)
}

impl TerminalClient for MockTerminal {
    async fn version_info(&mut self) -> Result<VersionInfo> {
        self.fleet.with_host(&self.host, |s| {
            s.probe_count += 1;
            if s.offline {
                return Err(ProtocolError::transport("host unreachable"));
            }
            if s.fail_probes > 0 {
                s.fail_probes -= 1;
                return Err(ProtocolError::timeout(s.latency_ms.max(1)));
            }
            Ok(s.version.clone())
        })
    }

    async fn capabilities(&mut self) -> Result<DeviceCapabilities> {
        self.fleet.with_host(&self.host, |s| {
            if s.offline {
                return Err(ProtocolError::transport("host unreachable"));
            }
            Ok(s.capabilities.clone())
        })
    }

    async fn users(&mut self, offset: u32, count: u32) -> Result<UserPage> {
        // Panic outside the lock so the fleet stays usable afterwards
        let panic_now = self.fleet.with_host(&self.host, |s| {
            if s.panic_user_fetches > 0 {
                s.panic_user_fetches -= 1;
                return true;
            }
            false
        });
        if panic_now {
            panic!("scripted user fetch panic for {}", self.host);
        }
        self.fleet.with_host(&self.host, |s| {
            if s.offline {
                return Err(ProtocolError::transport("host unreachable"));
            }
            let (start, end, next_offset) = page_bounds(s.users.len(), offset, count);
            Ok(UserPage {
                users: s.users[start..end].to_vec(),
                next_offset,
            })
        })
    }

    async fn attendance_logs(
        &mut self,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
        offset: u32,
        count: u32,
    ) -> Result<LogPage> {
        self.fleet.with_host(&self.host, |s| {
            if s.offline {
                return Err(ProtocolError::transport("host unreachable"));
            }
            let window: Vec<AttendanceRecord> = s
                .records
                .iter()
                .filter(|r| r.timestamp >= start_date && r.timestamp <= end_date)
                .cloned()
                .collect();
            let (start, end, next_offset) = page_bounds(window.len(), offset, count);
            Ok(LogPage {
                records: window[start..end].to_vec(),
                next_offset,
            })
        })
    }
}
