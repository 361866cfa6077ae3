use chrono::{DateTime, Utc};
use fleetgate_core::{DeviceCapabilities, DeviceId, DeviceStatus};
use fleetgate_protocol::TerminalAddress;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Durable record for one terminal.
///
/// `status`, `last_connected` and `capabilities` are connection-derived and
/// mutated only via the config store's dedicated entry point; everything
/// else is operator-supplied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub id: DeviceId,
    pub name: String,
    pub address: TerminalAddress,
    pub branch: Option<String>,
    pub location: Option<String>,
    /// Include this device in `reconnect_all` at startup.
    pub auto_reconnect: bool,
    #[serde(default)]
    pub status: DeviceStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_connected: Option<DateTime<Utc>>,
    /// Populated after the first successful connect handshake.
    pub capabilities: Option<DeviceCapabilities>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl DeviceConfig {
    /// Create a record with sensible defaults: disconnected, auto-reconnect
    /// on, no branch.
    #[must_use]
    pub fn new(id: DeviceId, name: impl Into<String>, address: TerminalAddress) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            address,
            branch: None,
            location: None,
            auto_reconnect: true,
            status: DeviceStatus::Disconnected,
            created_at: now,
            updated_at: now,
            last_connected: None,
            capabilities: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Set the branch tag.
    #[must_use]
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    /// Set the physical location label.
    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Set the auto-reconnect flag.
    #[must_use]
    pub fn with_auto_reconnect(mut self, auto_reconnect: bool) -> Self {
        self.auto_reconnect = auto_reconnect;
        self
    }

    /// Device type, when recorded in the metadata bag.
    #[must_use]
    pub fn device_type(&self) -> Option<&str> {
        self.metadata.get("device_type").and_then(|v| v.as_str())
    }
}

/// Partial update for a device record.
///
/// `Some` overwrites, `None` keeps. The credential cannot be cleared through
/// an update, only replaced.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceConfigUpdate {
    pub name: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub api_key: Option<String>,
    pub use_tls: Option<bool>,
    pub branch: Option<String>,
    pub location: Option<String>,
    pub auto_reconnect: Option<bool>,
    pub metadata: Option<BTreeMap<String, serde_json::Value>>,
}

impl DeviceConfigUpdate {
    /// Merge into `config`.
    ///
    /// Returns `true` only when one of the connection-relevant fields (host,
    /// port, credential, transport flag) actually changed value; a field
    /// that is present but equal does not count. The caller uses this to
    /// decide whether a live connection must be re-established.
    pub fn apply(&self, config: &mut DeviceConfig) -> bool {
        let before = config.address.clone();

        if let Some(name) = &self.name {
            config.name = name.clone();
        }
        if let Some(host) = &self.host {
            config.address.host = host.clone();
        }
        if let Some(port) = self.port {
            config.address.port = port;
        }
        if let Some(api_key) = &self.api_key {
            config.address.api_key = Some(api_key.clone());
        }
        if let Some(use_tls) = self.use_tls {
            config.address.use_tls = use_tls;
        }
        if let Some(branch) = &self.branch {
            config.branch = Some(branch.clone());
        }
        if let Some(location) = &self.location {
            config.location = Some(location.clone());
        }
        if let Some(auto_reconnect) = self.auto_reconnect {
            config.auto_reconnect = auto_reconnect;
        }
        if let Some(metadata) = &self.metadata {
            config.metadata = metadata.clone();
        }
        config.updated_at = Utc::now();

        config.address != before
    }
}

/// Named ordered set of device ids.
///
/// Groups carry membership only; they never own device lifecycle. Removing
/// a device prunes it from every group in the same call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceGroup {
    pub id: String,
    pub name: String,
    pub branch: Option<String>,
    pub device_ids: Vec<DeviceId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeviceGroup {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            branch: None,
            device_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    #[must_use]
    pub fn with_devices(mut self, device_ids: Vec<DeviceId>) -> Self {
        self.device_ids = device_ids;
        self
    }
}

/// Partial update for a group.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceGroupUpdate {
    pub name: Option<String>,
    pub branch: Option<String>,
    pub device_ids: Option<Vec<DeviceId>>,
}

impl DeviceGroupUpdate {
    pub fn apply(&self, group: &mut DeviceGroup) {
        if let Some(name) = &self.name {
            group.name = name.clone();
        }
        if let Some(branch) = &self.branch {
            group.branch = Some(branch.clone());
        }
        if let Some(device_ids) = &self.device_ids {
            group.device_ids = device_ids.clone();
        }
        group.updated_at = Utc::now();
    }
}

/// Reusable settings bag for a class of terminals.
///
/// Applying a template copies its fields onto a device record; it creates no
/// live binding, and later template edits do not ripple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceTemplate {
    pub id: String,
    pub device_type: String,
    #[serde(default)]
    pub defaults: BTreeMap<String, serde_json::Value>,
    pub capabilities: DeviceCapabilities,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeviceTemplate {
    #[must_use]
    pub fn new(id: impl Into<String>, device_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            device_type: device_type.into(),
            defaults: BTreeMap::new(),
            capabilities: DeviceCapabilities::default(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// In-memory device filter. All set predicates must match.
#[derive(Debug, Clone, Default)]
pub struct DeviceFilter {
    pub branch: Option<String>,
    pub status: Option<DeviceStatus>,
    /// Matches the `device_type` metadata key.
    pub device_type: Option<String>,
    /// Matches the auto-reconnect flag, the record's "in service" marker.
    pub active: Option<bool>,
}

impl DeviceFilter {
    #[must_use]
    pub fn matches(&self, config: &DeviceConfig) -> bool {
        if let Some(branch) = &self.branch
            && config.branch.as_deref() != Some(branch.as_str())
        {
            return false;
        }
        if let Some(status) = self.status
            && config.status != status
        {
            return false;
        }
        if let Some(device_type) = &self.device_type
            && config.device_type() != Some(device_type.as_str())
        {
            return false;
        }
        if let Some(active) = self.active
            && config.auto_reconnect != active
        {
            return false;
        }
        true
    }
}
