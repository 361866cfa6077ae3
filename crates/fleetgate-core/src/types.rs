use crate::{
    Result,
    constants::{MAX_DEVICE_ID_LENGTH, MIN_DEVICE_ID_LENGTH},
    error::Error,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable device identifier.
///
/// Identifiers are assigned when a device is registered and never change for
/// the lifetime of the record. They key every runtime map (handles, health,
/// schedules) as well as the durable config collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Create a new device ID with validation.
    ///
    /// # Errors
    /// Returns `Error::InvalidDeviceId` if the ID is empty, longer than 64
    /// characters, or contains anything besides ASCII alphanumerics, `-`, `_`
    /// or `.`.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let len = id.len();
        if !(MIN_DEVICE_ID_LENGTH..=MAX_DEVICE_ID_LENGTH).contains(&len) {
            return Err(Error::InvalidDeviceId(format!(
                "Device ID must be {MIN_DEVICE_ID_LENGTH}-{MAX_DEVICE_ID_LENGTH} chars, got {len}"
            )));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(Error::InvalidDeviceId(format!(
                "Device ID contains invalid characters: {id}"
            )));
        }
        Ok(DeviceId(id))
    }

    /// Get the raw identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for DeviceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        DeviceId::new(s)
    }
}

/// Connection status of a device.
///
/// Transitions are driven exclusively by the connection manager:
///
/// - `Disconnected → Connecting → Connected` (connect succeeds)
/// - `Connecting → Error` (connect fails)
/// - `Connected → Error` (probe fails)
/// - `Connected | Error → Disconnected` (disconnect)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl DeviceStatus {
    /// Whether moving to `next` is a legal transition of the connection
    /// state machine.
    #[must_use]
    pub fn can_transition_to(self, next: DeviceStatus) -> bool {
        use DeviceStatus::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Error)
                | (Connected, Error)
                | (Connected, Disconnected)
                | (Error, Disconnected)
                | (Error, Connecting)
        )
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Feature set reported by a terminal during the connect handshake.
///
/// Populated on the device record after the first successful connect and
/// refreshed on every reconnect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    pub face: bool,
    pub fingerprint: bool,
    pub palm: bool,
    pub card: bool,
    /// Maximum enrollable users, when the terminal reports a limit.
    pub max_users: Option<u32>,
}

/// Rolling health record for one device.
///
/// Created lazily on the first probe or connect attempt and kept until the
/// device record itself is removed. `error_count` is cumulative across
/// consecutive failures and resets to zero on any successful probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceHealth {
    pub device_id: DeviceId,
    pub last_probe: Option<DateTime<Utc>>,
    pub latency_ms: Option<u64>,
    pub error_count: u32,
    pub last_error: Option<String>,
}

impl DeviceHealth {
    /// Create a fresh record with no probe history.
    #[must_use]
    pub fn new(device_id: DeviceId) -> Self {
        Self {
            device_id,
            last_probe: None,
            latency_ms: None,
            error_count: 0,
            last_error: None,
        }
    }

    /// Record a successful probe, resetting the consecutive-error counter.
    pub fn record_success(&mut self, latency_ms: u64) {
        self.last_probe = Some(Utc::now());
        self.latency_ms = Some(latency_ms);
        self.error_count = 0;
        self.last_error = None;
    }

    /// Record a failed probe or connect attempt.
    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.last_probe = Some(Utc::now());
        self.error_count += 1;
        self.last_error = Some(error.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_device_id_valid() {
        let id = DeviceId::new("terminal-01").unwrap();
        assert_eq!(id.as_str(), "terminal-01");
        assert_eq!(id.to_string(), "terminal-01");
    }

    #[test]
    fn test_device_id_rejects_empty() {
        assert!(DeviceId::new("").is_err());
    }

    #[test]
    fn test_device_id_rejects_invalid_chars() {
        assert!(DeviceId::new("dev 01").is_err());
        assert!(DeviceId::new("dev/01").is_err());
    }

    #[test]
    fn test_device_id_rejects_too_long() {
        assert!(DeviceId::new("x".repeat(65)).is_err());
    }

    #[rstest]
    #[case(DeviceStatus::Disconnected, DeviceStatus::Connecting, true)]
    #[case(DeviceStatus::Connecting, DeviceStatus::Connected, true)]
    #[case(DeviceStatus::Connecting, DeviceStatus::Error, true)]
    #[case(DeviceStatus::Connected, DeviceStatus::Error, true)]
    #[case(DeviceStatus::Connected, DeviceStatus::Disconnected, true)]
    #[case(DeviceStatus::Error, DeviceStatus::Disconnected, true)]
    #[case(DeviceStatus::Disconnected, DeviceStatus::Connected, false)]
    #[case(DeviceStatus::Connected, DeviceStatus::Connecting, false)]
    fn test_status_transitions(
        #[case] from: DeviceStatus,
        #[case] to: DeviceStatus,
        #[case] legal: bool,
    ) {
        assert_eq!(from.can_transition_to(to), legal);
    }

    #[test]
    fn test_health_reset_on_success() {
        let mut health = DeviceHealth::new(DeviceId::new("d1").unwrap());
        health.record_failure("timeout");
        health.record_failure("timeout");
        assert_eq!(health.error_count, 2);

        health.record_success(12);
        assert_eq!(health.error_count, 0);
        assert_eq!(health.latency_ms, Some(12));
        assert!(health.last_error.is_none());
    }

    #[test]
    fn test_status_serde_snake_case() {
        let json = serde_json::to_string(&DeviceStatus::Connected).unwrap();
        assert_eq!(json, "\"connected\"");
    }
}
