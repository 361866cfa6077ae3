//! Closed set of domain events exchanged between components.
//!
//! Every state change the orchestration core produces is expressed as a
//! [`DomainEvent`] variant and published on one shared
//! [`tokio::sync::broadcast`] channel. Consumers (the observer broadcaster,
//! the sync worker) each hold their own receiver; a lagging receiver drops
//! its oldest events instead of stalling the emitter.

use crate::types::{DeviceId, DeviceStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Severity attached to system alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

/// Event categories observers can subscribe to.
///
/// Each category corresponds to one `event:<kind>` room on the observer
/// side; the wire name is the snake_case string returned by
/// [`EventKind::as_str`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    DeviceStatusChange,
    DeviceHealthUpdate,
    UserVerification,
    SystemAlert,
    JobProgress,
    SyncCompleted,
    AuditEvent,
}

impl EventKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeviceStatusChange => "device_status_change",
            Self::DeviceHealthUpdate => "device_health_update",
            Self::UserVerification => "user_verification",
            Self::SystemAlert => "system_alert",
            Self::JobProgress => "job_progress",
            Self::SyncCompleted => "sync_completed",
            Self::AuditEvent => "audit_event",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "device_status_change" => Ok(Self::DeviceStatusChange),
            "device_health_update" => Ok(Self::DeviceHealthUpdate),
            "user_verification" => Ok(Self::UserVerification),
            "system_alert" => Ok(Self::SystemAlert),
            "job_progress" => Ok(Self::JobProgress),
            "sync_completed" => Ok(Self::SyncCompleted),
            "audit_event" => Ok(Self::AuditEvent),
            other => Err(crate::Error::Protocol(format!(
                "Unknown event kind: {other}"
            ))),
        }
    }
}

/// Domain event emitted by the orchestration core.
///
/// Variants carry strongly-typed payloads; there are no string-keyed event
/// names anywhere in the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    DeviceStatusChanged {
        device_id: DeviceId,
        branch: Option<String>,
        previous: DeviceStatus,
        current: DeviceStatus,
        at: DateTime<Utc>,
    },
    DeviceHealthUpdated {
        device_id: DeviceId,
        branch: Option<String>,
        latency_ms: Option<u64>,
        error_count: u32,
        last_error: Option<String>,
        at: DateTime<Utc>,
    },
    UserVerification {
        device_id: DeviceId,
        terminal_user_id: String,
        verified_at: DateTime<Utc>,
        method: Option<String>,
    },
    SystemAlert {
        severity: AlertSeverity,
        message: String,
        at: DateTime<Utc>,
    },
    BulkOperationProgress {
        operation_id: Uuid,
        kind: String,
        progress: u8,
        last_device: DeviceId,
        last_success: bool,
        at: DateTime<Utc>,
    },
    BulkOperationCompleted {
        operation_id: Uuid,
        status: String,
        succeeded: usize,
        failed: usize,
        at: DateTime<Utc>,
    },
    SyncCompleted {
        device_id: DeviceId,
        users_merged: usize,
        entries_inserted: usize,
        errors: usize,
        at: DateTime<Utc>,
    },
    AuditEvent {
        actor: String,
        action: String,
        details: Option<serde_json::Value>,
        at: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// The subscription category this event belongs to.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::DeviceStatusChanged { .. } => EventKind::DeviceStatusChange,
            Self::DeviceHealthUpdated { .. } => EventKind::DeviceHealthUpdate,
            Self::UserVerification { .. } => EventKind::UserVerification,
            Self::SystemAlert { .. } => EventKind::SystemAlert,
            Self::BulkOperationProgress { .. } | Self::BulkOperationCompleted { .. } => {
                EventKind::JobProgress
            }
            Self::SyncCompleted { .. } => EventKind::SyncCompleted,
            Self::AuditEvent { .. } => EventKind::AuditEvent,
        }
    }

    /// The device this event is scoped to, when it concerns one device.
    #[must_use]
    pub fn device_id(&self) -> Option<&DeviceId> {
        match self {
            Self::DeviceStatusChanged { device_id, .. }
            | Self::DeviceHealthUpdated { device_id, .. }
            | Self::UserVerification { device_id, .. }
            | Self::SyncCompleted { device_id, .. } => Some(device_id),
            _ => None,
        }
    }

    /// The branch this event is scoped to, when known.
    #[must_use]
    pub fn branch(&self) -> Option<&str> {
        match self {
            Self::DeviceStatusChanged { branch, .. }
            | Self::DeviceHealthUpdated { branch, .. } => branch.as_deref(),
            _ => None,
        }
    }

    /// Audit events flow only to role-gated admin observers.
    #[must_use]
    pub fn admin_only(&self) -> bool {
        matches!(self, Self::AuditEvent { .. })
    }
}

/// Sender half of the shared domain-event channel.
pub type EventSender = broadcast::Sender<DomainEvent>;

/// Create the shared domain-event channel.
pub fn event_channel(capacity: usize) -> (EventSender, broadcast::Receiver<DomainEvent>) {
    broadcast::channel(capacity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DeviceId;

    fn device() -> DeviceId {
        DeviceId::new("d1").unwrap()
    }

    #[test]
    fn test_event_kind_round_trip() {
        for kind in [
            EventKind::DeviceStatusChange,
            EventKind::DeviceHealthUpdate,
            EventKind::UserVerification,
            EventKind::SystemAlert,
            EventKind::JobProgress,
            EventKind::SyncCompleted,
            EventKind::AuditEvent,
        ] {
            let parsed: EventKind = kind.as_str().parse().unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn test_event_kind_rejects_unknown() {
        assert!("not_a_kind".parse::<EventKind>().is_err());
    }

    #[test]
    fn test_status_event_scoping() {
        let event = DomainEvent::DeviceStatusChanged {
            device_id: device(),
            branch: Some("main".to_string()),
            previous: DeviceStatus::Connecting,
            current: DeviceStatus::Connected,
            at: Utc::now(),
        };
        assert_eq!(event.kind(), EventKind::DeviceStatusChange);
        assert_eq!(event.device_id(), Some(&device()));
        assert_eq!(event.branch(), Some("main"));
        assert!(!event.admin_only());
    }

    #[test]
    fn test_audit_event_is_admin_only() {
        let event = DomainEvent::AuditEvent {
            actor: "system".to_string(),
            action: "device.delete".to_string(),
            details: None,
            at: Utc::now(),
        };
        assert!(event.admin_only());
        assert_eq!(event.device_id(), None);
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let event = DomainEvent::SystemAlert {
            severity: AlertSeverity::Warning,
            message: "disk low".to_string(),
            at: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "system_alert");
        assert_eq!(json["severity"], "warning");
    }
}
