//! Wire messages exchanged with observer clients.
//!
//! Both directions use externally-visible snake_case type tags so a client
//! can dispatch on the `type` field of each JSON line. Every outbound
//! message carries the send-time timestamp in `at`.

use crate::auth::ObserverRole;
use chrono::{DateTime, Utc};
use fleetgate_core::{AlertSeverity, DeviceId, DeviceStatus, DomainEvent, EventKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Branch key used in status snapshots for devices without a branch tag.
pub const UNASSIGNED_BRANCH: &str = "unassigned";

/// Messages an observer client may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Must be the first frame on the connection.
    Auth { token: String },
    /// Join the rooms for the named event kinds.
    Subscribe { events: Vec<String> },
    /// Leave the rooms for the named event kinds.
    Unsubscribe { events: Vec<String> },
    JoinDevice { device_id: String },
    LeaveDevice { device_id: String },
    JoinBranch { branch: String },
    GetSystemStatus,
    Ping,
}

/// Per-branch map of device id to its last known status.
pub type StatusSnapshot = BTreeMap<String, BTreeMap<String, DeviceStatus>>;

/// Messages the server sends to observer clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected {
        role: ObserverRole,
        at: DateTime<Utc>,
    },
    Subscribed {
        events: Vec<EventKind>,
        at: DateTime<Utc>,
    },
    Unsubscribed {
        events: Vec<EventKind>,
        at: DateTime<Utc>,
    },
    JoinedDevice {
        device_id: DeviceId,
        at: DateTime<Utc>,
    },
    LeftDevice {
        device_id: DeviceId,
        at: DateTime<Utc>,
    },
    JoinedBranch {
        branch: String,
        at: DateTime<Utc>,
    },
    SystemStatus {
        branches: StatusSnapshot,
        at: DateTime<Utc>,
    },
    Pong {
        at: DateTime<Utc>,
    },
    DeviceStatusChange {
        device_id: DeviceId,
        branch: Option<String>,
        previous: DeviceStatus,
        current: DeviceStatus,
        at: DateTime<Utc>,
    },
    DeviceHealthUpdate {
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
        at: DateTime<Utc>,
    },
    SystemAlert {
        severity: AlertSeverity,
        message: String,
        at: DateTime<Utc>,
    },
    JobProgress {
        operation_id: Uuid,
        progress: u8,
        #[serde(skip_serializing_if = "Option::is_none")]
        kind: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        last_device: Option<DeviceId>,
        #[serde(skip_serializing_if = "Option::is_none")]
        last_success: Option<bool>,
        /// Terminal status, present only on the completion message.
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        succeeded: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        failed: Option<usize>,
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
    SystemMetrics {
        connections: usize,
        events_routed: u64,
        uptime_secs: u64,
        at: DateTime<Utc>,
    },
    ForceDisconnect {
        reason: String,
        at: DateTime<Utc>,
    },
}

impl ServerMessage {
    /// Wire rendition of a domain event, stamped with the send time.
    pub fn from_event(event: DomainEvent) -> Self {
        let now = Utc::now();
        match event {
            DomainEvent::DeviceStatusChanged {
                device_id,
                branch,
                previous,
                current,
                ..
            } => Self::DeviceStatusChange {
                device_id,
                branch,
                previous,
                current,
                at: now,
            },
            DomainEvent::DeviceHealthUpdated {
                device_id,
                branch,
                latency_ms,
                error_count,
                last_error,
                ..
            } => Self::DeviceHealthUpdate {
                device_id,
                branch,
                latency_ms,
                error_count,
                last_error,
                at: now,
            },
            DomainEvent::UserVerification {
                device_id,
                terminal_user_id,
                verified_at,
                method,
            } => Self::UserVerification {
                device_id,
                terminal_user_id,
                verified_at,
                method,
                at: now,
            },
            DomainEvent::SystemAlert {
                severity, message, ..
            } => Self::SystemAlert {
                severity,
                message,
                at: now,
            },
            DomainEvent::BulkOperationProgress {
                operation_id,
                kind,
                progress,
                last_device,
                last_success,
                ..
            } => Self::JobProgress {
                operation_id,
                progress,
                kind: Some(kind),
                last_device: Some(last_device),
                last_success: Some(last_success),
                status: None,
                succeeded: None,
                failed: None,
                at: now,
            },
            DomainEvent::BulkOperationCompleted {
                operation_id,
                status,
                succeeded,
                failed,
                ..
            } => Self::JobProgress {
                operation_id,
                progress: 100,
                kind: None,
                last_device: None,
                last_success: None,
                status: Some(status),
                succeeded: Some(succeeded),
                failed: Some(failed),
                at: now,
            },
            DomainEvent::SyncCompleted {
                device_id,
                users_merged,
                entries_inserted,
                errors,
                ..
            } => Self::SyncCompleted {
                device_id,
                users_merged,
                entries_inserted,
                errors,
                at: now,
            },
            DomainEvent::AuditEvent {
                actor,
                action,
                details,
                at: _,
            } => Self::AuditEvent {
                actor,
                action,
                details,
                at: now,
            },
        }
    }
}
