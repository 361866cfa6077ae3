//! Multi-device operations with detached sequential execution.
//!
//! An operation becomes visible (Pending, progress 0) before its executor
//! starts, runs device-by-device in creation order, and reaches a terminal
//! status exactly once. Per-device failures are captured as failed step
//! results and never abort the batch; cancellation is checked between
//! devices and keeps the partial results.

use crate::connection::ConnectionManager;
use crate::sync::SyncEngine;
use chrono::{DateTime, Utc};
use fleetgate_core::{DeviceId, DomainEvent, Error, EventSender, Result};
use fleetgate_config::DeviceConfigUpdate;
use fleetgate_protocol::TerminalFactory;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// What a bulk operation does to each target device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkOperationKind {
    Connect,
    Disconnect,
    Configure,
    Sync,
}

impl BulkOperationKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::Configure => "configure",
            Self::Sync => "sync",
        }
    }
}

impl fmt::Display for BulkOperationKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BulkOperationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "connect" => Ok(Self::Connect),
            "disconnect" => Ok(Self::Disconnect),
            "configure" => Ok(Self::Configure),
            "sync" => Ok(Self::Sync),
            other => Err(Error::UnknownOperation(other.to_string())),
        }
    }
}

/// Lifecycle of a bulk operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkOperationStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl BulkOperationStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Outcome of one device step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkStepResult {
    pub device_id: DeviceId,
    pub success: bool,
    pub message: Option<String>,
    pub error: Option<String>,
}

/// One multi-device operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkOperation {
    pub id: Uuid,
    pub kind: BulkOperationKind,
    pub device_ids: Vec<DeviceId>,
    pub params: Option<serde_json::Value>,
    pub status: BulkOperationStatus,
    /// Percentage of devices processed; never decreases.
    pub progress: u8,
    pub results: Vec<BulkStepResult>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Creates, tracks and cancels bulk operations.
pub struct BulkOperationCoordinator<F: TerminalFactory> {
    manager: Arc<ConnectionManager<F>>,
    sync: Arc<SyncEngine<F>>,
    operations: Mutex<HashMap<Uuid, BulkOperation>>,
    tokens: Mutex<HashMap<Uuid, CancellationToken>>,
    events: EventSender,
}

impl<F: TerminalFactory> BulkOperationCoordinator<F> {
    pub fn new(
        manager: Arc<ConnectionManager<F>>,
        sync: Arc<SyncEngine<F>>,
        events: EventSender,
    ) -> Self {
        Self {
            manager,
            sync,
            operations: Mutex::new(HashMap::new()),
            tokens: Mutex::new(HashMap::new()),
            events,
        }
    }

    fn emit(&self, event: DomainEvent) {
        let _ = self.events.send(event);
    }

    /// Create an operation and start its detached executor.
    ///
    /// The returned id is queryable immediately, before the first step runs.
    ///
    /// # Errors
    /// `EmptyDeviceList` when no targets are given.
    pub async fn create(
        self: &Arc<Self>,
        kind: BulkOperationKind,
        device_ids: Vec<DeviceId>,
        params: Option<serde_json::Value>,
    ) -> Result<Uuid> {
        if device_ids.is_empty() {
            return Err(Error::EmptyDeviceList);
        }

        let operation = BulkOperation {
            id: Uuid::new_v4(),
            kind,
            device_ids,
            params,
            status: BulkOperationStatus::Pending,
            progress: 0,
            results: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        let id = operation.id;
        let token = CancellationToken::new();

        self.operations.lock().await.insert(id, operation);
        self.tokens.lock().await.insert(id, token.clone());

        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            coordinator.execute(id, token).await;
        });

        info!(operation_id = %id, %kind, "Bulk operation created");
        Ok(id)
    }

    /// Fetch one operation's current state.
    pub async fn get(&self, id: &Uuid) -> Option<BulkOperation> {
        self.operations.lock().await.get(id).cloned()
    }

    /// All known operations, newest first.
    pub async fn list(&self) -> Vec<BulkOperation> {
        let mut operations: Vec<BulkOperation> =
            self.operations.lock().await.values().cloned().collect();
        operations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        operations
    }

    /// Request cancellation. Returns true only when the operation was still
    /// pending or running; the executor notices between device steps.
    pub async fn cancel(&self, id: &Uuid) -> bool {
        let operations = self.operations.lock().await;
        let Some(operation) = operations.get(id) else {
            return false;
        };
        if operation.status.is_terminal() {
            return false;
        }
        drop(operations);

        if let Some(token) = self.tokens.lock().await.get(id) {
            token.cancel();
            info!(operation_id = %id, "Bulk operation cancellation requested");
            true
        } else {
            false
        }
    }

    async fn execute(&self, id: Uuid, token: CancellationToken) {
        let (kind, device_ids, params) = {
            let mut operations = self.operations.lock().await;
            let Some(operation) = operations.get_mut(&id) else {
                return;
            };
            operation.status = BulkOperationStatus::Running;
            operation.started_at = Some(Utc::now());
            (
                operation.kind,
                operation.device_ids.clone(),
                operation.params.clone(),
            )
        };

        let total = device_ids.len();
        for (index, device_id) in device_ids.into_iter().enumerate() {
            if token.is_cancelled() {
                self.finish(id, kind, BulkOperationStatus::Cancelled).await;
                return;
            }

            let result = self.run_step(kind, &device_id, params.as_ref()).await;
            let success = result.success;

            let progress = (((index + 1) * 100) / total) as u8;
            {
                let mut operations = self.operations.lock().await;
                if let Some(operation) = operations.get_mut(&id) {
                    operation.results.push(result);
                    operation.progress = progress;
                }
            }
            self.emit(DomainEvent::BulkOperationProgress {
                operation_id: id,
                kind: kind.as_str().to_string(),
                progress,
                last_device: device_id,
                last_success: success,
                at: Utc::now(),
            });
        }

        self.finish(id, kind, BulkOperationStatus::Completed).await;
    }

    async fn run_step(
        &self,
        kind: BulkOperationKind,
        device_id: &DeviceId,
        params: Option<&serde_json::Value>,
    ) -> BulkStepResult {
        let outcome: Result<Option<String>> = match kind {
            BulkOperationKind::Connect => {
                self.manager.connect(device_id).await.map(|()| None)
            }
            BulkOperationKind::Disconnect => self.manager.disconnect(device_id).await.map(|was| {
                Some(if was {
                    "disconnected".to_string()
                } else {
                    "was not connected".to_string()
                })
            }),
            BulkOperationKind::Configure => match params {
                Some(value) => match serde_json::from_value::<DeviceConfigUpdate>(value.clone()) {
                    Ok(update) => self
                        .manager
                        .update_config(device_id, &update)
                        .await
                        .map(|_| None),
                    Err(e) => Err(Error::Protocol(format!("invalid configure params: {e}"))),
                },
                None => Err(Error::Protocol(
                    "configure operation requires params".to_string(),
                )),
            },
            BulkOperationKind::Sync => self
                .sync
                .sync_device(device_id)
                .await
                .map(|report| Some(format!("{} entries", report.entries_inserted))),
        };

        match outcome {
            Ok(message) => BulkStepResult {
                device_id: device_id.clone(),
                success: true,
                message,
                error: None,
            },
            Err(e) => {
                warn!(device_id = %device_id, %kind, "Bulk step failed: {e}");
                BulkStepResult {
                    device_id: device_id.clone(),
                    success: false,
                    message: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn finish(&self, id: Uuid, kind: BulkOperationKind, status: BulkOperationStatus) {
        let (succeeded, failed) = {
            let mut operations = self.operations.lock().await;
            let Some(operation) = operations.get_mut(&id) else {
                return;
            };
            operation.status = status;
            operation.completed_at = Some(Utc::now());
            if status == BulkOperationStatus::Completed {
                operation.progress = 100;
            }
            let succeeded = operation.results.iter().filter(|r| r.success).count();
            (succeeded, operation.results.len() - succeeded)
        };
        self.tokens.lock().await.remove(&id);

        info!(operation_id = %id, %kind, status = status.as_str(), succeeded, failed, "Bulk operation finished");
        self.emit(DomainEvent::BulkOperationCompleted {
            operation_id: id,
            status: status.as_str().to_string(),
            succeeded,
            failed,
            at: Utc::now(),
        });
    }
}
