//! End-to-end fleet tests against the scripted mock terminal fleet.

use chrono::{Duration as ChronoDuration, Utc};
use fleetgate_config::{ConfigStore, DeviceConfig, DeviceConfigUpdate};
use fleetgate_core::{
    DeviceId, DeviceStatus, DomainEvent, EventSender, event_channel,
};
use fleetgate_fleet::{
    BulkOperationCoordinator, BulkOperationKind, BulkOperationStatus, ConnectionManager,
    ConnectionManagerConfig, DeviceSyncWorker, Error, SyncEngine, SyncEngineConfig,
};
use fleetgate_protocol::mock::{MockFleet, MockTerminalFactory};
use fleetgate_protocol::{AttendanceRecord, TerminalAddress, TerminalUser};
use fleetgate_storage::{
    AttendanceRepository, Database, DatabaseConfig, EmployeeRepository,
    SqliteAttendanceRepository, SqliteEmployeeRepository,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;
use uuid::Uuid;

type MockManager = ConnectionManager<MockTerminalFactory>;
type MockEngine = SyncEngine<MockTerminalFactory>;
type MockCoordinator = BulkOperationCoordinator<MockTerminalFactory>;

struct Rig {
    store: Arc<ConfigStore>,
    fleet: MockFleet,
    manager: Arc<MockManager>,
    engine: Arc<MockEngine>,
    employees: SqliteEmployeeRepository,
    attendance: SqliteAttendanceRepository,
    events: EventSender,
    _dir: TempDir,
}

async fn rig() -> Rig {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(ConfigStore::open(dir.path()).await.unwrap());
    let fleet = MockFleet::new();
    let (events, _keepalive) = event_channel(256);

    let manager = Arc::new(ConnectionManager::new(
        store.clone(),
        MockTerminalFactory::new(fleet.clone()),
        events.clone(),
        ConnectionManagerConfig::default(),
    ));

    let db = Database::new(DatabaseConfig::in_memory()).await.unwrap();
    let employees = SqliteEmployeeRepository::new(db.pool().clone());
    let attendance = SqliteAttendanceRepository::new(db.pool().clone());
    let engine = Arc::new(SyncEngine::new(
        manager.clone(),
        employees.clone(),
        attendance.clone(),
        events.clone(),
        SyncEngineConfig::default(),
    ));

    Rig {
        store,
        fleet,
        manager,
        engine,
        employees,
        attendance,
        events,
        _dir: dir,
    }
}

fn device(id: &str) -> DeviceId {
    DeviceId::new(id).unwrap()
}

impl Rig {
    async fn register(&self, id: &str, host: &str) -> DeviceId {
        let device_id = device(id);
        let config = DeviceConfig::new(
            device_id.clone(),
            format!("Terminal {id}"),
            TerminalAddress::new(host, 80),
        )
        .with_branch("hq");
        self.store.create_device(config).await.unwrap();
        device_id
    }

    fn coordinator(&self) -> Arc<MockCoordinator> {
        Arc::new(BulkOperationCoordinator::new(
            self.manager.clone(),
            self.engine.clone(),
            self.events.clone(),
        ))
    }

    async fn status(&self, id: &DeviceId) -> DeviceStatus {
        self.store.get_device(id).await.unwrap().status
    }
}

async fn next_event(rx: &mut broadcast::Receiver<DomainEvent>) -> DomainEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

async fn wait_terminal(coordinator: &MockCoordinator, id: Uuid) -> fleetgate_fleet::BulkOperation {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let op = coordinator.get(&id).await.expect("operation must exist");
        if op.status.is_terminal() {
            return op;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "operation never reached a terminal status"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ── Connection lifecycle ────────────────────────────────────────────────

#[tokio::test]
async fn test_connect_lifecycle() {
    let rig = rig().await;
    let id = rig.register("door-01", "10.0.0.1").await;
    let mut rx = rig.events.subscribe();

    rig.manager.connect(&id).await.unwrap();

    let record = rig.store.get_device(&id).await.unwrap();
    assert_eq!(record.status, DeviceStatus::Connected);
    assert!(record.last_connected.is_some());
    assert!(record.capabilities.is_some());
    assert!(rig.manager.is_connected(&id).await);

    // Disconnected -> Connecting -> Connected, as two change events
    match next_event(&mut rx).await {
        DomainEvent::DeviceStatusChanged {
            previous, current, ..
        } => {
            assert_eq!(previous, DeviceStatus::Disconnected);
            assert_eq!(current, DeviceStatus::Connecting);
        }
        other => panic!("unexpected event: {other:?}"),
    }
    match next_event(&mut rx).await {
        DomainEvent::DeviceStatusChanged {
            previous,
            current,
            branch,
            ..
        } => {
            assert_eq!(previous, DeviceStatus::Connecting);
            assert_eq!(current, DeviceStatus::Connected);
            assert_eq!(branch.as_deref(), Some("hq"));
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_connect_unknown_device() {
    let rig = rig().await;
    let result = rig.manager.connect(&device("ghost")).await;
    assert!(matches!(result, Err(Error::DeviceNotFound(_))));
}

#[tokio::test]
async fn test_connect_failure_marks_error() {
    let rig = rig().await;
    let id = rig.register("door-01", "10.0.0.1").await;
    rig.fleet.set_offline("10.0.0.1", true);

    let result = rig.manager.connect(&id).await;
    assert!(matches!(result, Err(Error::ConnectionFailed { .. })));
    assert_eq!(rig.status(&id).await, DeviceStatus::Error);
    assert!(!rig.manager.is_connected(&id).await);

    let health = rig.manager.health(&id).await.unwrap();
    assert_eq!(health.error_count, 1);
    assert!(health.last_error.is_some());
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let rig = rig().await;
    let id = rig.register("door-01", "10.0.0.1").await;

    rig.manager.connect(&id).await.unwrap();
    assert!(rig.manager.disconnect(&id).await.unwrap());
    assert_eq!(rig.status(&id).await, DeviceStatus::Disconnected);

    // Second disconnect has nothing to do
    assert!(!rig.manager.disconnect(&id).await.unwrap());
    assert_eq!(rig.status(&id).await, DeviceStatus::Disconnected);
}

#[tokio::test]
async fn test_probe_failure_demotes_but_keeps_handle() {
    let rig = rig().await;
    let id = rig.register("door-01", "10.0.0.1").await;
    rig.manager.connect(&id).await.unwrap();

    rig.fleet.fail_next_probes("10.0.0.1", 1);
    let probed = rig.manager.probe_connected().await;
    assert_eq!(probed, 1);
    assert_eq!(rig.status(&id).await, DeviceStatus::Error);
    // Handle survives the demotion so the next cycle can observe recovery
    assert!(rig.manager.is_connected(&id).await);
    assert_eq!(rig.manager.health(&id).await.unwrap().error_count, 1);

    // Recovery resets the health counter without touching the status
    rig.manager.probe_connected().await;
    assert_eq!(rig.manager.health(&id).await.unwrap().error_count, 0);
    assert_eq!(rig.status(&id).await, DeviceStatus::Error);
}

#[tokio::test]
async fn test_probe_status_event_gated_on_change() {
    let rig = rig().await;
    let id = rig.register("door-01", "10.0.0.1").await;
    rig.manager.connect(&id).await.unwrap();

    rig.fleet.fail_next_probes("10.0.0.1", 2);
    let mut rx = rig.events.subscribe();
    rig.manager.probe_connected().await;
    rig.manager.probe_connected().await;

    let mut status_changes = 0;
    let mut health_updates = 0;
    while let Ok(event) = rx.try_recv() {
        match event {
            DomainEvent::DeviceStatusChanged { .. } => status_changes += 1,
            DomainEvent::DeviceHealthUpdated { .. } => health_updates += 1,
            _ => {}
        }
    }
    // The second failing probe repeats Error -> Error and must stay silent
    assert_eq!(status_changes, 1);
    assert_eq!(health_updates, 2);
    assert_eq!(rig.manager.health(&id).await.unwrap().error_count, 2);
}

#[tokio::test]
async fn test_update_config_reconnects_on_address_change() {
    let rig = rig().await;
    let id = rig.register("door-01", "10.0.0.1").await;
    rig.manager.connect(&id).await.unwrap();
    assert_eq!(rig.fleet.connect_count("10.0.0.1"), 1);

    // A cosmetic rename must not churn the connection
    let rename = DeviceConfigUpdate {
        name: Some("Front door".to_string()),
        ..DeviceConfigUpdate::default()
    };
    rig.manager.update_config(&id, &rename).await.unwrap();
    assert_eq!(rig.fleet.connect_count("10.0.0.1"), 1);

    let rehome = DeviceConfigUpdate {
        host: Some("10.0.0.2".to_string()),
        ..DeviceConfigUpdate::default()
    };
    let updated = rig.manager.update_config(&id, &rehome).await.unwrap();
    assert_eq!(updated.address.host, "10.0.0.2");
    assert_eq!(rig.fleet.connect_count("10.0.0.2"), 1);
    assert_eq!(rig.status(&id).await, DeviceStatus::Connected);
}

#[tokio::test]
async fn test_update_config_commits_even_if_reconnect_fails() {
    let rig = rig().await;
    let id = rig.register("door-01", "10.0.0.1").await;
    rig.manager.connect(&id).await.unwrap();

    rig.fleet.set_offline("10.0.0.9", true);
    let rehome = DeviceConfigUpdate {
        host: Some("10.0.0.9".to_string()),
        ..DeviceConfigUpdate::default()
    };
    // The merge holds although the follow-up reconnect fails
    let updated = rig.manager.update_config(&id, &rehome).await.unwrap();
    assert_eq!(updated.address.host, "10.0.0.9");
    assert_eq!(rig.status(&id).await, DeviceStatus::Error);
}

#[tokio::test]
async fn test_test_connection_probes_on_demand() {
    let rig = rig().await;
    let id = rig.register("door-01", "10.0.0.1").await;

    let result = rig.manager.test_connection(&id).await;
    assert!(matches!(result, Err(Error::NotConnected(_))));

    rig.manager.connect(&id).await.unwrap();
    let report = rig.manager.test_connection(&id).await.unwrap();
    assert!(report.success);
    assert!(report.latency.is_some());

    rig.fleet.fail_next_probes("10.0.0.1", 1);
    let report = rig.manager.test_connection(&id).await.unwrap();
    assert!(!report.success);
    // An on-demand probe never moves the persisted status by itself
    assert_eq!(rig.status(&id).await, DeviceStatus::Connected);
}

#[tokio::test]
async fn test_reconnect_all_honors_auto_reconnect() {
    let rig = rig().await;
    let ok = rig.register("door-01", "10.0.0.1").await;
    let down = rig.register("door-02", "10.0.0.2").await;
    rig.fleet.set_offline("10.0.0.2", true);

    let manual = device("door-03");
    let config = DeviceConfig::new(
        manual.clone(),
        "Manual terminal",
        TerminalAddress::new("10.0.0.3", 80),
    )
    .with_auto_reconnect(false);
    rig.store.create_device(config).await.unwrap();

    let connected = rig.manager.reconnect_all().await;
    assert_eq!(connected, 1);
    assert!(rig.manager.is_connected(&ok).await);
    assert!(!rig.manager.is_connected(&down).await);
    assert_eq!(rig.status(&down).await, DeviceStatus::Error);
    // Opted-out devices are never touched
    assert_eq!(rig.fleet.connect_count("10.0.0.3"), 0);
    assert!(!rig.manager.is_connected(&manual).await);
}

#[tokio::test]
async fn test_remove_device_drops_handle_and_health() {
    let rig = rig().await;
    let id = rig.register("door-01", "10.0.0.1").await;
    rig.manager.connect(&id).await.unwrap();

    rig.manager.remove_device(&id).await.unwrap();
    assert!(rig.store.get_device(&id).await.is_none());
    assert!(!rig.manager.is_connected(&id).await);
    assert!(rig.manager.health(&id).await.is_none());
}

// ── Bulk operations ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_bulk_connect_isolates_failures() {
    let rig = rig().await;
    let a = rig.register("door-01", "10.0.0.1").await;
    let b = rig.register("door-02", "10.0.0.2").await;
    let c = rig.register("door-03", "10.0.0.3").await;
    rig.fleet.set_offline("10.0.0.2", true);

    let coordinator = rig.coordinator();
    let mut rx = rig.events.subscribe();
    let op_id = coordinator
        .create(BulkOperationKind::Connect, vec![a.clone(), b.clone(), c.clone()], None)
        .await
        .unwrap();

    // Visible immediately, before the executor has done anything
    assert!(coordinator.get(&op_id).await.is_some());

    let op = wait_terminal(&coordinator, op_id).await;
    assert_eq!(op.status, BulkOperationStatus::Completed);
    assert_eq!(op.progress, 100);
    assert_eq!(op.results.len(), 3);
    assert!(op.results[0].success);
    assert!(!op.results[1].success);
    assert!(op.results[1].error.is_some());
    assert!(op.results[2].success);
    // Order of execution is the order of the device list
    assert_eq!(op.results[0].device_id, a);
    assert_eq!(op.results[2].device_id, c);

    assert!(rig.manager.is_connected(&a).await);
    assert!(rig.manager.is_connected(&c).await);
    assert!(!rig.manager.is_connected(&b).await);

    // Progress events are monotone and the completion event carries counts
    let mut last_progress = 0;
    let mut completed = None;
    while let Ok(event) = rx.try_recv() {
        match event {
            DomainEvent::BulkOperationProgress {
                operation_id,
                progress,
                ..
            } if operation_id == op_id => {
                assert!(progress >= last_progress);
                last_progress = progress;
            }
            DomainEvent::BulkOperationCompleted {
                operation_id,
                status,
                succeeded,
                failed,
                ..
            } if operation_id == op_id => {
                completed = Some((status, succeeded, failed));
            }
            _ => {}
        }
    }
    assert_eq!(last_progress, 100);
    assert_eq!(completed, Some(("completed".to_string(), 2, 1)));
}

#[tokio::test]
async fn test_bulk_rejects_empty_device_list() {
    let rig = rig().await;
    let coordinator = rig.coordinator();
    let result = coordinator
        .create(BulkOperationKind::Connect, Vec::new(), None)
        .await;
    assert!(matches!(result, Err(Error::EmptyDeviceList)));
}

#[tokio::test]
async fn test_bulk_cancel_before_execution() {
    let rig = rig().await;
    let a = rig.register("door-01", "10.0.0.1").await;
    let b = rig.register("door-02", "10.0.0.2").await;

    let coordinator = rig.coordinator();
    let op_id = coordinator
        .create(BulkOperationKind::Connect, vec![a, b], None)
        .await
        .unwrap();
    // Single-threaded test runtime: the detached executor has not run yet,
    // so the cancel lands before the first step.
    assert!(coordinator.cancel(&op_id).await);

    let op = wait_terminal(&coordinator, op_id).await;
    assert_eq!(op.status, BulkOperationStatus::Cancelled);
    assert!(op.results.is_empty());

    // Cancelling a finished operation reports false
    assert!(!coordinator.cancel(&op_id).await);
}

#[tokio::test]
async fn test_bulk_configure_applies_params() {
    let rig = rig().await;
    let a = rig.register("door-01", "10.0.0.1").await;

    let coordinator = rig.coordinator();
    let params = serde_json::json!({ "location": "lobby" });
    let op_id = coordinator
        .create(BulkOperationKind::Configure, vec![a.clone()], Some(params))
        .await
        .unwrap();

    let op = wait_terminal(&coordinator, op_id).await;
    assert_eq!(op.status, BulkOperationStatus::Completed);
    assert!(op.results[0].success);
    assert_eq!(
        rig.store.get_device(&a).await.unwrap().location.as_deref(),
        Some("lobby")
    );
}

#[tokio::test]
async fn test_bulk_unknown_kind_string_rejected() {
    let parsed = "reboot".parse::<BulkOperationKind>();
    assert!(matches!(parsed, Err(Error::UnknownOperation(_))));
    assert_eq!("sync".parse::<BulkOperationKind>().unwrap(), BulkOperationKind::Sync);
}

// ── Sync ────────────────────────────────────────────────────────────────

fn terminal_user(id: &str, name: &str) -> TerminalUser {
    TerminalUser {
        id: id.to_string(),
        name: name.to_string(),
        department: None,
        privilege: None,
    }
}

#[tokio::test]
async fn test_sync_pass_merges_and_dedupes() {
    let rig = rig().await;
    let id = rig.register("door-01", "10.0.0.1").await;
    let now = Utc::now();

    rig.fleet.push_user("10.0.0.1", terminal_user("u1", "Alice"));
    rig.fleet.push_user("10.0.0.1", terminal_user("u2", "Bob"));
    rig.fleet.push_record(
        "10.0.0.1",
        AttendanceRecord {
            user_id: "u1".to_string(),
            timestamp: now - ChronoDuration::hours(1),
            method: Some("face".to_string()),
        },
    );
    // Outside the 24h window, must be ignored
    rig.fleet.push_record(
        "10.0.0.1",
        AttendanceRecord {
            user_id: "u2".to_string(),
            timestamp: now - ChronoDuration::days(3),
            method: Some("face".to_string()),
        },
    );

    rig.manager.connect(&id).await.unwrap();
    let mut rx = rig.events.subscribe();

    let report = rig.engine.sync_device(&id).await.unwrap();
    assert_eq!(report.users_merged, 2);
    assert_eq!(report.entries_inserted, 1);
    assert_eq!(report.errors, 0);

    let alice = rig
        .employees
        .find_by_terminal_user_id("u1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(alice.name, "Alice");
    assert_eq!(rig.attendance.count_by_device("door-01").await.unwrap(), 1);

    match next_event(&mut rx).await {
        DomainEvent::UserVerification {
            terminal_user_id, ..
        } => assert_eq!(terminal_user_id, "u1"),
        other => panic!("unexpected event: {other:?}"),
    }
    match next_event(&mut rx).await {
        DomainEvent::SyncCompleted {
            entries_inserted, ..
        } => assert_eq!(entries_inserted, 1),
        other => panic!("unexpected event: {other:?}"),
    }

    // A second pass over the same data writes nothing new
    let report = rig.engine.sync_device(&id).await.unwrap();
    assert_eq!(report.users_merged, 0);
    assert_eq!(report.entries_inserted, 0);
}

#[tokio::test]
async fn test_sync_pass_updates_renamed_user() {
    let rig = rig().await;
    let id = rig.register("door-01", "10.0.0.1").await;
    rig.fleet.push_user("10.0.0.1", terminal_user("u1", "Alice"));
    rig.manager.connect(&id).await.unwrap();

    rig.engine.sync_device(&id).await.unwrap();

    // The terminal reports a new display name on the next pass
    let rig_fleet = rig.fleet.clone();
    rig_fleet.push_user("10.0.0.1", terminal_user("u1", "Alice B."));
    // Both entries page through; the later one wins
    let report = rig.engine.sync_device(&id).await.unwrap();
    assert_eq!(report.users_merged, 1);

    let alice = rig
        .employees
        .find_by_terminal_user_id("u1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(alice.name, "Alice B.");
}

#[tokio::test]
async fn test_sync_requires_connection() {
    let rig = rig().await;
    let id = rig.register("door-01", "10.0.0.1").await;
    let result = rig.engine.sync_device(&id).await;
    assert!(matches!(result, Err(Error::NotConnected(_))));
}

#[tokio::test]
async fn test_sync_worker_runs_pass_on_connect() {
    let rig = rig().await;
    let id = rig.register("door-01", "10.0.0.1").await;
    rig.fleet.push_user("10.0.0.1", terminal_user("u1", "Alice"));

    let worker = DeviceSyncWorker::spawn(
        rig.engine.clone(),
        rig.events.subscribe(),
        Duration::from_secs(60),
    );
    let mut rx = rig.events.subscribe();

    rig.manager.connect(&id).await.unwrap();

    // The worker reacts to the Connected event with an immediate pass
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Ok(DomainEvent::SyncCompleted { device_id, .. })) => {
                assert_eq!(device_id, id);
                break;
            }
            Ok(Ok(_)) => {}
            other => panic!("no sync pass observed: {other:?}"),
        }
    }

    assert!(
        rig.employees
            .find_by_terminal_user_id("u1")
            .await
            .unwrap()
            .is_some()
    );
    worker.stop().await;
}

#[tokio::test]
async fn test_sync_worker_recovers_from_panicked_pass() {
    let rig = rig().await;
    let id = rig.register("door-01", "10.0.0.1").await;
    rig.fleet.push_user("10.0.0.1", terminal_user("u1", "Alice"));
    rig.fleet.panic_next_user_fetches("10.0.0.1", 1);

    let worker = DeviceSyncWorker::spawn(
        rig.engine.clone(),
        rig.events.subscribe(),
        Duration::from_millis(50),
    );
    let mut rx = rig.events.subscribe();

    rig.manager.connect(&id).await.unwrap();

    // The first pass dies inside the client task; the device must still be
    // rescheduled, and the follow-up pass completes normally.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Ok(DomainEvent::SyncCompleted { device_id, .. })) => {
                assert_eq!(device_id, id);
                break;
            }
            Ok(Ok(_)) => {}
            other => panic!("sync never recovered after the panicked pass: {other:?}"),
        }
    }
    worker.stop().await;
}
