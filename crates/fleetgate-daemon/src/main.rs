//! Fleet orchestration daemon.
//!
//! Wires the configuration store, connection manager, health monitor,
//! sync worker, bulk coordinator and observer event server together,
//! then runs until ctrl-c.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use fleetgate_config::{ConfigStore, DeviceFilter};
use fleetgate_core::constants::{
    DEFAULT_HEALTH_INTERVAL_SECS, DEFAULT_METRICS_INTERVAL_SECS, DEFAULT_SYNC_INTERVAL_SECS,
    EVENT_CHANNEL_CAPACITY,
};
use fleetgate_core::event::event_channel;
use fleetgate_events::{
    Broadcaster, EventServer, EventServerConfig, RoomRegistry, StaticTokenValidator,
};
use fleetgate_fleet::{
    BulkOperationCoordinator, ConnectionManager, ConnectionManagerConfig, DeviceSyncWorker,
    HealthMonitor, SyncEngine, SyncEngineConfig,
};
use fleetgate_protocol::mock::{MockFleet, MockTerminalFactory};
use fleetgate_storage::{
    Database, DatabaseConfig, SqliteAttendanceRepository, SqliteEmployeeRepository,
};

#[derive(Parser, Debug)]
#[command(name = "fleetgated", version, about = "Biometric terminal fleet orchestrator")]
struct Cli {
    /// Directory holding the durable device configuration snapshot
    #[arg(long, env = "FLEETGATE_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// SQLite database path for employees and attendance
    #[arg(long, env = "FLEETGATE_DATABASE", default_value = "./data/fleetgate.db")]
    database: PathBuf,

    /// Observer event server bind address
    #[arg(long, env = "FLEETGATE_BIND", default_value = "0.0.0.0:8765")]
    bind: SocketAddr,

    /// Shared token observers authenticate with
    #[arg(long, env = "FLEETGATE_OBSERVER_TOKEN")]
    observer_token: String,

    /// Optional token granting the admin role
    #[arg(long, env = "FLEETGATE_ADMIN_TOKEN")]
    admin_token: Option<String>,

    /// Health probe cadence in seconds
    #[arg(long, default_value_t = DEFAULT_HEALTH_INTERVAL_SECS)]
    health_interval: u64,

    /// Recurring attendance sync cadence in seconds
    #[arg(long, default_value_t = DEFAULT_SYNC_INTERVAL_SECS)]
    sync_interval: u64,

    /// Observer metrics push cadence in seconds
    #[arg(long, default_value_t = DEFAULT_METRICS_INTERVAL_SECS)]
    metrics_interval: u64,

    /// Drive the fleet against in-process mock terminals instead of hardware
    #[arg(long)]
    mock: bool,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| format!("{level},sqlx=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if !cli.mock {
        // The hardware transport ships as a separate factory crate; this
        // binary only links the mock transport.
        anyhow::bail!("no terminal transport selected; run with --mock");
    }

    info!(data_dir = %cli.data_dir.display(), "Starting fleetgated");

    let store = Arc::new(ConfigStore::open(&cli.data_dir).await?);
    let (events, _) = event_channel(EVENT_CHANNEL_CAPACITY);

    let db = Database::new(DatabaseConfig::new(cli.database.to_string_lossy())).await?;
    let employees = SqliteEmployeeRepository::new(db.pool().clone());
    let attendance = SqliteAttendanceRepository::new(db.pool().clone());

    let factory = MockTerminalFactory::new(MockFleet::new());
    let manager = Arc::new(ConnectionManager::new(
        store.clone(),
        factory,
        events.clone(),
        ConnectionManagerConfig::default(),
    ));
    let engine = Arc::new(SyncEngine::new(
        manager.clone(),
        employees,
        attendance,
        events.clone(),
        SyncEngineConfig::default(),
    ));

    // Held for the process lifetime; operations arrive once the management
    // API lands (tracked separately from the daemon wiring).
    let _bulk = Arc::new(BulkOperationCoordinator::new(
        manager.clone(),
        engine.clone(),
        events.clone(),
    ));

    let registry = Arc::new(RoomRegistry::new());
    let broadcaster = Arc::new(Broadcaster::new(
        registry.clone(),
        Duration::from_secs(cli.metrics_interval),
    ));
    for device in store.list_devices(&DeviceFilter::default()).await {
        broadcaster
            .seed_status(&device.id, device.branch.as_deref(), device.status)
            .await;
    }

    let validator = Arc::new(StaticTokenValidator::new(
        cli.observer_token,
        cli.admin_token,
    ));
    let server = EventServer::bind(
        EventServerConfig {
            bind_addr: cli.bind,
            ..Default::default()
        },
        registry,
        broadcaster.clone(),
        validator,
    )
    .await?;

    let cancel = CancellationToken::new();
    let broadcast_task = broadcaster.run(events.subscribe(), cancel.child_token());
    let server_task = server.run(cancel.child_token());

    // Subscribe before the startup connects so the worker sees them.
    let worker = DeviceSyncWorker::spawn(
        engine,
        events.subscribe(),
        Duration::from_secs(cli.sync_interval),
    );
    let monitor = HealthMonitor::spawn(manager.clone(), Duration::from_secs(cli.health_interval));

    let reconnected = manager.reconnect_all().await;
    info!(reconnected, "Startup reconnect finished");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    monitor.stop().await;
    worker.stop().await;
    cancel.cancel();
    if let Err(e) = server_task.await {
        warn!("Observer server task ended abnormally: {e}");
    }
    if let Err(e) = broadcast_task.await {
        warn!("Broadcaster task ended abnormally: {e}");
    }

    info!("Bye");
    Ok(())
}
