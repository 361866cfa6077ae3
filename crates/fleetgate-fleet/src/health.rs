//! Fixed-interval health probe cycle.

use crate::connection::ConnectionManager;
use fleetgate_core::constants::DEFAULT_HEALTH_INTERVAL_SECS;
use fleetgate_protocol::TerminalFactory;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Drives [`ConnectionManager::probe_connected`] on a fixed interval.
///
/// Ticks that land while a cycle is still running are skipped, so probe
/// cycles never stack; a slow fleet just probes less often.
pub struct HealthMonitor {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl HealthMonitor {
    /// Spawn the probe loop.
    pub fn spawn<F: TerminalFactory>(
        manager: Arc<ConnectionManager<F>>,
        interval: Duration,
    ) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticks = tokio::time::interval(interval);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The immediate first tick would race startup connects
            ticks.tick().await;

            info!(interval_secs = interval.as_secs(), "Health monitor started");
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticks.tick() => {
                        let probed = manager.probe_connected().await;
                        debug!(probed, "Health cycle finished");
                    }
                }
            }
            info!("Health monitor stopped");
        });
        Self { cancel, handle }
    }

    /// Default probe cadence.
    pub fn default_interval() -> Duration {
        Duration::from_secs(DEFAULT_HEALTH_INTERVAL_SECS)
    }

    /// Stop the loop and wait for it to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}
