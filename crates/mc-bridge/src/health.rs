//! Health monitor
//!
//! Periodically closes connections that have been idle longer than the
//! configured timeout.

use crate::correlation::CorrelationTable;
use crate::registry::ConnectionRegistry;
use mc_agent_core::ConnectionId;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Idle-connection sweeper
pub struct HealthMonitor {
    registry: Arc<ConnectionRegistry>,
    correlation: Arc<CorrelationTable>,
    interval: Duration,
    connection_timeout: Duration,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        correlation: Arc<CorrelationTable>,
        interval: Duration,
        connection_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            correlation,
            interval,
            connection_timeout,
        }
    }

    /// Close and remove every connection idle past the timeout
    pub fn sweep(&self) -> Vec<ConnectionId> {
        let mut closed = Vec::new();
        for connection in self.registry.active() {
            let idle = connection.idle_for();
            if idle <= self.connection_timeout {
                continue;
            }
            let id = connection.id().clone();
            info!(connection = %id, idle_secs = idle.as_secs(), "Closing idle connection");
            connection.close();
            self.registry.remove(&id);
            let failed = self.correlation.fail_connection(&id);
            if failed > 0 {
                debug!(connection = %id, "Failed {} pending request(s)", failed);
            }
            closed.push(id);
        }
        closed
    }

    /// Run the sweep loop until `shutdown` is cancelled
    pub fn spawn(self, shutdown: CancellationToken) -> BackgroundTask {
        let token = shutdown.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        self.sweep();
                    }
                }
            }
            debug!("Health monitor stopped");
        });
        BackgroundTask { shutdown, handle }
    }
}

/// A background loop with an explicit stop
pub struct BackgroundTask {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    /// Signal the loop and wait for it to exit
    pub async fn stop(self) {
        self.shutdown.cancel();
        let _ = self.handle.await;
    }
}
