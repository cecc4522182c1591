use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::broadcast;
use tokio::time::timeout;

use crate::broadcast::BroadcastDispatcher;
use crate::config::WebSocketConfig;
use crate::presence::PresenceCoordinator;
use crate::websocket::ServerSignal;

/// Timeout for individual heartbeat send operations
const HEARTBEAT_SEND_TIMEOUT_MS: u64 = 5000;

/// Background task for heartbeat and stale-connection cleanup.
///
/// Stale connections go through the coordinator's regular disconnect
/// path, so their room memberships are retracted and broadcast exactly
/// as for a graceful close.
pub struct HeartbeatTask {
    config: WebSocketConfig,
    coordinator: Arc<PresenceCoordinator>,
    dispatcher: Arc<BroadcastDispatcher>,
    shutdown: broadcast::Receiver<()>,
}

impl HeartbeatTask {
    pub fn new(
        config: WebSocketConfig,
        coordinator: Arc<PresenceCoordinator>,
        dispatcher: Arc<BroadcastDispatcher>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            coordinator,
            dispatcher,
            shutdown,
        }
    }

    /// Run the heartbeat and cleanup loops
    pub async fn run(mut self) {
        let heartbeat_interval = Duration::from_secs(self.config.heartbeat_interval);
        let cleanup_interval = Duration::from_secs(self.config.cleanup_interval);
        let connection_timeout = self.config.connection_timeout;

        let mut heartbeat_timer = tokio::time::interval(heartbeat_interval);
        let mut cleanup_timer = tokio::time::interval(cleanup_interval);

        // Skip immediate first tick
        heartbeat_timer.tick().await;
        cleanup_timer.tick().await;

        tracing::info!(
            heartbeat_interval_secs = self.config.heartbeat_interval,
            cleanup_interval_secs = self.config.cleanup_interval,
            connection_timeout_secs = connection_timeout,
            "Heartbeat task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Heartbeat task received shutdown signal");
                    break;
                }
                _ = heartbeat_timer.tick() => {
                    self.send_heartbeats().await;
                }
                _ = cleanup_timer.tick() => {
                    self.cleanup_stale_connections(connection_timeout);
                }
            }
        }

        tracing::info!("Heartbeat task stopped");
    }

    /// Send a heartbeat signal to all connections in parallel
    async fn send_heartbeats(&self) {
        let connections = self.coordinator.all_connections();
        let total = connections.len();

        if total == 0 {
            return;
        }

        let start = Instant::now();
        let send_timeout = Duration::from_millis(HEARTBEAT_SEND_TIMEOUT_MS);

        let futures: Vec<_> = connections
            .iter()
            .map(|handle| {
                let handle = handle.clone();
                async move {
                    match timeout(send_timeout, handle.send(ServerSignal::Heartbeat)).await {
                        Ok(Ok(_)) => true,
                        Ok(Err(_)) => {
                            tracing::debug!(
                                connection_id = %handle.id,
                                "Failed to send heartbeat, connection may be dead"
                            );
                            false
                        }
                        Err(_) => {
                            tracing::debug!(
                                connection_id = %handle.id,
                                timeout_ms = HEARTBEAT_SEND_TIMEOUT_MS,
                                "Heartbeat send timed out"
                            );
                            false
                        }
                    }
                }
            })
            .collect();

        let results = join_all(futures).await;
        let sent = results.iter().filter(|ok| **ok).count();

        tracing::debug!(
            total = total,
            sent = sent,
            failed = total - sent,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Heartbeat round completed"
        );
    }

    /// Disconnect connections idle past the timeout
    fn cleanup_stale_connections(&self, timeout_secs: u64) {
        let stale = self.coordinator.stale_connections(timeout_secs);
        if stale.is_empty() {
            return;
        }

        let mut removed = 0;
        for connection_id in stale {
            match self.coordinator.disconnect(connection_id) {
                Ok(changed_rooms) => {
                    removed += 1;
                    tracing::info!(
                        connection_id = %connection_id,
                        "Removing stale connection due to timeout"
                    );
                    for event_id in changed_rooms {
                        self.dispatcher.publish_membership(&event_id);
                    }
                }
                Err(e) => {
                    // Lost a race with the transport-side teardown
                    tracing::debug!(connection_id = %connection_id, error = %e, "Stale cleanup skipped");
                }
            }
        }

        if removed > 0 {
            tracing::info!(
                removed = removed,
                timeout_secs = timeout_secs,
                "Cleaned up stale connections"
            );
        }
    }
}
