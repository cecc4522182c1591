use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::connection::ConnectionHandle;
use crate::error::PresenceError;
use crate::metrics;
use crate::presence::PresenceCoordinator;
use crate::websocket::ServerSignal;

/// A chat message scoped to one event room.
///
/// Transient: exists only for the duration of a single fan-out, never
/// persisted. `sent_at` is stamped server-side at receipt and never
/// trusted from the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub event_id: String,
    pub sender_user_id: String,
    pub body: String,
    pub sent_at: DateTime<Utc>,
}

/// Result of a single fan-out attempt.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryResult {
    /// Number of connections the signal was delivered to
    pub delivered_to: usize,
    /// Number of connections that failed to receive
    pub failed: usize,
}

/// Statistics for the broadcast dispatcher
#[derive(Debug, Default)]
pub struct DispatcherStats {
    /// Membership snapshots published
    pub snapshots_published: AtomicU64,
    /// Chat messages accepted for fan-out
    pub chat_messages: AtomicU64,
    /// Chat messages rejected at the not-joined gate
    pub chat_rejected: AtomicU64,
    /// Total successful deliveries (connection count)
    pub total_delivered: AtomicU64,
    /// Total failed deliveries
    pub total_failed: AtomicU64,
}

impl DispatcherStats {
    pub fn snapshot(&self) -> DispatcherStatsSnapshot {
        DispatcherStatsSnapshot {
            snapshots_published: self.snapshots_published.load(Ordering::Relaxed),
            chat_messages: self.chat_messages.load(Ordering::Relaxed),
            chat_rejected: self.chat_rejected.load(Ordering::Relaxed),
            total_delivered: self.total_delivered.load(Ordering::Relaxed),
            total_failed: self.total_failed.load(Ordering::Relaxed),
        }
    }

    fn record_delivery(&self, delivered: usize, failed: usize) {
        self.total_delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
        self.total_failed.fetch_add(failed as u64, Ordering::Relaxed);
        metrics::DELIVERIES_TOTAL.inc_by(delivered as u64);
        metrics::DELIVERY_FAILURES_TOTAL.inc_by(failed as u64);
    }
}

/// Snapshot of dispatcher statistics
#[derive(Debug, Clone, Serialize)]
pub struct DispatcherStatsSnapshot {
    pub snapshots_published: u64,
    pub chat_messages: u64,
    pub chat_rejected: u64,
    pub total_delivered: u64,
    pub total_failed: u64,
}

/// Delivers chat messages and membership snapshots to room audiences.
///
/// Delivery is best-effort at-most-once: a failure to reach one
/// connection never prevents delivery to the others and never surfaces
/// to the caller as an error. Enqueues never wait for buffer space, so
/// a stalled transport cannot hold up the rest of the room.
///
/// The `accept_gate` serializes snapshot-plus-enqueue for each publish,
/// so every recipient observes broadcasts in the same acceptance order
/// even when publishes race on different tasks.
pub struct BroadcastDispatcher {
    coordinator: Arc<PresenceCoordinator>,
    stats: DispatcherStats,
    accept_gate: Mutex<()>,
}

impl BroadcastDispatcher {
    pub fn new(coordinator: Arc<PresenceCoordinator>) -> Self {
        Self {
            coordinator,
            stats: DispatcherStats::default(),
            accept_gate: Mutex::new(()),
        }
    }

    /// Get dispatcher statistics
    pub fn stats(&self) -> DispatcherStatsSnapshot {
        self.stats.snapshot()
    }

    fn accept(&self) -> MutexGuard<'_, ()> {
        self.accept_gate.lock().expect("dispatcher accept gate poisoned")
    }

    /// Publish the current membership snapshot of a room to every
    /// connection joined to it.
    #[tracing::instrument(name = "broadcast.membership", skip(self))]
    pub fn publish_membership(&self, event_id: &str) -> DeliveryResult {
        let gate = self.accept();

        // One lock acquisition, so members and recipients agree
        let (members, recipients) = self.coordinator.room_audience(event_id);
        let signal = ServerSignal::active_users(event_id, members);

        let (delivered, failed) = self.send_to_connections(&recipients, &signal);
        drop(gate);

        self.stats
            .snapshots_published
            .fetch_add(1, Ordering::Relaxed);
        self.stats.record_delivery(delivered, failed);
        metrics::SNAPSHOTS_PUBLISHED_TOTAL.inc();

        tracing::debug!(
            event_id = %event_id,
            delivered = delivered,
            failed = failed,
            "Published membership snapshot"
        );

        DeliveryResult {
            delivered_to: delivered,
            failed,
        }
    }

    /// Fan a chat message out to every connection joined to the room,
    /// including the sender.
    ///
    /// The sender's connection must have joined the room; otherwise the
    /// signal is rejected with `NotJoined` and no broadcast occurs.
    #[tracing::instrument(
        name = "broadcast.chat",
        skip(self, sender, body),
        fields(connection_id = %sender.id, sender_user_id = %sender.user_id)
    )]
    pub fn publish_chat_message(
        &self,
        sender: &ConnectionHandle,
        event_id: &str,
        body: String,
    ) -> Result<DeliveryResult, PresenceError> {
        if !self.coordinator.has_joined(sender.id, event_id) {
            self.stats.chat_rejected.fetch_add(1, Ordering::Relaxed);
            metrics::CHAT_REJECTED_TOTAL.inc();
            return Err(PresenceError::NotJoined {
                connection_id: sender.id,
                event_id: event_id.to_string(),
            });
        }

        let message = ChatMessage {
            event_id: event_id.to_string(),
            sender_user_id: sender.user_id.clone(),
            body,
            sent_at: Utc::now(),
        };

        let gate = self.accept();
        let recipients = self.coordinator.connections_in_room(event_id);
        let signal = ServerSignal::Chat { message };
        let (delivered, failed) = self.send_to_connections(&recipients, &signal);
        drop(gate);

        self.stats.chat_messages.fetch_add(1, Ordering::Relaxed);
        self.stats.record_delivery(delivered, failed);
        metrics::CHAT_MESSAGES_TOTAL.inc();

        tracing::debug!(
            event_id = %event_id,
            delivered = delivered,
            failed = failed,
            "Fanned out chat message"
        );

        Ok(DeliveryResult {
            delivered_to: delivered,
            failed,
        })
    }

    /// Enqueue a signal on every connection's outbound buffer,
    /// swallowing per-recipient failures.
    ///
    /// A full buffer counts as a failed delivery: the transport is live
    /// but stalled past its buffer, and the stale-connection cleanup
    /// will reap it if it stays wedged.
    fn send_to_connections(
        &self,
        connections: &[Arc<ConnectionHandle>],
        signal: &ServerSignal,
    ) -> (usize, usize) {
        let mut delivered = 0;
        let mut failed = 0;
        for conn in connections {
            match conn.try_send(signal.clone()) {
                Ok(_) => delivered += 1,
                Err(e) => {
                    tracing::debug!(
                        connection_id = %conn.id,
                        error = %e,
                        "Dropped signal for unreachable connection"
                    );
                    failed += 1;
                }
            }
        }
        (delivered, failed)
    }
}
