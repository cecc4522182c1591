//! Connection handle shared between the coordinator and the transport.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::websocket::ServerSignal;

/// Handle for a single WebSocket connection.
///
/// The handle is the delivery endpoint: anything holding it may send
/// signals, but room membership for the connection is owned exclusively
/// by the presence coordinator.
#[derive(Debug)]
pub struct ConnectionHandle {
    pub id: Uuid,
    pub user_id: String,
    pub sender: mpsc::Sender<ServerSignal>,
    pub connected_at: DateTime<Utc>,
    /// Last activity timestamp (Unix seconds) - using AtomicI64 for lock-free updates
    last_activity: AtomicI64,
}

impl ConnectionHandle {
    pub fn new(user_id: String, sender: mpsc::Sender<ServerSignal>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            sender,
            connected_at: now,
            last_activity: AtomicI64::new(now.timestamp()),
        }
    }

    pub fn update_activity(&self) {
        self.last_activity
            .store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.last_activity.load(Ordering::Relaxed), 0)
            .unwrap_or_else(Utc::now)
    }

    /// Queue a signal for delivery to this connection
    pub async fn send(
        &self,
        signal: ServerSignal,
    ) -> Result<(), mpsc::error::SendError<ServerSignal>> {
        self.sender.send(signal).await
    }

    /// Queue a signal without waiting for buffer space. Fails if the
    /// outbound buffer is full or the connection is gone.
    pub fn try_send(
        &self,
        signal: ServerSignal,
    ) -> Result<(), mpsc::error::TrySendError<ServerSignal>> {
        self.sender.try_send(signal)
    }
}
