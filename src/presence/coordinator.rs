use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::connection::{ConnectionHandle, ConnectionRegistry};
use crate::error::PresenceError;
use crate::room::RoomRegistry;
use crate::websocket::ServerSignal;

/// Coordinates room membership across connections.
///
/// The coordinator is the single writer for the connection registry, the
/// room registry, and the per-(event, user) reference counts. All three
/// live behind one mutex; the lock is held only for the duration of a
/// single operation and never across an await point, so every operation
/// is atomic with respect to concurrent signals. Broadcast fan-out
/// happens after the lock is released, over handle snapshots collected
/// under it.
///
/// The reference count per (event, user) pair is the number of live
/// connections that user holds open against that room. Room membership
/// changes only on 0→1 and 1→0 transitions, which is what makes
/// multi-tab joins transparent.
pub struct PresenceCoordinator {
    state: Mutex<PresenceState>,
}

struct PresenceState {
    connections: ConnectionRegistry,
    rooms: RoomRegistry,
    /// (event_id, user_id) -> live connection count
    room_refs: HashMap<(String, String), usize>,
}

/// Point-in-time view of the presence registries.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PresenceStats {
    pub total_connections: usize,
    pub unique_users: usize,
    pub active_rooms: usize,
    pub rooms: HashMap<String, usize>,
}

impl PresenceCoordinator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PresenceState {
                connections: ConnectionRegistry::new(),
                rooms: RoomRegistry::new(),
                room_refs: HashMap::new(),
            }),
        }
    }

    /// Register a new connection for the given user identity.
    pub fn register(
        &self,
        user_id: String,
        sender: mpsc::Sender<ServerSignal>,
    ) -> Result<Arc<ConnectionHandle>, PresenceError> {
        let handle = Arc::new(ConnectionHandle::new(user_id, sender));
        let mut state = self.lock();
        state.connections.register(handle.clone())?;

        tracing::info!(
            connection_id = %handle.id,
            user_id = %handle.user_id,
            "Connection registered"
        );

        Ok(handle)
    }

    /// Join a connection to an event room.
    ///
    /// Returns true if room membership changed (the user's first live
    /// connection to this room), in which case the caller should publish
    /// a membership snapshot. Re-joining the same room from the same
    /// connection without an intervening leave is a no-op.
    pub fn join(&self, connection_id: Uuid, event_id: &str) -> Result<bool, PresenceError> {
        let mut state = self.lock();

        let conn = state
            .connections
            .get_mut(connection_id)
            .ok_or(PresenceError::UnknownConnection(connection_id))?;
        if !conn.joined_rooms.insert(event_id.to_string()) {
            return Ok(false);
        }
        let user_id = conn.handle.user_id.clone();

        let refs = state
            .room_refs
            .entry((event_id.to_string(), user_id.clone()))
            .or_insert(0);
        *refs += 1;
        let first_connection = *refs == 1;

        let changed = if first_connection {
            state.rooms.add_member(event_id, &user_id)
        } else {
            false
        };

        tracing::debug!(
            connection_id = %connection_id,
            user_id = %user_id,
            event_id = %event_id,
            membership_changed = changed,
            "Joined room"
        );

        Ok(changed)
    }

    /// Remove a connection from an event room.
    ///
    /// Idempotent against duplicate or late leave signals: a connection
    /// that never joined the room is a no-op. Returns true if room
    /// membership changed (the user's last live connection left).
    pub fn leave(&self, connection_id: Uuid, event_id: &str) -> Result<bool, PresenceError> {
        let mut state = self.lock();

        let conn = state
            .connections
            .get_mut(connection_id)
            .ok_or(PresenceError::UnknownConnection(connection_id))?;
        if !conn.joined_rooms.remove(event_id) {
            return Ok(false);
        }
        let user_id = conn.handle.user_id.clone();

        let changed = state.release_ref(event_id, &user_id);

        tracing::debug!(
            connection_id = %connection_id,
            user_id = %user_id,
            event_id = %event_id,
            membership_changed = changed,
            "Left room"
        );

        Ok(changed)
    }

    /// Tear down a connection: retract its membership from every room it
    /// had joined, then discard the record.
    ///
    /// Returns the rooms whose membership changed; the caller should
    /// publish a snapshot to each. Runs entirely under the state lock, so
    /// no join/leave signal for this connection can interleave once
    /// teardown begins; a second disconnect fails with
    /// `UnknownConnection`.
    pub fn disconnect(&self, connection_id: Uuid) -> Result<Vec<String>, PresenceError> {
        let mut state = self.lock();

        let conn = state.connections.unregister(connection_id)?;
        let user_id = conn.handle.user_id.clone();

        let mut changed_rooms = Vec::new();
        for event_id in conn.joined_rooms {
            if state.release_ref(&event_id, &user_id) {
                changed_rooms.push(event_id);
            }
        }

        tracing::info!(
            connection_id = %connection_id,
            user_id = %user_id,
            changed_rooms = changed_rooms.len(),
            "Connection disconnected"
        );

        Ok(changed_rooms)
    }

    /// Point-in-time copy of a room's members, in join order.
    pub fn members_of(&self, event_id: &str) -> Vec<String> {
        self.lock().rooms.members_of(event_id)
    }

    pub fn has_room(&self, event_id: &str) -> bool {
        self.lock().rooms.contains_room(event_id)
    }

    /// Whether the connection has joined the given room.
    pub fn has_joined(&self, connection_id: Uuid, event_id: &str) -> bool {
        self.lock()
            .connections
            .get(connection_id)
            .map(|c| c.joined_rooms.contains(event_id))
            .unwrap_or(false)
    }

    /// Members snapshot and recipient handles for a room, taken under a
    /// single lock so the two views are consistent with each other.
    pub fn room_audience(&self, event_id: &str) -> (Vec<String>, Vec<Arc<ConnectionHandle>>) {
        let state = self.lock();
        (
            state.rooms.members_of(event_id),
            state.connections.handles_in_room(event_id),
        )
    }

    /// Handles of connections currently joined to the given room.
    pub fn connections_in_room(&self, event_id: &str) -> Vec<Arc<ConnectionHandle>> {
        self.lock().connections.handles_in_room(event_id)
    }

    pub fn all_connections(&self) -> Vec<Arc<ConnectionHandle>> {
        self.lock().connections.all_handles()
    }

    /// Connections with no activity for longer than the timeout.
    pub fn stale_connections(&self, timeout_secs: u64) -> Vec<Uuid> {
        let cutoff = Utc::now() - chrono::Duration::seconds(timeout_secs as i64);
        self.lock()
            .connections
            .all_handles()
            .into_iter()
            .filter(|h| h.last_activity() < cutoff)
            .map(|h| h.id)
            .collect()
    }

    pub fn stats(&self) -> PresenceStats {
        let state = self.lock();
        PresenceStats {
            total_connections: state.connections.len(),
            unique_users: state.connections.unique_users(),
            active_rooms: state.rooms.room_count(),
            rooms: state.rooms.room_sizes().into_iter().collect(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PresenceState> {
        // Lock poisoning would mean a panic while mutating presence
        // state; there is no partial state to salvage, so propagate.
        self.state.lock().expect("presence state lock poisoned")
    }
}

impl PresenceState {
    /// Decrement the (event, user) reference count; on the 1→0 transition
    /// remove the user from the room. Returns true if membership changed.
    fn release_ref(&mut self, event_id: &str, user_id: &str) -> bool {
        let key = (event_id.to_string(), user_id.to_string());
        // Counts are created on join, so a missing entry means the
        // membership was already retracted.
        let Some(refs) = self.room_refs.get_mut(&key) else {
            return false;
        };
        if *refs > 1 {
            *refs -= 1;
            return false;
        }
        self.room_refs.remove(&key);
        self.rooms.remove_member(event_id, user_id)
    }
}

impl Default for PresenceCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
