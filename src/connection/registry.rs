use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use uuid::Uuid;

use crate::error::PresenceError;

use super::ConnectionHandle;

/// A registered connection and the rooms it has joined.
///
/// `joined_rooms` is the authoritative record used for disconnect
/// cleanup; it is mutated only by the presence coordinator.
#[derive(Debug)]
pub struct Connection {
    pub handle: Arc<ConnectionHandle>,
    pub joined_rooms: HashSet<String>,
}

/// Owns all live connection records.
///
/// The registry carries no interior synchronization: it lives inside the
/// presence coordinator's lock, which is the single writer for both this
/// registry and the room registry.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: HashMap<Uuid, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
        }
    }

    /// Register a new connection with an empty joined-room set.
    pub fn register(&mut self, handle: Arc<ConnectionHandle>) -> Result<(), PresenceError> {
        if self.connections.contains_key(&handle.id) {
            return Err(PresenceError::DuplicateConnection(handle.id));
        }
        self.connections.insert(
            handle.id,
            Connection {
                handle,
                joined_rooms: HashSet::new(),
            },
        );
        Ok(())
    }

    /// Remove and return a connection record.
    ///
    /// The caller is responsible for retracting room memberships held in
    /// the returned record; the registry itself does not touch rooms.
    pub fn unregister(&mut self, connection_id: Uuid) -> Result<Connection, PresenceError> {
        self.connections
            .remove(&connection_id)
            .ok_or(PresenceError::UnknownConnection(connection_id))
    }

    pub fn get(&self, connection_id: Uuid) -> Option<&Connection> {
        self.connections.get(&connection_id)
    }

    pub fn get_mut(&mut self, connection_id: Uuid) -> Option<&mut Connection> {
        self.connections.get_mut(&connection_id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn unique_users(&self) -> usize {
        self.connections
            .values()
            .map(|c| c.handle.user_id.as_str())
            .collect::<HashSet<_>>()
            .len()
    }

    pub fn all_handles(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections
            .values()
            .map(|c| c.handle.clone())
            .collect()
    }

    /// Handles of connections currently joined to the given room.
    pub fn handles_in_room(&self, event_id: &str) -> Vec<Arc<ConnectionHandle>> {
        self.connections
            .values()
            .filter(|c| c.joined_rooms.contains(event_id))
            .map(|c| c.handle.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn handle(user: &str) -> Arc<ConnectionHandle> {
        let (tx, _rx) = mpsc::channel(8);
        Arc::new(ConnectionHandle::new(user.to_string(), tx))
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = ConnectionRegistry::new();
        let h = handle("alice");
        registry.register(h.clone()).unwrap();

        let conn = registry.get(h.id).unwrap();
        assert_eq!(conn.handle.user_id, "alice");
        assert!(conn.joined_rooms.is_empty());
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = ConnectionRegistry::new();
        let h = handle("alice");
        registry.register(h.clone()).unwrap();

        let err = registry.register(h.clone()).unwrap_err();
        assert!(matches!(err, PresenceError::DuplicateConnection(id) if id == h.id));
    }

    #[test]
    fn test_unregister_returns_joined_rooms() {
        let mut registry = ConnectionRegistry::new();
        let h = handle("alice");
        registry.register(h.clone()).unwrap();
        registry
            .get_mut(h.id)
            .unwrap()
            .joined_rooms
            .insert("evt1".to_string());

        let conn = registry.unregister(h.id).unwrap();
        assert!(conn.joined_rooms.contains("evt1"));
        assert!(registry.get(h.id).is_none());
    }

    #[test]
    fn test_unregister_unknown_fails() {
        let mut registry = ConnectionRegistry::new();
        let id = Uuid::new_v4();
        let err = registry.unregister(id).unwrap_err();
        assert!(matches!(err, PresenceError::UnknownConnection(got) if got == id));
    }

    #[test]
    fn test_unique_users_counts_identity_once() {
        let mut registry = ConnectionRegistry::new();
        registry.register(handle("alice")).unwrap();
        registry.register(handle("alice")).unwrap();
        registry.register(handle("bob")).unwrap();

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.unique_users(), 2);
    }
}
