use std::collections::HashMap;

/// One event room: the users currently present, in join order.
#[derive(Debug)]
struct Room {
    members: Vec<String>,
}

/// Maps event ids to the set of user identities currently present.
///
/// Membership is keyed by user identity, not connection identity: two
/// connections for the same user count as one presence entry. Rooms are
/// created lazily on first join and deleted the instant the member set
/// becomes empty, so the registry never holds an empty room.
///
/// The registry carries no interior synchronization; the presence
/// coordinator is its single writer.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<String, Room>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: HashMap::new(),
        }
    }

    /// Add a user to a room, creating the room if absent.
    ///
    /// Idempotent: adding a user already present is a no-op. Returns true
    /// if membership actually changed.
    pub fn add_member(&mut self, event_id: &str, user_id: &str) -> bool {
        let room = self
            .rooms
            .entry(event_id.to_string())
            .or_insert_with(|| Room { members: Vec::new() });
        if room.members.iter().any(|m| m == user_id) {
            return false;
        }
        room.members.push(user_id.to_string());
        true
    }

    /// Remove a user from a room, deleting the room if it becomes empty.
    ///
    /// Idempotent: removing an absent user is a no-op. Returns true if
    /// membership actually changed.
    pub fn remove_member(&mut self, event_id: &str, user_id: &str) -> bool {
        let Some(room) = self.rooms.get_mut(event_id) else {
            return false;
        };
        let Some(pos) = room.members.iter().position(|m| m == user_id) else {
            return false;
        };
        room.members.remove(pos);
        if room.members.is_empty() {
            self.rooms.remove(event_id);
        }
        true
    }

    /// Point-in-time copy of a room's members, in join order.
    ///
    /// Safe to serialize and broadcast without risk of mutation
    /// mid-iteration. An absent room yields an empty snapshot.
    pub fn members_of(&self, event_id: &str) -> Vec<String> {
        self.rooms
            .get(event_id)
            .map(|room| room.members.clone())
            .unwrap_or_default()
    }

    pub fn has_member(&self, event_id: &str, user_id: &str) -> bool {
        self.rooms
            .get(event_id)
            .map(|room| room.members.iter().any(|m| m == user_id))
            .unwrap_or(false)
    }

    pub fn contains_room(&self, event_id: &str) -> bool {
        self.rooms.contains_key(event_id)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// (event_id, member count) for every active room.
    pub fn room_sizes(&self) -> Vec<(String, usize)> {
        self.rooms
            .iter()
            .map(|(event_id, room)| (event_id.clone(), room.members.len()))
            .collect()
    }
}
