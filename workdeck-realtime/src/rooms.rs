//! Room membership for live connections.
//!
//! A room is not a stored entity: it is a trimmed, lowercased string key
//! whose membership is the set of connections currently joined to it.
//! Membership is ephemeral and lost on restart, same as the registry.
//!
//! The private per-user channel is not tracked here. User-addressed
//! delivery goes through [`crate::publish::Publisher::to_user`], which
//! resolves the user's connections from the registry, so leaving rooms never
//! affects it.

use std::collections::{BTreeSet, HashMap, HashSet};

use parking_lot::RwLock;

use crate::registry::ConnectionId;

/// Normalizes a raw room name into its key, or `None` if it is blank.
#[must_use]
pub fn normalize_room(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}

/// Result of [`RoomMembership::join`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    /// Normalized key of the joined room.
    pub room: String,
    /// Rooms the connection was moved out of to honor the exclusive policy.
    pub left: Vec<String>,
    /// The connection was already a member of `room`.
    pub already_member: bool,
}

#[derive(Default)]
struct Inner {
    rooms: HashMap<String, HashSet<ConnectionId>>,
    by_connection: HashMap<ConnectionId, BTreeSet<String>>,
}

impl Inner {
    fn remove(&mut self, connection_id: &ConnectionId, room: &str) -> bool {
        let Some(members) = self.rooms.get_mut(room) else {
            return false;
        };
        let removed = members.remove(connection_id);
        if members.is_empty() {
            self.rooms.remove(room);
        }
        if let Some(held) = self.by_connection.get_mut(connection_id) {
            held.remove(room);
            if held.is_empty() {
                self.by_connection.remove(connection_id);
            }
        }
        removed
    }
}

/// Tracks which connections are joined to which rooms.
///
/// With `exclusive` set, a connection holds at most one room: joining a new
/// room first removes it from every room it occupies.
pub struct RoomMembership {
    inner: RwLock<Inner>,
    exclusive: bool,
}

impl Default for RoomMembership {
    fn default() -> Self {
        Self::new(true)
    }
}

impl RoomMembership {
    /// Creates an empty membership table.
    #[must_use]
    pub fn new(exclusive: bool) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            exclusive,
        }
    }

    /// Adds `connection_id` to `room` (an already-normalized key).
    pub fn join(&self, connection_id: ConnectionId, room: &str) -> JoinOutcome {
        let mut inner = self.inner.write();

        let already_member = inner
            .rooms
            .get(room)
            .is_some_and(|m| m.contains(&connection_id));

        let mut left = Vec::new();
        if self.exclusive {
            let previous: Vec<String> = inner
                .by_connection
                .get(&connection_id)
                .map(|held| held.iter().filter(|r| *r != room).cloned().collect())
                .unwrap_or_default();
            for prev in previous {
                if inner.remove(&connection_id, &prev) {
                    left.push(prev);
                }
            }
        }

        inner
            .rooms
            .entry(room.to_string())
            .or_default()
            .insert(connection_id);
        inner
            .by_connection
            .entry(connection_id)
            .or_default()
            .insert(room.to_string());

        JoinOutcome {
            room: room.to_string(),
            left,
            already_member,
        }
    }

    /// Removes `connection_id` from `room`. Returns `false` (and changes
    /// nothing) if it was not a member.
    pub fn leave(&self, connection_id: &ConnectionId, room: &str) -> bool {
        self.inner.write().remove(connection_id, room)
    }

    /// Removes the connection from every room, returning the rooms it held
    /// in key order.
    pub fn remove_connection(&self, connection_id: &ConnectionId) -> Vec<String> {
        let mut inner = self.inner.write();
        let held: Vec<String> = inner
            .by_connection
            .get(connection_id)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default();
        for room in &held {
            inner.remove(connection_id, room);
        }
        held
    }

    /// Snapshot of the connections joined to `room`.
    #[must_use]
    pub fn members(&self, room: &str) -> Vec<ConnectionId> {
        self.inner
            .read()
            .rooms
            .get(room)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Rooms currently held by `connection_id`, in key order.
    #[must_use]
    pub fn rooms_of(&self, connection_id: &ConnectionId) -> Vec<String> {
        self.inner
            .read()
            .by_connection
            .get(connection_id)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether `connection_id` is joined to `room`.
    #[must_use]
    pub fn is_member(&self, connection_id: &ConnectionId, room: &str) -> bool {
        self.inner
            .read()
            .rooms
            .get(room)
            .is_some_and(|m| m.contains(connection_id))
    }

    /// Number of rooms with at least one member.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.inner.read().rooms.len()
    }
}
