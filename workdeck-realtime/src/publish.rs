//! Outbound fan-out: publish an event to a room, a user or one connection.
//!
//! Business logic never touches sockets. It hands a [`ServerEvent`] to the
//! [`Publisher`], which resolves recipients through the membership table and
//! the connection registry and pushes onto their outbound channels.

use std::sync::Arc;

use workdeck_proto::event::ServerEvent;
use workdeck_proto::message::UserId;

use crate::registry::{ConnectionId, ConnectionRegistry};
use crate::rooms::RoomMembership;

#[derive(Clone)]
pub struct Publisher {
    registry: Arc<ConnectionRegistry>,
    rooms: Arc<RoomMembership>,
}

impl Publisher {
    #[must_use]
    pub const fn new(registry: Arc<ConnectionRegistry>, rooms: Arc<RoomMembership>) -> Self {
        Self { registry, rooms }
    }

    /// Sends `event` to every member of `room` except `except`. Returns the
    /// number of connections reached.
    pub fn to_room(&self, room: &str, event: ServerEvent, except: Option<ConnectionId>) -> usize {
        let members: Vec<ConnectionId> = self
            .rooms
            .members(room)
            .into_iter()
            .filter(|id| Some(*id) != except)
            .collect();
        if members.is_empty() {
            return 0;
        }
        let reached = self
            .registry
            .send_to_connections(&members, &Arc::new(event));
        tracing::trace!(room = %room, members = members.len(), reached, "published to room");
        reached
    }

    /// Sends `event` to every live connection of `user`.
    pub fn to_user(&self, user: &UserId, event: ServerEvent) -> usize {
        self.registry.send_to_user(user, &Arc::new(event))
    }

    /// The registry this publisher resolves connections through.
    #[must_use]
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Sends `event` to a single connection.
    pub fn to_connection(&self, connection_id: &ConnectionId, event: ServerEvent) -> bool {
        self.registry
            .send_to_connection(connection_id, &Arc::new(event))
    }
}
