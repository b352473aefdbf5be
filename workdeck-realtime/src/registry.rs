//! Connection registry: which user owns which live connection.
//!
//! Every other component asks the registry "is this user reachable right
//! now?" before pushing an event. Each connection owns an unbounded channel
//! whose receiving half is drained by the connection's WebSocket writer
//! task; the registry stores the sending half.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use uuid::Uuid;
use workdeck_proto::event::ServerEvent;
use workdeck_proto::message::UserId;

use crate::identity::Identity;

/// Identifier of one live connection (UUID v7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Creates a new connection identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An item on a connection's outbound channel.
#[derive(Debug, Clone)]
pub enum Outgoing {
    /// An event to encode and write as a text frame.
    Event(Arc<ServerEvent>),
    /// Ask the writer to send a close frame and stop.
    Close,
}

impl Outgoing {
    /// The carried event, if this is not a close request.
    #[must_use]
    pub fn event(&self) -> Option<&ServerEvent> {
        match self {
            Self::Event(event) => Some(event),
            Self::Close => None,
        }
    }
}

/// Sending half of a connection's outbound channel.
pub type OutboundSender = mpsc::UnboundedSender<Outgoing>;

/// Everything needed to add a connection to the registry.
#[derive(Debug)]
pub struct Registration {
    pub connection_id: ConnectionId,
    pub identity: Identity,
    pub sender: OutboundSender,
}

struct ConnectionEntry {
    identity: Identity,
    sender: OutboundSender,
}

#[derive(Default)]
struct Inner {
    by_user: HashMap<UserId, HashSet<ConnectionId>>,
    connections: HashMap<ConnectionId, ConnectionEntry>,
}

/// Thread-safe map from users to their live connections.
///
/// Guarded by a synchronous [`RwLock`]; no method holds the lock across an
/// `.await`, so lookups from delivery paths never wait on I/O.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: RwLock<Inner>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connection, returning how many live connections its user now
    /// has.
    pub fn register(&self, registration: Registration) -> usize {
        let Registration {
            connection_id,
            identity,
            sender,
        } = registration;
        let user_id = identity.user_id.clone();

        let mut inner = self.inner.write();
        inner.connections.insert(
            connection_id,
            ConnectionEntry { identity, sender },
        );
        let conns = inner.by_user.entry(user_id).or_default();
        conns.insert(connection_id);
        conns.len()
    }

    /// Removes a connection, returning its identity if it was registered.
    pub fn unregister(&self, connection_id: &ConnectionId) -> Option<Identity> {
        let mut inner = self.inner.write();
        let entry = inner.connections.remove(connection_id)?;
        let user_id = &entry.identity.user_id;
        if let Some(conns) = inner.by_user.get_mut(user_id) {
            conns.remove(connection_id);
            if conns.is_empty() {
                inner.by_user.remove(user_id);
            }
        }
        Some(entry.identity)
    }

    /// Whether `user` has at least one live connection.
    #[must_use]
    pub fn is_online(&self, user: &UserId) -> bool {
        self.inner.read().by_user.contains_key(user)
    }

    /// All live connections of `user`.
    #[must_use]
    pub fn connections_for(&self, user: &UserId) -> HashSet<ConnectionId> {
        self.inner
            .read()
            .by_user
            .get(user)
            .cloned()
            .unwrap_or_default()
    }

    /// The identity that owns `connection_id`.
    #[must_use]
    pub fn identity(&self, connection_id: &ConnectionId) -> Option<Identity> {
        self.inner
            .read()
            .connections
            .get(connection_id)
            .map(|e| e.identity.clone())
    }

    /// Number of live connections across all users.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.inner.read().connections.len()
    }

    /// Pushes an event to one connection. Returns `false` if the connection
    /// is unknown or its writer has gone away.
    pub fn send_to_connection(&self, connection_id: &ConnectionId, event: &Arc<ServerEvent>) -> bool {
        self.inner
            .read()
            .connections
            .get(connection_id)
            .is_some_and(|e| e.sender.send(Outgoing::Event(Arc::clone(event))).is_ok())
    }

    /// Pushes an event to several connections, returning how many accepted
    /// it.
    pub fn send_to_connections<'a>(
        &self,
        connection_ids: impl IntoIterator<Item = &'a ConnectionId>,
        event: &Arc<ServerEvent>,
    ) -> usize {
        let inner = self.inner.read();
        connection_ids
            .into_iter()
            .filter_map(|id| inner.connections.get(id))
            .filter(|e| e.sender.send(Outgoing::Event(Arc::clone(event))).is_ok())
            .count()
    }

    /// Pushes an event to every live connection of `user`, returning how
    /// many accepted it. Zero means the user is unreachable.
    pub fn send_to_user(&self, user: &UserId, event: &Arc<ServerEvent>) -> usize {
        let inner = self.inner.read();
        let Some(conns) = inner.by_user.get(user) else {
            return 0;
        };
        conns
            .iter()
            .filter_map(|id| inner.connections.get(id))
            .filter(|e| e.sender.send(Outgoing::Event(Arc::clone(event))).is_ok())
            .count()
    }

    /// Asks every connection's writer to send a close frame.
    pub fn close_all(&self) {
        let inner = self.inner.read();
        for (connection_id, entry) in &inner.connections {
            tracing::info!(conn_id = %connection_id, user_id = %entry.identity.user_id, "sending close frame");
            let _ = entry.sender.send(Outgoing::Close);
        }
    }
}
