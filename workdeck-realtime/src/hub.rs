//! The hub: one constructed object owning every real-time service.
//!
//! `main` builds a single [`Hub`] and hands an `Arc` of it to every
//! connection handler. The handler owns the socket; the hub owns the
//! registry, room membership, message pipeline and notification engine, and
//! turns each decoded [`ClientEvent`] into store calls and outbound events.

use std::sync::Arc;

use workdeck_proto::event::{ClientEvent, ErrorCode, ServerEvent};
use workdeck_proto::message::Timestamp;
use workdeck_proto::presence::PresenceChange;

use crate::identity::{
    AuthError, Identity, IdentityProvider, MemoryDirectory, PreferenceService, UserDirectory,
};
use crate::mentions::MentionResolver;
use crate::notify::{DEFAULT_READ_RETENTION_DAYS, NotificationEngine};
use crate::offline::{DEFAULT_MAX_QUEUE_SIZE, OfflineQueue};
use crate::pipeline::{ChatError, HistoryQuery, MessagePipeline, validate_room};
use crate::publish::Publisher;
use crate::registry::{ConnectionId, ConnectionRegistry, OutboundSender, Outgoing, Registration};
use crate::rooms::RoomMembership;
use crate::store::{MemoryMessageStore, MemoryNotificationStore, MessageStore, NotificationStore};

/// External collaborators the hub is built from.
#[derive(Clone)]
pub struct Services {
    pub identity: Arc<dyn IdentityProvider>,
    pub directory: Arc<dyn UserDirectory>,
    pub preferences: Arc<dyn PreferenceService>,
    pub messages: Arc<dyn MessageStore>,
    pub notifications: Arc<dyn NotificationStore>,
}

impl Services {
    /// Everything backed by process memory, with `directory` serving
    /// identities, lookups and preferences.
    #[must_use]
    pub fn in_memory(directory: Arc<MemoryDirectory>) -> Self {
        Self {
            identity: Arc::clone(&directory) as Arc<dyn IdentityProvider>,
            directory: Arc::clone(&directory) as Arc<dyn UserDirectory>,
            preferences: directory as Arc<dyn PreferenceService>,
            messages: Arc::new(MemoryMessageStore::new()),
            notifications: Arc::new(MemoryNotificationStore::new()),
        }
    }
}

/// Tunables resolved from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubSettings {
    /// Largest inbound text frame accepted, in bytes.
    pub max_frame_size: usize,
    pub offline_queue_capacity: usize,
    /// Messages sent back in `room_joined`.
    pub recent_limit: usize,
    pub exclusive_rooms: bool,
    pub read_retention_days: u64,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            max_frame_size: 64 * 1024,
            offline_queue_capacity: DEFAULT_MAX_QUEUE_SIZE,
            recent_limit: 50,
            exclusive_rooms: true,
            read_retention_days: DEFAULT_READ_RETENTION_DAYS,
        }
    }
}

/// Owns the connection registry, rooms, pipeline and notification engine.
pub struct Hub {
    identity: Arc<dyn IdentityProvider>,
    registry: Arc<ConnectionRegistry>,
    rooms: Arc<RoomMembership>,
    publisher: Publisher,
    pipeline: MessagePipeline,
    notifications: Arc<NotificationEngine>,
    settings: HubSettings,
}

impl Hub {
    #[must_use]
    pub fn new(services: Services, settings: HubSettings) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let rooms = Arc::new(RoomMembership::new(settings.exclusive_rooms));
        let publisher = Publisher::new(Arc::clone(&registry), Arc::clone(&rooms));
        let notifications = Arc::new(NotificationEngine::new(
            services.notifications,
            services.preferences,
            publisher.clone(),
            OfflineQueue::with_max_queue_size(settings.offline_queue_capacity),
            settings.read_retention_days,
        ));
        let pipeline = MessagePipeline::new(
            services.messages,
            publisher.clone(),
            MentionResolver::new(services.directory),
            Arc::clone(&notifications),
        );

        Self {
            identity: services.identity,
            registry,
            rooms,
            publisher,
            pipeline,
            notifications,
            settings,
        }
    }

    #[must_use]
    pub const fn settings(&self) -> &HubSettings {
        &self.settings
    }

    #[must_use]
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    #[must_use]
    pub fn rooms(&self) -> &RoomMembership {
        &self.rooms
    }

    #[must_use]
    pub const fn pipeline(&self) -> &MessagePipeline {
        &self.pipeline
    }

    /// The notification engine, for producers outside the chat path.
    #[must_use]
    pub fn notifications(&self) -> Arc<NotificationEngine> {
        Arc::clone(&self.notifications)
    }

    /// Exchanges a handshake token for an identity.
    pub async fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
        self.identity.authenticate(token).await
    }

    /// Registers an authenticated connection.
    ///
    /// `authenticated` is queued on `sender` first, followed by any
    /// notifications held while the user was offline.
    pub async fn connect(&self, identity: Identity, sender: OutboundSender) -> ConnectionId {
        let connection_id = ConnectionId::new();
        let _ = sender.send(Outgoing::Event(Arc::new(ServerEvent::Authenticated {
            user: identity.summary(),
        })));

        let user_id = identity.user_id.clone();
        let flushed = self
            .notifications
            .connect(Registration {
                connection_id,
                identity,
                sender,
            })
            .await;
        tracing::info!(conn_id = %connection_id, user_id = %user_id, flushed, "connection registered");
        connection_id
    }

    /// Removes a connection from every room it held and from the registry,
    /// then tells each room's remaining members.
    pub async fn disconnect(&self, connection_id: &ConnectionId) {
        let held = self.rooms.remove_connection(connection_id);
        let Some(identity) = self.registry.unregister(connection_id) else {
            return;
        };
        for room in &held {
            self.announce(&identity, room, PresenceChange::Left, None)
                .await;
        }
        tracing::info!(
            conn_id = %connection_id,
            user_id = %identity.user_id,
            rooms = held.len(),
            "connection closed"
        );
    }

    /// Sends a close frame to every live connection.
    pub fn close_all(&self) {
        self.registry.close_all();
    }

    /// Handles one inbound event. A failure produces exactly one `error`
    /// event on the originating connection.
    pub async fn handle(&self, connection_id: ConnectionId, event: ClientEvent) {
        let Some(identity) = self.registry.identity(&connection_id) else {
            tracing::warn!(conn_id = %connection_id, "event from unregistered connection");
            return;
        };

        if let Err((code, message)) = self.dispatch(connection_id, &identity, event).await {
            tracing::debug!(conn_id = %connection_id, code = %code, error = %message, "event failed");
            self.publisher
                .to_connection(&connection_id, ServerEvent::error(code, message));
        }
    }

    async fn dispatch(
        &self,
        connection_id: ConnectionId,
        identity: &Identity,
        event: ClientEvent,
    ) -> Result<(), (ErrorCode, String)> {
        match event {
            ClientEvent::Authenticate { .. } => Err((
                ErrorCode::InvalidEvent,
                "connection is already authenticated".to_string(),
            )),
            ClientEvent::JoinRoom { room } => self
                .join_room(connection_id, identity, &room)
                .await
                .map(drop)
                .map_err(|e| chat_failure(&e, ErrorCode::JoinRoomError)),
            ClientEvent::LeaveRoom { room } => self
                .leave_room(connection_id, identity, &room)
                .await
                .map(drop)
                .map_err(|e| chat_failure(&e, ErrorCode::LeaveRoomError)),
            ClientEvent::SendMessage { room, content } => self
                .pipeline
                .send(identity, &room, &content)
                .await
                .map(drop)
                .map_err(|e| chat_failure(&e, ErrorCode::SendMessageError)),
            ClientEvent::EditMessage { id, content } => self
                .pipeline
                .edit(identity, &id, &content)
                .await
                .map(drop)
                .map_err(|e| chat_failure(&e, ErrorCode::EditMessageError)),
            ClientEvent::DeleteMessage { id } => self
                .pipeline
                .delete(identity, &id)
                .await
                .map_err(|e| chat_failure(&e, ErrorCode::DeleteMessageError)),
            ClientEvent::GetHistory {
                room,
                page,
                limit,
                before,
            } => {
                let query = HistoryQuery {
                    page,
                    limit,
                    before: before.map(Timestamp::from_millis),
                };
                let page = self
                    .pipeline
                    .history(&room, query)
                    .await
                    .map_err(|e| chat_failure(&e, ErrorCode::HistoryError))?;
                self.publisher
                    .to_connection(&connection_id, ServerEvent::ChatHistory { page });
                Ok(())
            }
            ClientEvent::SearchMessages {
                room,
                term,
                page,
                limit,
            } => {
                let messages = self
                    .pipeline
                    .search(&room, &term, page, limit)
                    .await
                    .map_err(|e| chat_failure(&e, ErrorCode::SearchError))?;
                let room = validate_room(&room).unwrap_or(room);
                self.publisher.to_connection(
                    &connection_id,
                    ServerEvent::SearchResults {
                        room,
                        term,
                        messages,
                    },
                );
                Ok(())
            }
            ClientEvent::MarkNotificationsRead { id } => self
                .notifications
                .mark_read(&identity.user_id, id)
                .await
                .map(drop)
                .map_err(|e| (e.code(), e.to_string())),
        }
    }

    /// Joins `connection_id` to `raw_room` and returns the normalized key.
    ///
    /// The joiner gets `room_joined` with recent history. Other members get
    /// `user_joined` and a system message, unless the connection was already
    /// in the room. Rooms left because of the exclusive policy are told the
    /// user left.
    ///
    /// Membership is taken before history is read, so a message persisted
    /// in between is broadcast to the joiner and may also appear in
    /// `recent_messages`; clients drop the duplicate by id. If the read
    /// fails the membership change is undone.
    pub async fn join_room(
        &self,
        connection_id: ConnectionId,
        identity: &Identity,
        raw_room: &str,
    ) -> Result<String, ChatError> {
        let room = validate_room(raw_room)?;
        let outcome = self.rooms.join(connection_id, &room);
        let recent = match self
            .pipeline
            .recent(&room, self.settings.recent_limit)
            .await
        {
            Ok(recent) => recent,
            Err(e) => {
                if !outcome.already_member {
                    self.rooms.leave(&connection_id, &room);
                }
                for previous in &outcome.left {
                    self.rooms.join(connection_id, previous);
                }
                return Err(e);
            }
        };

        for previous in &outcome.left {
            self.announce(identity, previous, PresenceChange::Left, None)
                .await;
        }

        self.publisher.to_connection(
            &connection_id,
            ServerEvent::RoomJoined {
                room: room.clone(),
                recent_messages: recent,
            },
        );
        if !outcome.already_member {
            self.announce(identity, &room, PresenceChange::Joined, Some(connection_id))
                .await;
        }
        tracing::debug!(conn_id = %connection_id, room = %room, moved_from = ?outcome.left, "joined room");
        Ok(room)
    }

    /// Removes `connection_id` from `raw_room`. Leaving a room the
    /// connection is not in only acknowledges.
    pub async fn leave_room(
        &self,
        connection_id: ConnectionId,
        identity: &Identity,
        raw_room: &str,
    ) -> Result<String, ChatError> {
        let room = validate_room(raw_room)?;
        if self.rooms.leave(&connection_id, &room) {
            self.announce(identity, &room, PresenceChange::Left, None)
                .await;
        }
        self.publisher
            .to_connection(&connection_id, ServerEvent::RoomLeft { room: room.clone() });
        Ok(room)
    }

    /// Broadcasts a presence change and posts the matching system message.
    async fn announce(
        &self,
        identity: &Identity,
        room: &str,
        change: PresenceChange,
        except: Option<ConnectionId>,
    ) {
        let user = identity.summary();
        let event = match change {
            PresenceChange::Joined => ServerEvent::UserJoined {
                user,
                room: room.to_string(),
            },
            PresenceChange::Left => ServerEvent::UserLeft {
                user,
                room: room.to_string(),
            },
        };
        self.publisher.to_room(room, event, except);

        let text = format!("{} {change} the room", identity.name);
        if let Err(e) = self.pipeline.post_system(room, &text, except).await {
            tracing::warn!(room = %room, user_id = %identity.user_id, error = %e, "failed to post presence message");
        }
    }
}

fn chat_failure(error: &ChatError, fallback: ErrorCode) -> (ErrorCode, String) {
    (error.code_or(fallback), error.to_string())
}
