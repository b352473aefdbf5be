//! Events exchanged over a persistent client connection.
//!
//! Every frame carries exactly one event, encoded as a JSON object with a
//! `type` discriminator (`{"type": "send_message", "room": ..., ...}`).
//! [`ClientEvent`] flows client → server, [`ServerEvent`] server → client.

use serde::{Deserialize, Serialize};

use crate::message::{ChatMessage, HistoryPage, MessageId};
use crate::notification::{Notification, NotificationId, ReadScope};
use crate::presence::UserSummary;

/// Events a client sends to the server.
///
/// `Authenticate` must be the first event on a connection; everything else
/// is only accepted afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Present a credential token to the identity provider.
    Authenticate { token: String },
    JoinRoom { room: String },
    LeaveRoom { room: String },
    SendMessage { room: String, content: String },
    EditMessage { id: MessageId, content: String },
    DeleteMessage { id: MessageId },
    GetHistory {
        room: String,
        #[serde(default)]
        page: Option<u32>,
        #[serde(default)]
        limit: Option<u32>,
        /// Only return messages created strictly before this many ms.
        #[serde(default)]
        before: Option<u64>,
    },
    SearchMessages {
        room: String,
        term: String,
        #[serde(default)]
        page: Option<u32>,
        #[serde(default)]
        limit: Option<u32>,
    },
    /// Mark one notification read, or all of them when `id` is absent.
    MarkNotificationsRead {
        #[serde(default)]
        id: Option<NotificationId>,
    },
}

/// Events the server sends to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Handshake accepted.
    Authenticated { user: UserSummary },
    /// The connection joined `room`; carries recent history, oldest first.
    RoomJoined {
        room: String,
        recent_messages: Vec<ChatMessage>,
    },
    /// The connection left `room` on its own request.
    RoomLeft { room: String },
    UserJoined { user: UserSummary, room: String },
    UserLeft { user: UserSummary, room: String },
    NewMessage { message: ChatMessage },
    MessageEdited { message: ChatMessage },
    MessageDeleted { id: MessageId, room: String },
    ChatHistory { page: HistoryPage },
    SearchResults {
        room: String,
        term: String,
        messages: Vec<ChatMessage>,
    },
    NewNotification { notification: Notification },
    NotificationsRead { ids: ReadScope },
    Error { code: ErrorCode, message: String },
}

impl ServerEvent {
    /// Builds an `error` event.
    #[must_use]
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }

    /// The wire name of this event's `type` field.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Authenticated { .. } => "authenticated",
            Self::RoomJoined { .. } => "room_joined",
            Self::RoomLeft { .. } => "room_left",
            Self::UserJoined { .. } => "user_joined",
            Self::UserLeft { .. } => "user_left",
            Self::NewMessage { .. } => "new_message",
            Self::MessageEdited { .. } => "message_edited",
            Self::MessageDeleted { .. } => "message_deleted",
            Self::ChatHistory { .. } => "chat_history",
            Self::SearchResults { .. } => "search_results",
            Self::NewNotification { .. } => "new_notification",
            Self::NotificationsRead { .. } => "notifications_read",
            Self::Error { .. } => "error",
        }
    }
}

/// Stable machine-readable error codes carried by `error` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    EmptyMessage,
    MessageTooLong,
    InvalidRoom,
    MessageNotFound,
    NotificationNotFound,
    JoinRoomError,
    LeaveRoomError,
    SendMessageError,
    EditMessageError,
    DeleteMessageError,
    HistoryError,
    SearchError,
    NotificationError,
    InvalidEvent,
    FrameTooLarge,
    AuthFailed,
}

impl ErrorCode {
    /// The code as it appears on the wire, e.g. `MESSAGE_TOO_LONG`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EmptyMessage => "EMPTY_MESSAGE",
            Self::MessageTooLong => "MESSAGE_TOO_LONG",
            Self::InvalidRoom => "INVALID_ROOM",
            Self::MessageNotFound => "MESSAGE_NOT_FOUND",
            Self::NotificationNotFound => "NOTIFICATION_NOT_FOUND",
            Self::JoinRoomError => "JOIN_ROOM_ERROR",
            Self::LeaveRoomError => "LEAVE_ROOM_ERROR",
            Self::SendMessageError => "SEND_MESSAGE_ERROR",
            Self::EditMessageError => "EDIT_MESSAGE_ERROR",
            Self::DeleteMessageError => "DELETE_MESSAGE_ERROR",
            Self::HistoryError => "HISTORY_ERROR",
            Self::SearchError => "SEARCH_ERROR",
            Self::NotificationError => "NOTIFICATION_ERROR",
            Self::InvalidEvent => "INVALID_EVENT",
            Self::FrameTooLarge => "FRAME_TOO_LARGE",
            Self::AuthFailed => "AUTH_FAILED",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
