//! Chat message types shared between the real-time server and its clients.
//!
//! All types here are the on-the-wire representation. They serialize to
//! JSON through [`crate::codec`].

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum message content length, counted in characters.
pub const MAX_CONTENT_CHARS: usize = 1000;

/// Unique identifier for a chat message, based on UUID v7 for time-ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Creates a new time-ordered message identifier (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `MessageId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID value.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable identity of a user, as issued by the identity provider.
///
/// The value is opaque to this system; it is only compared and hashed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Wraps an identity-provider user id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Millisecond-precision UTC timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Milliseconds in one day.
    pub const DAY_MILLIS: u64 = 24 * 60 * 60 * 1000;

    /// Creates a timestamp for the current instant.
    #[must_use]
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Creates a timestamp from milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    /// Returns a timestamp `days` days earlier, clamped at the epoch.
    #[must_use]
    pub const fn days_before(&self, days: u64) -> Self {
        Self(self.0.saturating_sub(days.saturating_mul(Self::DAY_MILLIS)))
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Kind of a chat message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Ordinary user-authored text.
    #[default]
    Text,
    /// Server-generated presence text (joins, leaves, disconnects).
    System,
}

/// A persisted chat message as broadcast to room members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Unique identifier for this message.
    pub id: MessageId,
    /// Normalized room key the message belongs to.
    pub room: String,
    /// Author of the message; `None` for system messages.
    pub sender: Option<UserId>,
    /// Display name of the author at send time.
    pub sender_name: Option<String>,
    /// HTML-escaped message text.
    pub content: String,
    /// Message kind.
    pub kind: MessageKind,
    /// When the message was persisted.
    pub created_at: Timestamp,
    /// Whether the content was changed after creation.
    pub edited: bool,
    /// When the content was last changed.
    pub edited_at: Option<Timestamp>,
}

impl ChatMessage {
    /// Returns `true` for server-generated messages without an author.
    #[must_use]
    pub const fn is_system(&self) -> bool {
        self.sender.is_none()
    }

    /// Returns `true` if `user` authored this message.
    #[must_use]
    pub fn is_sent_by(&self, user: &UserId) -> bool {
        self.sender.as_ref() == Some(user)
    }
}

/// One page of room history, oldest message first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryPage {
    /// Normalized room key.
    pub room: String,
    /// Messages in chronological order.
    pub messages: Vec<ChatMessage>,
    /// 1-based page number.
    pub page: u32,
    /// Page size used for the query.
    pub limit: u32,
    /// Number of messages matching the query across all pages.
    pub total: u64,
    /// Whether older pages exist.
    pub has_more: bool,
}
