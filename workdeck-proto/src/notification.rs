//! Notification records and the types describing them on the wire.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::message::{Timestamp, UserId};

/// Unique identifier for a notification (UUID v7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationId(Uuid);

impl NotificationId {
    /// Creates a new time-ordered notification identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `NotificationId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for NotificationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NotificationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    TaskAssigned,
    TaskUpdated,
    TaskCompleted,
    TaskDue,
    NoteShared,
    FileShared,
    ChatMention,
    ChatMessage,
    SystemAlert,
}

impl NotificationType {
    /// Wire name of the type, e.g. `chat_mention`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TaskAssigned => "task_assigned",
            Self::TaskUpdated => "task_updated",
            Self::TaskCompleted => "task_completed",
            Self::TaskDue => "task_due",
            Self::NoteShared => "note_shared",
            Self::FileShared => "file_shared",
            Self::ChatMention => "chat_mention",
            Self::ChatMessage => "chat_message",
            Self::SystemAlert => "system_alert",
        }
    }
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Urgency of a notification.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

/// A persisted notification addressed to one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub recipient: UserId,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub title: String,
    pub body: String,
    pub priority: Priority,
    pub read: bool,
    pub read_at: Option<Timestamp>,
    /// Producer-defined structured data (ids, links, excerpts).
    pub payload: serde_json::Value,
    pub created_at: Timestamp,
    pub expires_at: Option<Timestamp>,
}

impl Notification {
    /// Returns `true` if the notification has an expiry at or before `now`.
    #[must_use]
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Which notifications a read-state change covered.
///
/// Serializes as a list of ids, or as the string `"all"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadScope {
    /// Every unread notification of the user.
    All,
    /// Only the listed notifications.
    Ids(Vec<NotificationId>),
}

impl Serialize for ReadScope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::All => serializer.serialize_str("all"),
            Self::Ids(ids) => ids.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for ReadScope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Keyword(String),
            Ids(Vec<NotificationId>),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Keyword(s) if s == "all" => Ok(Self::All),
            Repr::Keyword(other) => Err(serde::de::Error::custom(format!(
                "expected \"all\" or a list of ids, got {other:?}"
            ))),
            Repr::Ids(ids) => Ok(Self::Ids(ids)),
        }
    }
}

/// Aggregate counters over one user's notifications.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationStats {
    pub total: u64,
    pub unread: u64,
    pub by_type: BTreeMap<NotificationType, u64>,
    pub by_priority: BTreeMap<Priority, u64>,
}
