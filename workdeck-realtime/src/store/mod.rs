//! Persistence contracts for chat messages and notifications.
//!
//! The durable stores live outside this crate. The engine talks to them only
//! through [`MessageStore`] and [`NotificationStore`]; the in-memory
//! implementations in [`memory`] back the binary's default setup and the
//! tests.

pub mod memory;

use async_trait::async_trait;
use workdeck_proto::message::{ChatMessage, MessageId, Timestamp, UserId};
use workdeck_proto::notification::{
    Notification, NotificationId, NotificationStats, NotificationType,
};

pub use memory::{MemoryMessageStore, MemoryNotificationStore};

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The underlying storage is unreachable.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A write operation failed.
    #[error("write failed: {0}")]
    WriteFailed(String),

    /// A read operation failed.
    #[error("read failed: {0}")]
    ReadFailed(String),
}

/// A by-room page query. Results are ordered newest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomQuery {
    /// Only messages created strictly before this instant.
    pub before: Option<Timestamp>,
    pub skip: usize,
    pub limit: usize,
}

/// A by-user notification query. Results are ordered newest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationQuery {
    pub unread_only: bool,
    pub kind: Option<NotificationType>,
    pub skip: usize,
    pub limit: usize,
}

impl NotificationQuery {
    /// Whether `notification` passes the filters (paging aside).
    #[must_use]
    pub fn matches(&self, notification: &Notification) -> bool {
        (!self.unread_only || !notification.read)
            && self.kind.is_none_or(|k| k == notification.kind)
    }
}

/// Durable chat history, keyed by room.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persists a new message and returns the stored record.
    async fn insert(&self, message: ChatMessage) -> Result<ChatMessage, StoreError>;

    async fn get(&self, id: &MessageId) -> Result<Option<ChatMessage>, StoreError>;

    /// Replaces the content and marks the message edited. Returns `None` if
    /// the message does not exist.
    async fn update_content(
        &self,
        id: &MessageId,
        content: String,
        edited_at: Timestamp,
    ) -> Result<Option<ChatMessage>, StoreError>;

    /// Returns `true` if a message was removed.
    async fn delete(&self, id: &MessageId) -> Result<bool, StoreError>;

    /// Messages in `room`, newest first.
    async fn find_by_room(
        &self,
        room: &str,
        query: &RoomQuery,
    ) -> Result<Vec<ChatMessage>, StoreError>;

    /// Number of messages in `room`, optionally only those before `before`.
    async fn count_by_room(
        &self,
        room: &str,
        before: Option<Timestamp>,
    ) -> Result<u64, StoreError>;

    /// Case-insensitive substring search over content, newest first.
    async fn search_room(
        &self,
        room: &str,
        term: &str,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StoreError>;
}

/// Durable notification records with read state.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn insert(&self, notification: Notification) -> Result<Notification, StoreError>;

    /// `recipient`'s notifications matching `query`, newest first.
    async fn find_for_user(
        &self,
        recipient: &UserId,
        query: &NotificationQuery,
    ) -> Result<Vec<Notification>, StoreError>;

    /// Count of `recipient`'s notifications matching `query`'s filters.
    async fn count_for_user(
        &self,
        recipient: &UserId,
        query: &NotificationQuery,
    ) -> Result<u64, StoreError>;

    /// Marks one notification read. Returns `None` unless it exists and
    /// belongs to `recipient`. Already-read notifications keep their
    /// original `read_at`.
    async fn mark_read(
        &self,
        recipient: &UserId,
        id: &NotificationId,
        at: Timestamp,
    ) -> Result<Option<Notification>, StoreError>;

    /// Marks every unread notification of `recipient` read, returning the
    /// ids that changed.
    async fn mark_all_read(
        &self,
        recipient: &UserId,
        at: Timestamp,
    ) -> Result<Vec<NotificationId>, StoreError>;

    /// Deletes one notification owned by `recipient`.
    async fn delete(&self, recipient: &UserId, id: &NotificationId) -> Result<bool, StoreError>;

    /// Deletes read notifications created before `cutoff`.
    async fn delete_read_before(&self, cutoff: Timestamp) -> Result<u64, StoreError>;

    /// Deletes notifications whose expiry is at or before `now`.
    async fn delete_expired(&self, now: Timestamp) -> Result<u64, StoreError>;

    async fn stats(&self, recipient: &UserId) -> Result<NotificationStats, StoreError>;
}
