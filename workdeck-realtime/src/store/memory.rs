//! In-memory implementations of the persistence contracts.
//!
//! Records live in insertion order, which doubles as creation order, so
//! newest-first queries simply walk the vectors backwards.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use workdeck_proto::message::{ChatMessage, MessageId, Timestamp, UserId};
use workdeck_proto::notification::{Notification, NotificationId, NotificationStats};

use super::{MessageStore, NotificationQuery, NotificationStore, RoomQuery, StoreError};

#[derive(Default)]
struct MessageTables {
    by_room: HashMap<String, Vec<ChatMessage>>,
    room_of: HashMap<MessageId, String>,
}

impl MessageTables {
    fn get_mut(&mut self, id: &MessageId) -> Option<&mut ChatMessage> {
        let room = self.room_of.get(id)?;
        self.by_room.get_mut(room)?.iter_mut().find(|m| &m.id == id)
    }
}

/// Chat history held in process memory.
#[derive(Default)]
pub struct MemoryMessageStore {
    tables: RwLock<MessageTables>,
}

impl MemoryMessageStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored messages.
    pub async fn len(&self) -> usize {
        self.tables.read().await.room_of.len()
    }

    /// Whether no messages are stored.
    pub async fn is_empty(&self) -> bool {
        self.tables.read().await.room_of.is_empty()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn insert(&self, message: ChatMessage) -> Result<ChatMessage, StoreError> {
        let mut tables = self.tables.write().await;
        if tables.room_of.contains_key(&message.id) {
            return Err(StoreError::WriteFailed(format!(
                "duplicate message id {}",
                message.id
            )));
        }
        tables.room_of.insert(message.id, message.room.clone());
        tables
            .by_room
            .entry(message.room.clone())
            .or_default()
            .push(message.clone());
        drop(tables);
        Ok(message)
    }

    async fn get(&self, id: &MessageId) -> Result<Option<ChatMessage>, StoreError> {
        let tables = self.tables.read().await;
        let found = tables
            .room_of
            .get(id)
            .and_then(|room| tables.by_room.get(room))
            .and_then(|msgs| msgs.iter().find(|m| &m.id == id))
            .cloned();
        Ok(found)
    }

    async fn update_content(
        &self,
        id: &MessageId,
        content: String,
        edited_at: Timestamp,
    ) -> Result<Option<ChatMessage>, StoreError> {
        let mut tables = self.tables.write().await;
        Ok(tables.get_mut(id).map(|msg| {
            msg.content = content;
            msg.edited = true;
            msg.edited_at = Some(edited_at);
            msg.clone()
        }))
    }

    async fn delete(&self, id: &MessageId) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        let Some(room) = tables.room_of.remove(id) else {
            return Ok(false);
        };
        if let Some(msgs) = tables.by_room.get_mut(&room) {
            msgs.retain(|m| &m.id != id);
            if msgs.is_empty() {
                tables.by_room.remove(&room);
            }
        }
        Ok(true)
    }

    async fn find_by_room(
        &self,
        room: &str,
        query: &RoomQuery,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let tables = self.tables.read().await;
        let Some(msgs) = tables.by_room.get(room) else {
            return Ok(Vec::new());
        };
        Ok(msgs
            .iter()
            .rev()
            .filter(|m| query.before.is_none_or(|b| m.created_at < b))
            .skip(query.skip)
            .take(query.limit)
            .cloned()
            .collect())
    }

    async fn count_by_room(
        &self,
        room: &str,
        before: Option<Timestamp>,
    ) -> Result<u64, StoreError> {
        let tables = self.tables.read().await;
        let count = tables.by_room.get(room).map_or(0, |msgs| {
            msgs.iter()
                .filter(|m| before.is_none_or(|b| m.created_at < b))
                .count()
        });
        Ok(count as u64)
    }

    async fn search_room(
        &self,
        room: &str,
        term: &str,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let needle = term.to_lowercase();
        let tables = self.tables.read().await;
        let Some(msgs) = tables.by_room.get(room) else {
            return Ok(Vec::new());
        };
        Ok(msgs
            .iter()
            .rev()
            .filter(|m| m.content.to_lowercase().contains(&needle))
            .skip(skip)
            .take(limit)
            .cloned()
            .collect())
    }
}

/// Notification records held in process memory.
#[derive(Default)]
pub struct MemoryNotificationStore {
    records: RwLock<Vec<Notification>>,
}

impl MemoryNotificationStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored notifications.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether no notifications are stored.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn insert(&self, notification: Notification) -> Result<Notification, StoreError> {
        self.records.write().await.push(notification.clone());
        Ok(notification)
    }

    async fn find_for_user(
        &self,
        recipient: &UserId,
        query: &NotificationQuery,
    ) -> Result<Vec<Notification>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .rev()
            .filter(|n| &n.recipient == recipient && query.matches(n))
            .skip(query.skip)
            .take(query.limit)
            .cloned()
            .collect())
    }

    async fn count_for_user(
        &self,
        recipient: &UserId,
        query: &NotificationQuery,
    ) -> Result<u64, StoreError> {
        let records = self.records.read().await;
        let count = records
            .iter()
            .filter(|n| &n.recipient == recipient && query.matches(n))
            .count();
        Ok(count as u64)
    }

    async fn mark_read(
        &self,
        recipient: &UserId,
        id: &NotificationId,
        at: Timestamp,
    ) -> Result<Option<Notification>, StoreError> {
        let mut records = self.records.write().await;
        Ok(records
            .iter_mut()
            .find(|n| &n.id == id && &n.recipient == recipient)
            .map(|n| {
                if !n.read {
                    n.read = true;
                    n.read_at = Some(at);
                }
                n.clone()
            }))
    }

    async fn mark_all_read(
        &self,
        recipient: &UserId,
        at: Timestamp,
    ) -> Result<Vec<NotificationId>, StoreError> {
        let mut records = self.records.write().await;
        let mut changed = Vec::new();
        for n in records
            .iter_mut()
            .filter(|n| &n.recipient == recipient && !n.read)
        {
            n.read = true;
            n.read_at = Some(at);
            changed.push(n.id);
        }
        Ok(changed)
    }

    async fn delete(&self, recipient: &UserId, id: &NotificationId) -> Result<bool, StoreError> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|n| !(&n.id == id && &n.recipient == recipient));
        Ok(records.len() < before)
    }

    async fn delete_read_before(&self, cutoff: Timestamp) -> Result<u64, StoreError> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|n| !(n.read && n.created_at < cutoff));
        Ok((before - records.len()) as u64)
    }

    async fn delete_expired(&self, now: Timestamp) -> Result<u64, StoreError> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|n| !n.is_expired(now));
        Ok((before - records.len()) as u64)
    }

    async fn stats(&self, recipient: &UserId) -> Result<NotificationStats, StoreError> {
        let records = self.records.read().await;
        let mut stats = NotificationStats::default();
        for n in records.iter().filter(|n| &n.recipient == recipient) {
            stats.total += 1;
            if !n.read {
                stats.unread += 1;
            }
            *stats.by_type.entry(n.kind).or_default() += 1;
            *stats.by_priority.entry(n.priority).or_default() += 1;
        }
        Ok(stats)
    }
}
