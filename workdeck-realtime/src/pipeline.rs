//! Chat message pipeline: validate, sanitize, persist, broadcast.
//!
//! Persisting a message and broadcasting it happen under a per-room async
//! lock, so every member of a room sees that room's messages in store order.
//! Mention detection runs afterwards on its own task and cannot fail a send.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use workdeck_proto::event::{ErrorCode, ServerEvent};
use workdeck_proto::message::{
    ChatMessage, HistoryPage, MAX_CONTENT_CHARS, MessageId, MessageKind, Timestamp,
};

use crate::identity::Identity;
use crate::mentions::{MentionResolver, extract_mention_tokens};
use crate::notify::NotificationEngine;
use crate::publish::Publisher;
use crate::registry::ConnectionId;
use crate::rooms::normalize_room;
use crate::store::{MessageStore, RoomQuery, StoreError};

/// Page size used when a history request does not give one.
pub const DEFAULT_PAGE_LIMIT: u32 = 50;
/// Largest page a history or search request may ask for.
pub const MAX_PAGE_LIMIT: u32 = 100;

/// Errors from chat operations.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("message content is empty")]
    EmptyMessage,

    #[error("message is {len} characters, the limit is {max}")]
    MessageTooLong { len: usize, max: usize },

    #[error("room name is empty")]
    InvalidRoom,

    /// The message does not exist or the caller did not send it.
    #[error("message not found")]
    MessageNotFound,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ChatError {
    /// Wire error code for this failure; store failures map to `fallback`,
    /// the generic code of the operation that failed.
    #[must_use]
    pub const fn code_or(&self, fallback: ErrorCode) -> ErrorCode {
        match self {
            Self::EmptyMessage => ErrorCode::EmptyMessage,
            Self::MessageTooLong { .. } => ErrorCode::MessageTooLong,
            Self::InvalidRoom => ErrorCode::InvalidRoom,
            Self::MessageNotFound => ErrorCode::MessageNotFound,
            Self::Store(_) => fallback,
        }
    }
}

/// Trims `raw` and checks it is non-empty and within the length limit.
pub fn validate_content(raw: &str) -> Result<&str, ChatError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ChatError::EmptyMessage);
    }
    let len = trimmed.chars().count();
    if len > MAX_CONTENT_CHARS {
        return Err(ChatError::MessageTooLong {
            len,
            max: MAX_CONTENT_CHARS,
        });
    }
    Ok(trimmed)
}

/// Normalizes a room name, rejecting blank ones.
pub fn validate_room(raw: &str) -> Result<String, ChatError> {
    normalize_room(raw).ok_or(ChatError::InvalidRoom)
}

/// Escapes HTML-significant characters.
#[must_use]
pub fn sanitize(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    for c in content.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Paging for [`MessagePipeline::history`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub before: Option<Timestamp>,
}

impl HistoryQuery {
    /// Page number (at least 1) and limit (within `1..=100`).
    #[must_use]
    pub fn clamped(&self) -> (u32, u32) {
        clamp_paging(self.page, self.limit)
    }
}

fn clamp_paging(page: Option<u32>, limit: Option<u32>) -> (u32, u32) {
    let page = page.unwrap_or(1).max(1);
    let limit = limit
        .unwrap_or(DEFAULT_PAGE_LIMIT)
        .clamp(1, MAX_PAGE_LIMIT);
    (page, limit)
}

const fn skip_for(page: u32, limit: u32) -> usize {
    (page as usize - 1) * limit as usize
}

/// Serializes work per room with one async mutex per active room.
///
/// A room's mutex is dropped from the table once nobody holds or waits on
/// it.
#[derive(Default)]
pub struct RoomSequencer {
    locks: parking_lot::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl RoomSequencer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `work` while holding `room`'s lock.
    pub async fn run<F: Future>(&self, room: &str, work: F) -> F::Output {
        let lock = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(room.to_string()).or_default())
        };
        let output = {
            let _guard = lock.lock().await;
            work.await
        };
        drop(lock);

        let mut locks = self.locks.lock();
        if locks.get(room).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(room);
        }
        output
    }

    /// Number of rooms with a live lock.
    #[must_use]
    pub fn active_rooms(&self) -> usize {
        self.locks.lock().len()
    }
}

/// Validates, persists and fans out chat messages.
pub struct MessagePipeline {
    store: Arc<dyn MessageStore>,
    publisher: Publisher,
    mentions: MentionResolver,
    notifications: Arc<NotificationEngine>,
    sequencer: RoomSequencer,
}

impl MessagePipeline {
    #[must_use]
    pub fn new(
        store: Arc<dyn MessageStore>,
        publisher: Publisher,
        mentions: MentionResolver,
        notifications: Arc<NotificationEngine>,
    ) -> Self {
        Self {
            store,
            publisher,
            mentions,
            notifications,
            sequencer: RoomSequencer::new(),
        }
    }

    /// Sends a text message from `sender` to `room`.
    ///
    /// The stored message is broadcast to every member of the room,
    /// including the sender's own connections.
    pub async fn send(
        &self,
        sender: &Identity,
        room: &str,
        content: &str,
    ) -> Result<ChatMessage, ChatError> {
        let content = validate_content(content)?;
        let room = validate_room(room)?;

        let message = ChatMessage {
            id: MessageId::new(),
            room: room.clone(),
            sender: Some(sender.user_id.clone()),
            sender_name: Some(sender.name.clone()),
            content: sanitize(content),
            kind: MessageKind::Text,
            created_at: Timestamp::now(),
            edited: false,
            edited_at: None,
        };

        let stored = self
            .sequencer
            .run(&room, async {
                let message = ChatMessage {
                    created_at: Timestamp::now(),
                    ..message
                };
                let stored = self.store.insert(message).await?;
                self.publisher.to_room(
                    &room,
                    ServerEvent::NewMessage {
                        message: stored.clone(),
                    },
                    None,
                );
                Ok::<_, ChatError>(stored)
            })
            .await?;

        tracing::debug!(room = %room, message_id = %stored.id, user_id = %sender.user_id, "message sent");
        self.spawn_mentions(&stored);
        Ok(stored)
    }

    /// Replaces the content of a message the editor sent.
    pub async fn edit(
        &self,
        editor: &Identity,
        id: &MessageId,
        content: &str,
    ) -> Result<ChatMessage, ChatError> {
        let content = sanitize(validate_content(content)?);
        let existing = self.owned_message(editor, id).await?;

        self.sequencer
            .run(&existing.room, async {
                let updated = self
                    .store
                    .update_content(id, content, Timestamp::now())
                    .await?
                    .ok_or(ChatError::MessageNotFound)?;
                self.publisher.to_room(
                    &updated.room,
                    ServerEvent::MessageEdited {
                        message: updated.clone(),
                    },
                    None,
                );
                Ok::<_, ChatError>(updated)
            })
            .await
    }

    /// Deletes a message the caller sent.
    pub async fn delete(&self, user: &Identity, id: &MessageId) -> Result<(), ChatError> {
        let existing = self.owned_message(user, id).await?;

        self.sequencer
            .run(&existing.room, async {
                if !self.store.delete(id).await? {
                    return Err(ChatError::MessageNotFound);
                }
                self.publisher.to_room(
                    &existing.room,
                    ServerEvent::MessageDeleted {
                        id: *id,
                        room: existing.room.clone(),
                    },
                    None,
                );
                Ok::<_, ChatError>(())
            })
            .await
    }

    /// One page of a room's history, oldest first within the page. Page 1
    /// holds the newest messages.
    pub async fn history(&self, room: &str, query: HistoryQuery) -> Result<HistoryPage, ChatError> {
        let room = validate_room(room)?;
        let (page, limit) = query.clamped();
        let skip = skip_for(page, limit);

        let mut messages = self
            .store
            .find_by_room(
                &room,
                &RoomQuery {
                    before: query.before,
                    skip,
                    limit: limit as usize,
                },
            )
            .await?;
        messages.reverse();
        let total = self.store.count_by_room(&room, query.before).await?;
        let has_more = ((skip + messages.len()) as u64) < total;

        Ok(HistoryPage {
            room,
            messages,
            page,
            limit,
            total,
            has_more,
        })
    }

    /// The newest `limit` messages of a room, oldest first.
    pub async fn recent(&self, room: &str, limit: usize) -> Result<Vec<ChatMessage>, ChatError> {
        let room = validate_room(room)?;
        let mut messages = self
            .store
            .find_by_room(
                &room,
                &RoomQuery {
                    before: None,
                    skip: 0,
                    limit,
                },
            )
            .await?;
        messages.reverse();
        Ok(messages)
    }

    /// Case-insensitive substring search, newest first. A blank term
    /// matches nothing.
    pub async fn search(
        &self,
        room: &str,
        term: &str,
        page: Option<u32>,
        limit: Option<u32>,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        let room = validate_room(room)?;
        let term = term.trim();
        if term.is_empty() {
            return Ok(Vec::new());
        }
        let (page, limit) = clamp_paging(page, limit);
        Ok(self
            .store
            .search_room(&room, term, skip_for(page, limit), limit as usize)
            .await?)
    }

    /// Persists and broadcasts a server-authored message, skipping the
    /// `except` connection.
    pub async fn post_system(
        &self,
        room: &str,
        text: &str,
        except: Option<ConnectionId>,
    ) -> Result<ChatMessage, ChatError> {
        let room = validate_room(room)?;
        let message = ChatMessage {
            id: MessageId::new(),
            room: room.clone(),
            sender: None,
            sender_name: None,
            content: sanitize(text),
            kind: MessageKind::System,
            created_at: Timestamp::now(),
            edited: false,
            edited_at: None,
        };

        self.sequencer
            .run(&room, async {
                let message = ChatMessage {
                    created_at: Timestamp::now(),
                    ..message
                };
                let stored = self.store.insert(message).await?;
                self.publisher.to_room(
                    &room,
                    ServerEvent::NewMessage {
                        message: stored.clone(),
                    },
                    except,
                );
                Ok::<_, ChatError>(stored)
            })
            .await
    }

    async fn owned_message(&self, user: &Identity, id: &MessageId) -> Result<ChatMessage, ChatError> {
        match self.store.get(id).await? {
            Some(message) if message.is_sent_by(&user.user_id) => Ok(message),
            _ => Err(ChatError::MessageNotFound),
        }
    }

    fn spawn_mentions(&self, message: &ChatMessage) {
        if extract_mention_tokens(&message.content).is_empty() {
            return;
        }
        let mentions = self.mentions.clone();
        let engine = Arc::clone(&self.notifications);
        let message = message.clone();
        tokio::spawn(async move {
            let created = mentions.notify_mentions(&engine, &message).await;
            if created > 0 {
                tracing::debug!(message_id = %message.id, created, "mention notifications sent");
            }
        });
    }
}
