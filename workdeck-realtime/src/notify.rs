//! Notification engine: persist, filter by preference, deliver or queue.
//!
//! Every notification is stored first. Delivery is a second, best-effort
//! step: if the recipient has switched the type off nothing is pushed and the
//! record simply stays unread; otherwise it goes to every live connection of
//! the recipient, or into the bounded offline queue when there is none.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use workdeck_proto::event::{ErrorCode, ServerEvent};
use workdeck_proto::message::{Timestamp, UserId};
use workdeck_proto::notification::{
    Notification, NotificationId, NotificationStats, NotificationType, Priority, ReadScope,
};

use crate::identity::PreferenceService;
use crate::offline::{Delivery, OfflineQueue};
use crate::publish::Publisher;
use crate::registry::Registration;
use crate::store::{NotificationQuery, NotificationStore, StoreError};

/// Default number of days a read notification is kept.
pub const DEFAULT_READ_RETENTION_DAYS: u64 = 30;

/// Page size bounds for [`NotificationEngine::list`].
const MAX_LIST_LIMIT: u32 = 100;
const DEFAULT_LIST_LIMIT: u32 = 20;

/// Errors from notification operations.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    /// The notification does not exist or belongs to someone else.
    #[error("notification not found")]
    NotFound,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl NotificationError {
    /// Wire error code for this failure.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound => ErrorCode::NotificationNotFound,
            Self::Store(_) => ErrorCode::NotificationError,
        }
    }
}

/// A notification a producer wants sent, before it gets an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub recipient: UserId,
    pub kind: NotificationType,
    pub title: String,
    pub body: String,
    pub priority: Priority,
    pub payload: serde_json::Value,
    pub expires_at: Option<Timestamp>,
}

impl NewNotification {
    /// A medium-priority notification with an empty payload.
    #[must_use]
    pub fn new(
        recipient: UserId,
        kind: NotificationType,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            recipient,
            kind,
            title: title.into(),
            body: body.into(),
            priority: Priority::default(),
            payload: serde_json::Value::Object(serde_json::Map::new()),
            expires_at: None,
        }
    }

    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    #[must_use]
    pub const fn expires_at(mut self, at: Timestamp) -> Self {
        self.expires_at = Some(at);
        self
    }

    fn into_notification(self, now: Timestamp) -> Notification {
        Notification {
            id: NotificationId::new(),
            recipient: self.recipient,
            kind: self.kind,
            title: self.title,
            body: self.body,
            priority: self.priority,
            read: false,
            read_at: None,
            payload: self.payload,
            created_at: now,
            expires_at: self.expires_at,
        }
    }
}

/// Filters and paging for [`NotificationEngine::list`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListQuery {
    /// 1-based; 0 is treated as 1.
    pub page: u32,
    /// Clamped to `1..=100`; 0 selects the default of 20.
    pub limit: u32,
    pub unread_only: bool,
    pub kind: Option<NotificationType>,
}

/// One page of a user's notifications, newest first.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationList {
    pub notifications: Vec<Notification>,
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub has_more: bool,
}

/// What one retention sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub read_removed: u64,
    pub expired_removed: u64,
}

/// Persists notifications and routes them to their recipients.
pub struct NotificationEngine {
    store: Arc<dyn NotificationStore>,
    preferences: Arc<dyn PreferenceService>,
    publisher: Publisher,
    offline: OfflineQueue,
    read_retention_days: u64,
}

impl NotificationEngine {
    #[must_use]
    pub fn new(
        store: Arc<dyn NotificationStore>,
        preferences: Arc<dyn PreferenceService>,
        publisher: Publisher,
        offline: OfflineQueue,
        read_retention_days: u64,
    ) -> Self {
        Self {
            store,
            preferences,
            publisher,
            offline,
            read_retention_days,
        }
    }

    /// The offline queue backing this engine.
    #[must_use]
    pub const fn offline(&self) -> &OfflineQueue {
        &self.offline
    }

    /// Persists `new` and delivers it if the recipient's preferences allow.
    ///
    /// Only a store failure is an error; delivery problems are logged.
    pub async fn notify(&self, new: NewNotification) -> Result<Notification, NotificationError> {
        let notification = self
            .store
            .insert(new.into_notification(Timestamp::now()))
            .await?;

        if !self.wants_delivery(&notification).await {
            tracing::debug!(
                user_id = %notification.recipient,
                kind = notification.kind.as_str(),
                "delivery disabled by preferences"
            );
            return Ok(notification);
        }

        match self
            .offline
            .deliver_or_enqueue(&self.publisher, notification.clone())
            .await
        {
            Delivery::Live(reached) => tracing::debug!(
                user_id = %notification.recipient,
                notification_id = %notification.id,
                reached,
                "notification delivered"
            ),
            Delivery::Queued(len) => tracing::debug!(
                user_id = %notification.recipient,
                notification_id = %notification.id,
                queue_len = len,
                "recipient offline, notification queued"
            ),
        }
        Ok(notification)
    }

    /// Sends one copy of `template` to each recipient. Stops at the first
    /// store failure; copies created before it stay.
    pub async fn notify_many(
        &self,
        recipients: impl IntoIterator<Item = UserId>,
        template: &NewNotification,
    ) -> Result<Vec<Notification>, NotificationError> {
        let mut created = Vec::new();
        for recipient in recipients {
            let new = NewNotification {
                recipient,
                ..template.clone()
            };
            created.push(self.notify(new).await?);
        }
        Ok(created)
    }

    /// Registers a connection and flushes any notifications queued while
    /// the user was offline. Returns how many were flushed.
    pub async fn connect(&self, registration: Registration) -> usize {
        self.offline
            .attach(self.publisher.registry(), registration)
            .await
    }

    /// Marks one of `user`'s notifications read, or all unread ones when
    /// `id` is `None`, and tells the user's live connections.
    pub async fn mark_read(
        &self,
        user: &UserId,
        id: Option<NotificationId>,
    ) -> Result<ReadScope, NotificationError> {
        let now = Timestamp::now();
        let scope = match id {
            Some(id) => {
                self.store
                    .mark_read(user, &id, now)
                    .await?
                    .ok_or(NotificationError::NotFound)?;
                ReadScope::Ids(vec![id])
            }
            None => {
                let changed = self.store.mark_all_read(user, now).await?;
                tracing::debug!(user_id = %user, count = changed.len(), "marked all notifications read");
                ReadScope::All
            }
        };

        self.publisher
            .to_user(user, ServerEvent::NotificationsRead { ids: scope.clone() });
        Ok(scope)
    }

    pub async fn unread_count(&self, user: &UserId) -> Result<u64, NotificationError> {
        let query = NotificationQuery {
            unread_only: true,
            kind: None,
            skip: 0,
            limit: usize::MAX,
        };
        Ok(self.store.count_for_user(user, &query).await?)
    }

    pub async fn stats(&self, user: &UserId) -> Result<NotificationStats, NotificationError> {
        Ok(self.store.stats(user).await?)
    }

    /// A page of `user`'s notifications, newest first.
    pub async fn list(
        &self,
        user: &UserId,
        query: ListQuery,
    ) -> Result<NotificationList, NotificationError> {
        let page = query.page.max(1);
        let limit = match query.limit {
            0 => DEFAULT_LIST_LIMIT,
            n => n.min(MAX_LIST_LIMIT),
        };
        let store_query = NotificationQuery {
            unread_only: query.unread_only,
            kind: query.kind,
            skip: (page as usize - 1) * limit as usize,
            limit: limit as usize,
        };

        let notifications = self.store.find_for_user(user, &store_query).await?;
        let total = self.store.count_for_user(user, &store_query).await?;
        let seen = (store_query.skip + notifications.len()) as u64;
        Ok(NotificationList {
            notifications,
            page,
            limit,
            total,
            has_more: seen < total,
        })
    }

    /// Deletes one of `user`'s notifications.
    pub async fn delete(&self, user: &UserId, id: &NotificationId) -> Result<(), NotificationError> {
        if self.store.delete(user, id).await? {
            Ok(())
        } else {
            Err(NotificationError::NotFound)
        }
    }

    /// Removes read notifications older than the retention window and
    /// notifications past their expiry.
    pub async fn sweep(&self, now: Timestamp) -> Result<SweepReport, NotificationError> {
        let cutoff = now.days_before(self.read_retention_days);
        let read_removed = self.store.delete_read_before(cutoff).await?;
        let expired_removed = self.store.delete_expired(now).await?;
        Ok(SweepReport {
            read_removed,
            expired_removed,
        })
    }

    /// Runs [`Self::sweep`] every `every` until the task is aborted.
    pub fn spawn_sweeper(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                match self.sweep(Timestamp::now()).await {
                    Ok(report) => tracing::info!(
                        read_removed = report.read_removed,
                        expired_removed = report.expired_removed,
                        "notification sweep finished"
                    ),
                    Err(e) => tracing::warn!(error = %e, "notification sweep failed"),
                }
            }
        })
    }

    async fn wants_delivery(&self, notification: &Notification) -> bool {
        match self
            .preferences
            .notification_preferences(&notification.recipient)
            .await
        {
            Ok(prefs) => prefs.allows(notification.kind),
            Err(e) => {
                tracing::warn!(
                    user_id = %notification.recipient,
                    error = %e,
                    "preference lookup failed, delivering anyway"
                );
                true
            }
        }
    }
}
