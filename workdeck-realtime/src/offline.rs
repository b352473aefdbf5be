//! In-memory store-and-forward queue for notifications to offline users.
//!
//! The [`OfflineQueue`] holds per-user FIFO queues of notifications that
//! could not be delivered because the recipient had no live connection.
//! When the user connects again, the queue is drained onto the new
//! connection and cleared.
//!
//! Delivery and draining share one lock: [`OfflineQueue::deliver_or_enqueue`]
//! checks the registry and queues while holding it, and
//! [`OfflineQueue::attach`] registers the connection and drains while holding
//! it. A notification therefore cannot slip between "nobody online" and
//! "connection just registered", and two racing reconnects never both drain
//! the same entries.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::Instant;
use workdeck_proto::event::ServerEvent;
use workdeck_proto::message::UserId;
use workdeck_proto::notification::Notification;

use crate::publish::Publisher;
use crate::registry::{ConnectionRegistry, Outgoing, Registration};

/// Default maximum number of queued notifications per user before FIFO
/// eviction.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 100;

/// A notification waiting for its recipient to come online.
#[derive(Debug, Clone)]
pub struct QueuedNotification {
    pub notification: Notification,
    /// When the notification was enqueued.
    pub queued_at: Instant,
}

/// Where a delivery attempt ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Pushed to this many live connections.
    Live(usize),
    /// Queued; the user's queue now holds this many entries.
    Queued(usize),
}

/// Per-user bounded notification queues with FIFO eviction.
pub struct OfflineQueue {
    queues: Mutex<HashMap<UserId, VecDeque<QueuedNotification>>>,
    max_queue_size: usize,
}

impl Default for OfflineQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl OfflineQueue {
    /// Creates an empty queue set with the default per-user limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_queue_size(DEFAULT_MAX_QUEUE_SIZE)
    }

    /// Creates an empty queue set with a custom per-user limit (at least 1).
    #[must_use]
    pub fn with_max_queue_size(max_queue_size: usize) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            max_queue_size: max_queue_size.max(1),
        }
    }

    /// The per-user limit.
    #[must_use]
    pub const fn max_queue_size(&self) -> usize {
        self.max_queue_size
    }

    /// Enqueues a notification for its recipient, returning the new queue
    /// length. The oldest entry is evicted once the limit is exceeded.
    pub async fn enqueue(&self, notification: Notification) -> usize {
        let mut queues = self.queues.lock().await;
        self.push(&mut queues, notification)
    }

    /// Drains all queued notifications for `user` in FIFO order.
    ///
    /// The queue is empty after this call.
    pub async fn drain(&self, user: &UserId) -> Vec<Notification> {
        let mut queues = self.queues.lock().await;
        queues
            .remove(user)
            .map(|q| q.into_iter().map(|e| e.notification).collect())
            .unwrap_or_default()
    }

    /// Number of notifications currently queued for `user`.
    pub async fn queue_len(&self, user: &UserId) -> usize {
        let queues = self.queues.lock().await;
        queues.get(user).map_or(0, VecDeque::len)
    }

    /// Pushes `notification` to every live connection of its recipient, or
    /// queues it when none accepts it.
    pub async fn deliver_or_enqueue(
        &self,
        publisher: &Publisher,
        notification: Notification,
    ) -> Delivery {
        let mut queues = self.queues.lock().await;
        let event = ServerEvent::NewNotification {
            notification: notification.clone(),
        };
        let reached = publisher.to_user(&notification.recipient, event);
        if reached > 0 {
            return Delivery::Live(reached);
        }
        Delivery::Queued(self.push(&mut queues, notification))
    }

    /// Registers a connection and flushes the user's queue onto it, in
    /// enqueue order. Returns how many notifications were flushed.
    pub async fn attach(&self, registry: &ConnectionRegistry, registration: Registration) -> usize {
        let mut queues = self.queues.lock().await;
        let user_id = registration.identity.user_id.clone();
        let connection_id = registration.connection_id;
        let sender = registration.sender.clone();
        registry.register(registration);

        // Flushing under the lock keeps later live deliveries behind the
        // backlog.
        let Some(queued) = queues.remove(&user_id) else {
            return 0;
        };

        let oldest_wait_ms = queued
            .front()
            .map(|e| e.queued_at.elapsed().as_millis())
            .unwrap_or_default();
        tracing::info!(
            user_id = %user_id,
            conn_id = %connection_id,
            count = queued.len(),
            oldest_wait_ms,
            "flushing offline notifications"
        );

        let mut flushed = 0;
        for entry in queued {
            let event = ServerEvent::NewNotification {
                notification: entry.notification,
            };
            if sender.send(Outgoing::Event(Arc::new(event))).is_err() {
                tracing::warn!(conn_id = %connection_id, "connection closed during flush, dropping rest");
                break;
            }
            flushed += 1;
        }
        drop(queues);
        flushed
    }

    fn push(
        &self,
        queues: &mut HashMap<UserId, VecDeque<QueuedNotification>>,
        notification: Notification,
    ) -> usize {
        let queue = queues.entry(notification.recipient.clone()).or_default();
        queue.push_back(QueuedNotification {
            notification,
            queued_at: Instant::now(),
        });
        while queue.len() > self.max_queue_size {
            queue.pop_front();
        }
        queue.len()
    }
}
