// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

//! Integration tests for notification delivery and the offline queue.
//!
//! These tests validate:
//! - Notifications for an online user are pushed immediately
//! - Notifications for an offline user are queued and flushed in order on
//!   the next handshake, exactly once
//! - The offline queue drops its oldest entries beyond capacity
//! - Mentioning an offline user persists and queues a `chat_mention`
//! - A type the user disabled is stored but not pushed
//! - Marking notifications read is confirmed over the wire

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite;
use workdeck_proto::codec;
use workdeck_proto::event::{ClientEvent, ErrorCode, ServerEvent};
use workdeck_proto::message::UserId;
use workdeck_proto::notification::{NotificationType, Priority, ReadScope};
use workdeck_realtime::hub::{Hub, HubSettings, Services};
use workdeck_realtime::identity::{Identity, MemoryDirectory, NotificationPreferences, Role};
use workdeck_realtime::notify::NewNotification;
use workdeck_realtime::server;

// =============================================================================
// Type aliases and helpers
// =============================================================================

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

const TIMEOUT: Duration = Duration::from_secs(5);

async fn start(settings: HubSettings) -> (SocketAddr, Arc<Hub>) {
    let directory = Arc::new(MemoryDirectory::new());
    for (id, name) in [("alice", "Alice"), ("bob", "Bob"), ("carol", "Carol")] {
        directory.insert(
            Identity {
                user_id: UserId::new(id),
                name: name.to_string(),
                email: format!("{id}@example.com"),
                role: Role::User,
            },
            format!("tok-{id}"),
        );
    }
    let hub = Arc::new(Hub::new(Services::in_memory(directory), settings));
    let (addr, _handle) = server::start_server("127.0.0.1:0", Arc::clone(&hub))
        .await
        .expect("failed to start test server");
    (addr, hub)
}

async fn connect(addr: SocketAddr, user: &str) -> WsStream {
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .unwrap();
    send(
        &mut ws,
        &ClientEvent::Authenticate {
            token: format!("tok-{user}"),
        },
    )
    .await;
    let ack = recv(&mut ws).await;
    assert!(
        matches!(ack, ServerEvent::Authenticated { .. }),
        "expected authenticated, got {ack:?}"
    );
    ws
}

async fn send(ws: &mut WsStream, event: &ClientEvent) {
    let text = codec::encode_client(event).unwrap();
    ws.send(tungstenite::Message::Text(text.into())).await.unwrap();
}

async fn recv(ws: &mut WsStream) -> ServerEvent {
    loop {
        let msg = tokio::time::timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for event")
            .expect("stream ended")
            .unwrap();
        if let tungstenite::Message::Text(text) = msg {
            return codec::decode_server(text.as_str()).unwrap();
        }
    }
}

async fn drain_for(ws: &mut WsStream, quiet: Duration) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(Some(Ok(msg))) = tokio::time::timeout(quiet, ws.next()).await {
        if let tungstenite::Message::Text(text) = msg {
            events.push(codec::decode_server(text.as_str()).unwrap());
        }
    }
    events
}

fn titles(events: &[ServerEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            ServerEvent::NewNotification { notification } => Some(notification.title.clone()),
            _ => None,
        })
        .collect()
}

fn task_for(user: &str, title: &str) -> NewNotification {
    NewNotification::new(
        UserId::new(user),
        NotificationType::TaskAssigned,
        title,
        "You have a new task",
    )
}

/// Waits until `pred` holds, polling the hub.
async fn eventually<F, Fut>(pred: F)
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(TIMEOUT, async {
        while !pred().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn online_user_receives_notification_live() {
    let (addr, hub) = start(HubSettings::default()).await;
    let mut bob = connect(addr, "bob").await;

    let created = hub
        .notifications()
        .notify(task_for("bob", "Review PR").with_priority(Priority::High))
        .await
        .unwrap();

    match recv(&mut bob).await {
        ServerEvent::NewNotification { notification } => {
            assert_eq!(notification.id, created.id);
            assert_eq!(notification.priority, Priority::High);
            assert!(!notification.read);
        }
        other => panic!("expected new_notification, got {other:?}"),
    }
    assert_eq!(
        hub.notifications()
            .offline()
            .queue_len(&UserId::new("bob"))
            .await,
        0
    );
}

#[tokio::test]
async fn offline_notifications_flush_in_order_once() {
    let (addr, hub) = start(HubSettings::default()).await;
    let engine = hub.notifications();
    let bob = UserId::new("bob");

    for title in ["first", "second", "third"] {
        engine.notify(task_for("bob", title)).await.unwrap();
    }
    assert_eq!(engine.offline().queue_len(&bob).await, 3);

    let mut ws = connect(addr, "bob").await;
    let events = drain_for(&mut ws, Duration::from_millis(300)).await;
    assert_eq!(titles(&events), ["first", "second", "third"]);
    assert_eq!(engine.offline().queue_len(&bob).await, 0);

    let mut second = connect(addr, "bob").await;
    let events = drain_for(&mut second, Duration::from_millis(300)).await;
    assert!(titles(&events).is_empty());
}

#[tokio::test]
async fn offline_queue_drops_oldest_beyond_capacity() {
    let (addr, hub) = start(HubSettings {
        offline_queue_capacity: 3,
        ..HubSettings::default()
    })
    .await;
    let engine = hub.notifications();
    for i in 0..4 {
        engine
            .notify(task_for("bob", &format!("n{i}")))
            .await
            .unwrap();
    }
    assert_eq!(engine.offline().queue_len(&UserId::new("bob")).await, 3);

    let mut ws = connect(addr, "bob").await;
    let events = drain_for(&mut ws, Duration::from_millis(300)).await;
    assert_eq!(titles(&events), ["n1", "n2", "n3"]);

    // Evicted entries are still stored and count as unread.
    assert_eq!(
        engine.unread_count(&UserId::new("bob")).await.unwrap(),
        4
    );
}

#[tokio::test]
async fn mention_of_offline_user_is_queued() {
    let (addr, hub) = start(HubSettings::default()).await;
    let mut alice = connect(addr, "alice").await;
    send(
        &mut alice,
        &ClientEvent::SendMessage {
            room: "general".into(),
            content: "@carol please take a look".into(),
        },
    )
    .await;

    let engine = hub.notifications();
    let carol = UserId::new("carol");
    eventually(|| {
        let engine = Arc::clone(&engine);
        let carol = carol.clone();
        async move { engine.offline().queue_len(&carol).await == 1 }
    })
    .await;
    assert_eq!(engine.unread_count(&carol).await.unwrap(), 1);

    let mut ws = connect(addr, "carol").await;
    match recv(&mut ws).await {
        ServerEvent::NewNotification { notification } => {
            assert_eq!(notification.kind, NotificationType::ChatMention);
            assert_eq!(notification.title, "Alice mentioned you in #general");
        }
        other => panic!("expected new_notification, got {other:?}"),
    }
}

#[tokio::test]
async fn disabled_type_is_not_delivered() {
    let directory = Arc::new(MemoryDirectory::new());
    directory.insert(
        Identity {
            user_id: UserId::new("bob"),
            name: "Bob".into(),
            email: "bob@example.com".into(),
            role: Role::User,
        },
        "tok-bob",
    );
    let mut prefs = NotificationPreferences::default();
    prefs.types.insert(NotificationType::TaskAssigned, false);
    assert!(directory.set_preferences(&UserId::new("bob"), prefs));
    let hub = Arc::new(Hub::new(
        Services::in_memory(directory),
        HubSettings::default(),
    ));
    let (addr, _handle) = server::start_server("127.0.0.1:0", Arc::clone(&hub))
        .await
        .unwrap();
    let mut ws = connect(addr, "bob").await;

    hub.notifications()
        .notify(task_for("bob", "silent"))
        .await
        .unwrap();
    assert!(drain_for(&mut ws, Duration::from_millis(200)).await.is_empty());
    assert_eq!(
        hub.notifications()
            .unread_count(&UserId::new("bob"))
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn mark_read_over_the_wire() {
    let (addr, hub) = start(HubSettings::default()).await;
    let mut bob = connect(addr, "bob").await;
    let mut bob_phone = connect(addr, "bob").await;
    let engine = hub.notifications();
    let first = engine.notify(task_for("bob", "a")).await.unwrap();
    engine.notify(task_for("bob", "b")).await.unwrap();
    drain_for(&mut bob, Duration::from_millis(200)).await;
    drain_for(&mut bob_phone, Duration::from_millis(200)).await;

    send(
        &mut bob,
        &ClientEvent::MarkNotificationsRead { id: Some(first.id) },
    )
    .await;
    for ws in [&mut bob, &mut bob_phone] {
        match recv(ws).await {
            ServerEvent::NotificationsRead { ids } => {
                assert_eq!(ids, ReadScope::Ids(vec![first.id]));
            }
            other => panic!("expected notifications_read, got {other:?}"),
        }
    }

    send(&mut bob, &ClientEvent::MarkNotificationsRead { id: None }).await;
    assert!(matches!(
        recv(&mut bob).await,
        ServerEvent::NotificationsRead {
            ids: ReadScope::All
        }
    ));
    assert_eq!(engine.unread_count(&UserId::new("bob")).await.unwrap(), 0);

    let mut alice = connect(addr, "alice").await;
    send(
        &mut alice,
        &ClientEvent::MarkNotificationsRead { id: Some(first.id) },
    )
    .await;
    assert!(matches!(
        recv(&mut alice).await,
        ServerEvent::Error {
            code: ErrorCode::NotificationNotFound,
            ..
        }
    ));
}
