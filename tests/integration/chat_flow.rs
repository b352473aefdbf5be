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

//! Integration tests for room chat over a live WebSocket server.
//!
//! These tests validate:
//! - A sent message is broadcast to the room and ends the room's history
//! - Over-long content is rejected and nothing is persisted
//! - Only the sender can edit a message; edits show up in history
//! - Mentioning a room member notifies them with a `chat_mention`
//! - A plain message produces no notification

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite;
use workdeck_proto::codec;
use workdeck_proto::event::{ClientEvent, ErrorCode, ServerEvent};
use workdeck_proto::message::{ChatMessage, MAX_CONTENT_CHARS, UserId};
use workdeck_proto::notification::NotificationType;
use workdeck_realtime::hub::{Hub, HubSettings, Services};
use workdeck_realtime::identity::{Identity, MemoryDirectory, Role};
use workdeck_realtime::server;

// =============================================================================
// Type aliases and helpers
// =============================================================================

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

const TIMEOUT: Duration = Duration::from_secs(5);

/// Starts a server on a random port with alice, bob and carol configured.
async fn start() -> (SocketAddr, Arc<Hub>) {
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
    let hub = Arc::new(Hub::new(
        Services::in_memory(directory),
        HubSettings::default(),
    ));
    let (addr, _handle) = server::start_server("127.0.0.1:0", Arc::clone(&hub))
        .await
        .expect("failed to start test server");
    (addr, hub)
}

/// Connects and completes the handshake as `user`.
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

/// Receives the next event, skipping control frames.
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

/// Receives events until one matches `pred`.
async fn recv_until(ws: &mut WsStream, pred: impl Fn(&ServerEvent) -> bool) -> ServerEvent {
    loop {
        let event = recv(ws).await;
        if pred(&event) {
            return event;
        }
    }
}

/// Collects every event that arrives within `quiet`.
async fn drain_for(ws: &mut WsStream, quiet: Duration) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(Some(Ok(msg))) = tokio::time::timeout(quiet, ws.next()).await {
        if let tungstenite::Message::Text(text) = msg {
            events.push(codec::decode_server(text.as_str()).unwrap());
        }
    }
    events
}

async fn join(ws: &mut WsStream, room: &str) -> Vec<ChatMessage> {
    send(ws, &ClientEvent::JoinRoom { room: room.into() }).await;
    match recv_until(ws, |e| matches!(e, ServerEvent::RoomJoined { .. })).await {
        ServerEvent::RoomJoined {
            recent_messages, ..
        } => recent_messages,
        _ => unreachable!(),
    }
}

async fn say(ws: &mut WsStream, room: &str, content: &str) -> ChatMessage {
    send(
        ws,
        &ClientEvent::SendMessage {
            room: room.into(),
            content: content.into(),
        },
    )
    .await;
    match recv_until(ws, |e| matches!(e, ServerEvent::NewMessage { message } if !message.is_system())).await {
        ServerEvent::NewMessage { message } => message,
        _ => unreachable!(),
    }
}

async fn history(ws: &mut WsStream, room: &str) -> Vec<ChatMessage> {
    send(
        ws,
        &ClientEvent::GetHistory {
            room: room.into(),
            page: None,
            limit: None,
            before: None,
        },
    )
    .await;
    match recv_until(ws, |e| matches!(e, ServerEvent::ChatHistory { .. })).await {
        ServerEvent::ChatHistory { page } => page.messages,
        _ => unreachable!(),
    }
}

async fn expect_error(ws: &mut WsStream, expected: ErrorCode) {
    match recv_until(ws, |e| matches!(e, ServerEvent::Error { .. })).await {
        ServerEvent::Error { code, .. } => assert_eq!(code, expected),
        _ => unreachable!(),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn sent_message_reaches_room_and_ends_history() {
    let (addr, _hub) = start().await;
    let mut alice = connect(addr, "alice").await;
    let mut bob = connect(addr, "bob").await;
    join(&mut alice, "general").await;
    join(&mut bob, "general").await;

    let sent = say(&mut alice, "general", "<b>hi</b> team").await;
    assert_eq!(sent.content, "&lt;b&gt;hi&lt;/b&gt; team");
    assert_eq!(sent.sender, Some(UserId::new("alice")));

    let seen = recv_until(&mut bob, |e| {
        matches!(e, ServerEvent::NewMessage { message } if !message.is_system())
    })
    .await;
    assert!(matches!(seen, ServerEvent::NewMessage { message } if message.id == sent.id));

    let messages = history(&mut bob, "GENERAL").await;
    assert_eq!(messages.last().map(|m| m.id), Some(sent.id));
}

#[tokio::test]
async fn over_long_content_is_rejected_and_not_stored() {
    let (addr, _hub) = start().await;
    let mut alice = connect(addr, "alice").await;

    send(
        &mut alice,
        &ClientEvent::SendMessage {
            room: "general".into(),
            content: "x".repeat(MAX_CONTENT_CHARS + 1),
        },
    )
    .await;
    expect_error(&mut alice, ErrorCode::MessageTooLong).await;

    assert!(history(&mut alice, "general").await.is_empty());
}

#[tokio::test]
async fn only_sender_can_edit() {
    let (addr, _hub) = start().await;
    let mut alice = connect(addr, "alice").await;
    let mut bob = connect(addr, "bob").await;
    join(&mut alice, "general").await;
    join(&mut bob, "general").await;
    let sent = say(&mut alice, "general", "draft").await;

    send(
        &mut bob,
        &ClientEvent::EditMessage {
            id: sent.id,
            content: "vandalized".into(),
        },
    )
    .await;
    expect_error(&mut bob, ErrorCode::MessageNotFound).await;
    let unchanged = history(&mut bob, "general").await;
    assert_eq!(unchanged.last().unwrap().content, "draft");

    send(
        &mut alice,
        &ClientEvent::EditMessage {
            id: sent.id,
            content: "final".into(),
        },
    )
    .await;
    let edited = recv_until(&mut bob, |e| matches!(e, ServerEvent::MessageEdited { .. })).await;
    assert!(matches!(
        edited,
        ServerEvent::MessageEdited { message } if message.id == sent.id && message.edited
    ));

    let messages = history(&mut alice, "general").await;
    let last = messages.last().unwrap();
    assert_eq!(last.content, "final");
    assert!(last.edited);
}

#[tokio::test]
async fn delete_is_broadcast() {
    let (addr, _hub) = start().await;
    let mut alice = connect(addr, "alice").await;
    let mut bob = connect(addr, "bob").await;
    join(&mut alice, "general").await;
    join(&mut bob, "general").await;
    let sent = say(&mut alice, "general", "oops").await;

    send(&mut alice, &ClientEvent::DeleteMessage { id: sent.id }).await;
    let deleted = recv_until(&mut bob, |e| matches!(e, ServerEvent::MessageDeleted { .. })).await;
    assert!(matches!(
        deleted,
        ServerEvent::MessageDeleted { id, room } if id == sent.id && room == "general"
    ));
}

#[tokio::test]
async fn mention_notifies_room_member() {
    let (addr, _hub) = start().await;
    let mut alice = connect(addr, "alice").await;
    let mut bob = connect(addr, "bob").await;
    join(&mut alice, "general").await;
    join(&mut bob, "general").await;

    let sent = say(&mut alice, "general", "hello @Bob").await;

    let message = recv_until(&mut bob, |e| {
        matches!(e, ServerEvent::NewMessage { message } if !message.is_system())
    })
    .await;
    assert!(matches!(message, ServerEvent::NewMessage { message } if message.id == sent.id));

    let notification =
        recv_until(&mut bob, |e| matches!(e, ServerEvent::NewNotification { .. })).await;
    let ServerEvent::NewNotification { notification } = notification else {
        unreachable!();
    };
    assert_eq!(notification.kind, NotificationType::ChatMention);
    assert_eq!(notification.recipient, UserId::new("bob"));
    assert!(notification.title.contains("Alice"));
    assert_eq!(
        notification.payload["message_id"],
        serde_json::json!(sent.id)
    );
    assert_eq!(notification.payload["sender_id"], serde_json::json!("alice"));
}

#[tokio::test]
async fn plain_message_produces_no_notification() {
    let (addr, _hub) = start().await;
    let mut alice = connect(addr, "alice").await;
    let mut bob = connect(addr, "bob").await;
    join(&mut alice, "general").await;
    join(&mut bob, "general").await;

    say(&mut alice, "general", "no mentions, just bob@example.com").await;
    let events = drain_for(&mut bob, Duration::from_millis(300)).await;
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, ServerEvent::NewNotification { .. })),
        "unexpected notification in {events:?}"
    );
}
