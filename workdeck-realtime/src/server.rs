//! WebSocket transport: the axum router, the handshake and the per-connection
//! reader and writer tasks.
//!
//! Each connection gets an unbounded channel. The writer task drains it onto
//! the socket; the reader task decodes frames and hands them to the
//! [`Hub`]. When either task ends the other is aborted and the hub cleans up
//! the connection before the handler returns.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use workdeck_proto::codec::{self, CodecError};
use workdeck_proto::event::{ClientEvent, ErrorCode, ServerEvent};

use crate::hub::Hub;
use crate::identity::Identity;
use crate::registry::{ConnectionId, Outgoing};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Builds the router: `GET /ws` upgrades, `GET /health` answers `ok`.
pub fn router(hub: Arc<Hub>) -> axum::Router {
    axum::Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .with_state(hub)
}

/// Starts the server on `addr` and returns the bound address and the
/// serving task.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
    hub: Arc<Hub>,
) -> Result<(SocketAddr, JoinHandle<()>), BoxError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;
    let app = router(hub);

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "server error");
        }
    });

    Ok((bound_addr, handle))
}

async fn health() -> &'static str {
    "ok"
}

async fn ws_handler(ws: WebSocketUpgrade, State(hub): State<Arc<Hub>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

/// Drives one upgraded connection from handshake to cleanup.
pub async fn handle_socket(socket: WebSocket, hub: Arc<Hub>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let max_frame_size = hub.settings().max_frame_size;

    let identity = match wait_for_authenticate(&mut ws_receiver, &hub, max_frame_size).await {
        Handshake::Accepted(identity) => identity,
        Handshake::Rejected(reason) => {
            tracing::info!(reason = %reason, "handshake rejected");
            let event = ServerEvent::error(ErrorCode::AuthFailed, reason);
            if let Ok(text) = codec::encode_server(&event) {
                let _ = ws_sender.send(Message::Text(text.into())).await;
            }
            let _ = ws_sender
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::POLICY,
                    reason: "authentication failed".into(),
                })))
                .await;
            return;
        }
        Handshake::Closed => {
            tracing::debug!("connection closed before authentication");
            return;
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<Outgoing>();
    let connection_id = hub.connect(identity, tx.clone()).await;

    let mut write_task = tokio::spawn(async move {
        while let Some(item) = rx.recv().await {
            let frame = match item {
                Outgoing::Event(event) => match codec::encode_server(&event) {
                    Ok(text) => Message::Text(text.into()),
                    Err(e) => {
                        tracing::error!(conn_id = %connection_id, event = event.name(), error = %e, "failed to encode event");
                        continue;
                    }
                },
                Outgoing::Close => {
                    let _ = ws_sender
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::AWAY,
                            reason: "server shutting down".into(),
                        })))
                        .await;
                    break;
                }
            };
            if ws_sender.send(frame).await.is_err() {
                tracing::warn!(conn_id = %connection_id, "WebSocket write failed");
                break;
            }
        }
    });

    let reader_hub = Arc::clone(&hub);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => {
                    handle_text(&reader_hub, connection_id, &tx, text.as_str(), max_frame_size)
                        .await;
                }
                Message::Binary(_) => {
                    reject(&tx, ErrorCode::InvalidEvent, "binary frames are not supported");
                }
                Message::Close(_) => {
                    tracing::debug!(conn_id = %connection_id, "received close frame");
                    break;
                }
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            // The reader may be mid-join; it must be gone before membership
            // is torn down.
            stop(&mut read_task).await;
        }
    }

    hub.disconnect(&connection_id).await;
}

/// Aborts `task` and waits until its future has been dropped.
async fn stop(task: &mut JoinHandle<()>) {
    task.abort();
    let _ = task.await;
}

enum Handshake {
    Accepted(Identity),
    Rejected(String),
    Closed,
}

/// Waits for the first data frame, which must be `authenticate`.
async fn wait_for_authenticate(
    receiver: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
    hub: &Hub,
    max_frame_size: usize,
) -> Handshake {
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                return match codec::decode_client(text.as_str(), max_frame_size) {
                    Ok(ClientEvent::Authenticate { token }) => {
                        match hub.authenticate(&token).await {
                            Ok(identity) => Handshake::Accepted(identity),
                            Err(e) => Handshake::Rejected(e.to_string()),
                        }
                    }
                    Ok(other) => {
                        tracing::debug!(event = ?other, "expected authenticate");
                        Handshake::Rejected("first event must be authenticate".to_string())
                    }
                    Err(e) => Handshake::Rejected(e.to_string()),
                };
            }
            Message::Binary(_) => {
                return Handshake::Rejected("binary frames are not supported".to_string());
            }
            Message::Close(_) => return Handshake::Closed,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }
    Handshake::Closed
}

async fn handle_text(
    hub: &Hub,
    connection_id: ConnectionId,
    tx: &mpsc::UnboundedSender<Outgoing>,
    text: &str,
    max_frame_size: usize,
) {
    match codec::decode_client(text, max_frame_size) {
        Ok(event) => hub.handle(connection_id, event).await,
        Err(e @ CodecError::FrameTooLarge { .. }) => {
            tracing::debug!(conn_id = %connection_id, error = %e, "frame rejected");
            reject(tx, ErrorCode::FrameTooLarge, &e.to_string());
        }
        Err(e) => {
            tracing::debug!(conn_id = %connection_id, error = %e, "undecodable frame");
            reject(tx, ErrorCode::InvalidEvent, &e.to_string());
        }
    }
}

fn reject(tx: &mpsc::UnboundedSender<Outgoing>, code: ErrorCode, message: &str) {
    let _ = tx.send(Outgoing::Event(Arc::new(ServerEvent::error(code, message))));
}
