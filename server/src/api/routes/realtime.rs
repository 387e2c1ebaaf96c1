//! WebSocket endpoints for the live hubs
//!
//! Each connection gets a bounded outbound channel registered with its hub
//! and a writer task that drains it with a per-write timeout. The hub side
//! sheds the client by dropping the channel sender; the writer task then
//! closes the socket with a normal-closure frame.
//!
//! `/ws/logs` is one-way: the reader only drains frames to detect close.
//! `/ws/dashboard` additionally accepts `{"service":"<name>"}` filter
//! messages; a client that sends anything unparsable is disconnected.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::api::server::AppState;
use crate::core::constants::{CLIENT_SEND_CAPACITY, CLIENT_WRITE_TIMEOUT_SECS};
use crate::realtime::{BroadcastHub, SnapshotHub};

/// Upgrade handler for the per-entry log stream.
pub async fn logs_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let hub = Arc::clone(&state.broadcast);
    ws.on_upgrade(move |socket| handle_logs_socket(socket, hub))
}

/// Upgrade handler for the aggregated dashboard stream.
pub async fn dashboard_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let hub = Arc::clone(&state.snapshot);
    ws.on_upgrade(move |socket| handle_dashboard_socket(socket, hub))
}

async fn handle_logs_socket(socket: WebSocket, hub: Arc<BroadcastHub>) {
    let (ws_tx, mut ws_rx) = socket.split();
    let (tx, rx) = mpsc::channel::<String>(CLIENT_SEND_CAPACITY);
    let id = hub.register(tx);

    let writer = tokio::spawn(write_loop(ws_tx, rx));

    // Reader drains only to detect close; nothing the client sends on this
    // channel is acted on.
    while let Some(Ok(message)) = ws_rx.next().await {
        if matches!(message, Message::Close(_)) {
            break;
        }
    }

    hub.unregister(id);
    writer.abort();
}

async fn handle_dashboard_socket(socket: WebSocket, hub: Arc<SnapshotHub>) {
    let (ws_tx, ws_rx) = socket.split();
    let (tx, rx) = mpsc::channel::<String>(CLIENT_SEND_CAPACITY);
    let id = hub.register(tx);

    let writer = tokio::spawn(write_loop(ws_tx, rx));
    read_filter_messages(ws_rx, &hub, id).await;

    hub.unregister(id);
    writer.abort();
}

async fn read_filter_messages(
    mut ws_rx: SplitStream<WebSocket>,
    hub: &Arc<SnapshotHub>,
    id: u64,
) {
    while let Some(Ok(message)) = ws_rx.next().await {
        match message {
            Message::Text(text) => {
                match crate::realtime::snapshot::parse_filter_message(&text) {
                    Ok(service) => hub.set_filter(id, service),
                    Err(e) => {
                        tracing::debug!(error = %e, "Invalid filter message, disconnecting client");
                        break;
                    }
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
}

/// Drain the hub's outbound channel into the socket. Ends when the hub drops
/// the sender (shedding or shutdown), the write times out, or the write
/// fails; always attempts a normal-closure frame on the way out.
async fn write_loop(mut ws_tx: SplitSink<WebSocket, Message>, mut rx: mpsc::Receiver<String>) {
    let timeout = Duration::from_secs(CLIENT_WRITE_TIMEOUT_SECS);

    while let Some(payload) = rx.recv().await {
        match tokio::time::timeout(timeout, ws_tx.send(Message::Text(payload.into()))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "WebSocket write failed");
                return;
            }
            Err(_) => {
                tracing::debug!("WebSocket write timed out");
                return;
            }
        }
    }

    let _ = ws_tx
        .send(Message::Close(Some(CloseFrame {
            code: close_code::NORMAL,
            reason: "closing".into(),
        })))
        .await;
}
