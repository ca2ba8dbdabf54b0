//! WebSocket transport adapter.
//!
//! Owns the socket: splits it, drains the per-connection outbound channel
//! through a single writer task (so frames never interleave), enforces the
//! idle timeout on reads, and feeds every text frame to the core gateway.
//! All protocol logic lives in the gateway; this file only moves bytes.

use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use partysync_core::broadcast::{ClientHandle, OutboundFrame};
use partysync_core::gateway::ConnState;
use partysync_core::models::id::generate_connection_id;

use crate::http::AppState;

/// Signaling frames are small; anything bigger than this is abuse.
const MAX_MESSAGE_SIZE: usize = 64 * 1024;

pub async fn websocket_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = generate_connection_id();
    let (tx, mut rx) = mpsc::channel::<OutboundFrame>(state.config.rooms.max_outbound_backlog);
    let handle = ClientHandle::new(connection_id.clone(), tx);
    let mut conn = ConnState::new(connection_id.clone(), handle);

    info!(connection_id = %connection_id, "WebSocket connection established");

    let (mut sink, mut stream) = socket.split();

    // Writer task: the only place this socket is written from.
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            match frame {
                OutboundFrame::Data(text) => {
                    if sink.send(Message::Text(text.to_string())).await.is_err() {
                        break;
                    }
                }
                OutboundFrame::Close => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    let idle_timeout = Duration::from_millis(state.config.rooms.client_idle_timeout_ms);
    loop {
        match tokio::time::timeout(idle_timeout, stream.next()).await {
            Err(_) => {
                warn!(connection_id = %connection_id, "Client idle timeout, closing");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                debug!(connection_id = %connection_id, error = %e, "WebSocket transport error");
                break;
            }
            Ok(Some(Ok(Message::Text(text)))) => {
                state.gateway.handle_frame(&mut conn, &text);
            }
            Ok(Some(Ok(Message::Close(_)))) => break,
            Ok(Some(Ok(_))) => {
                // Ignore ping/pong/binary frames.
            }
        }
    }

    state.gateway.handle_disconnect(&conn);
    conn.handle.close();
    drop(conn);
    let _ = writer.await;

    info!(connection_id = %connection_id, "WebSocket connection closed");
}
