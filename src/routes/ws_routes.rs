use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{future, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::debug;

use crate::models::Frame;
use crate::service::connection_manager::ConnectionManager;
use crate::state::AppState;

const OUTBOUND_BUFFER: usize = 64;

/// GET `/` and `/ws`: upgrades to a WebSocket carrying the turn protocol.
pub async fn ws_chat_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let connections = state.connections.clone();
    ws.max_message_size(state.max_payload_bytes)
        .on_upgrade(move |socket| handle_socket(socket, connections))
}

/// Splits the socket: a writer task drains outbound frames in order, while the
/// reader side feeds raw payloads to the connection manager.
///
/// Protocol:
/// - Client sends JSON `{ "prompt", "imageUrl"?, "imageBase64"?, "chatId"?, "history"? }`
/// - Server sends raw token fragments, then `[END]` and `{ "chatId", "done": true }`,
///   or `[ERROR]` on failure, or `[BUSY]` if a turn is already running.
async fn handle_socket(socket: WebSocket, connections: ConnectionManager) {
    let (mut sink, stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Frame>(OUTBOUND_BUFFER);

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = sink.send(Message::Text(frame.into_text().into())).await {
                debug!("WebSocket send failed: {e}");
                break;
            }
        }
    });

    let inbound = stream
        .take_while(|msg| future::ready(matches!(msg, Ok(m) if !matches!(m, Message::Close(_)))))
        .filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(text.as_str().as_bytes().to_vec()),
                // Clients may send the JSON payload as a binary frame; UTF-8 is checked on parse.
                Ok(Message::Binary(bytes)) => Some(bytes.to_vec()),
                _ => None,
            })
        });

    connections.serve_connection(inbound, tx).await;

    if let Err(e) = writer.await {
        debug!("WebSocket writer ended abnormally: {e}");
    }
}
