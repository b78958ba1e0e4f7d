//! Signaling WebSocket handler
//!
//! One socket is one connection. Frames are JSON text; each connection gets
//! an id on accept, a bounded outbound queue drained by a writer task, and a
//! single disconnect when the socket ends for any reason.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tandem_core::{protocol, ConnectionId, Error};
use tracing::{debug, error, info, warn};

use crate::http::AppState;

/// WebSocket handler for the signaling channel
///
/// `GET /ws`, then JSON frames in both directions.
pub async fn websocket_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let max_message_bytes = state.config.session.max_message_bytes;

    ws.max_message_size(max_message_bytes)
        .max_frame_size(max_message_bytes)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = ConnectionId::generate();
    let signaling = state.signaling;

    let mut outbound = signaling.connect(connection_id.clone());
    let (mut ws_sink, mut ws_stream) = socket.split();

    info!(connection_id = %connection_id, "WebSocket connection established");

    // Server messages -> WebSocket
    let writer_id = connection_id.clone();
    let mut writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let text = match protocol::encode(&message) {
                Ok(text) => text,
                Err(e) => {
                    error!(connection_id = %writer_id, error = %e, "Failed to encode message");
                    continue;
                }
            };

            if let Err(e) = ws_sink.send(Message::Text(text.into())).await {
                debug!(connection_id = %writer_id, error = %e, "WebSocket send failed");
                break;
            }
        }
    });

    // WebSocket -> signaling service
    loop {
        tokio::select! {
            frame = ws_stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    signaling.handle_text(&connection_id, text.as_str());
                }
                Some(Ok(Message::Binary(_))) => {
                    warn!(connection_id = %connection_id, "Binary frame rejected");
                    signaling.reply_error(
                        &connection_id,
                        &Error::InvalidMessage("binary frames are not supported".to_string()),
                    );
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {
                    // Ping/pong are answered by axum
                }
                Some(Err(e)) => {
                    debug!(connection_id = %connection_id, error = %e, "WebSocket receive failed");
                    break;
                }
            },
            _ = &mut writer => {
                debug!(connection_id = %connection_id, "Writer finished, closing connection");
                break;
            }
        }
    }

    signaling.disconnect(&connection_id);
    writer.abort();

    info!(connection_id = %connection_id, "WebSocket connection closed");
}
