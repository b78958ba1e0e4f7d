//! Reconnecting signaling channel
//!
//! A background task owns the WebSocket. It reconnects with exponential
//! backoff after a drop and reports every transition as a [`ChannelEvent`].
//! Messages queued while no connection is up are discarded when the next
//! connection is established; anything still meaningful is re-sent by the
//! caller after `Connected`.

use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tandem_core::protocol::{decode_server, encode, ClientMessage, ServerMessage};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::ReconnectConfig;
use crate::error::{Error, Result};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// A connection is up. Emitted again after every reconnect.
    Connected,
    Message(ServerMessage),
    /// The connection dropped. Reconnection follows unless backoff ran out.
    Disconnected(String),
}

#[derive(Debug, Clone)]
pub struct SignalingChannel {
    outbound: mpsc::UnboundedSender<ClientMessage>,
    shutdown: CancellationToken,
}

impl SignalingChannel {
    /// Start the connection task for a `ws://` or `wss://` endpoint
    pub fn connect(
        url: &str,
        reconnect: ReconnectConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ChannelEvent>)> {
        let url = Url::parse(url)
            .map_err(|e| Error::Transport(format!("invalid signaling url {url}: {e}")))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::Transport(format!(
                "unsupported signaling scheme: {}",
                url.scheme()
            )));
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        tokio::spawn(run(url, reconnect, outbound_rx, events_tx, shutdown.clone()));

        Ok((
            Self {
                outbound: outbound_tx,
                shutdown,
            },
            events_rx,
        ))
    }

    /// Queue a message for the current connection
    pub fn send(&self, message: ClientMessage) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(Error::Closed);
        }
        self.outbound.send(message).map_err(|_| Error::Closed)
    }

    /// Close the connection and stop reconnecting
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled() || self.outbound.is_closed()
    }
}

enum Exit {
    Shutdown,
    Lost(String),
}

async fn run(
    url: Url,
    reconnect: ReconnectConfig,
    mut outbound: mpsc::UnboundedReceiver<ClientMessage>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    shutdown: CancellationToken,
) {
    loop {
        let Some(socket) = connect_with_backoff(&url, &reconnect, &shutdown).await else {
            if !shutdown.is_cancelled() {
                let _ = events.send(ChannelEvent::Disconnected(
                    "signaling server unreachable".to_string(),
                ));
            }
            break;
        };

        let mut stale = 0usize;
        while outbound.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            debug!(count = stale, "Discarded messages queued while disconnected");
        }

        if events.send(ChannelEvent::Connected).is_err() {
            break;
        }

        match pump(socket, &mut outbound, &events, &shutdown).await {
            Exit::Shutdown => break,
            Exit::Lost(reason) => {
                warn!(url = %url, reason = %reason, "Signaling connection lost");
                if events.send(ChannelEvent::Disconnected(reason)).is_err() {
                    break;
                }
            }
        }
    }

    debug!(url = %url, "Signaling channel stopped");
}

async fn connect_with_backoff(
    url: &Url,
    reconnect: &ReconnectConfig,
    shutdown: &CancellationToken,
) -> Option<Socket> {
    let delays = std::iter::once(Duration::ZERO).chain(reconnect.backoff());

    for (attempt, delay) in delays.enumerate() {
        if delay > Duration::ZERO {
            tokio::select! {
                () = shutdown.cancelled() => return None,
                () = tokio::time::sleep(delay) => {}
            }
        }

        tokio::select! {
            () = shutdown.cancelled() => return None,
            result = connect_async(url.as_str()) => match result {
                Ok((socket, _)) => {
                    info!(url = %url, attempt, "Signaling connected");
                    return Some(socket);
                }
                Err(e) => {
                    warn!(url = %url, attempt, error = %e, "Signaling connect failed");
                }
            }
        }
    }

    None
}

async fn pump(
    socket: Socket,
    outbound: &mut mpsc::UnboundedReceiver<ClientMessage>,
    events: &mpsc::UnboundedSender<ChannelEvent>,
    shutdown: &CancellationToken,
) -> Exit {
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return Exit::Shutdown;
            }

            message = outbound.recv() => {
                let Some(message) = message else {
                    let _ = sink.send(Message::Close(None)).await;
                    return Exit::Shutdown;
                };
                let text = match encode(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(kind = message.kind(), error = %e, "Failed to encode signaling message");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    return Exit::Lost(e.to_string());
                }
            }

            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => match decode_server(text.as_str()) {
                    Ok(message) => {
                        if events.send(ChannelEvent::Message(message)).is_err() {
                            let _ = sink.send(Message::Close(None)).await;
                            return Exit::Shutdown;
                        }
                    }
                    Err(e) => warn!(error = %e, "Undecodable signaling frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.as_str().to_string())
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| "closed by server".to_string());
                    return Exit::Lost(reason);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Exit::Lost(e.to_string()),
                None => return Exit::Lost("connection closed".to_string()),
            }
        }
    }
}
