//! Signaling relay
//!
//! Routing table from live connections to their outbound queues. The relay
//! does not inspect payloads and keeps no per-message state: a message is
//! either handed to the target's queue right away or dropped.

use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::models::ConnectionId;
use crate::protocol::ServerMessage;

/// Outbound half of a connection's message queue
pub type Outbound = mpsc::Sender<ServerMessage>;

#[derive(Default)]
pub struct SignalingRelay {
    connections: DashMap<ConnectionId, Outbound>,
}

impl SignalingRelay {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a live connection, replacing any stale queue under the same id
    pub fn register(&self, connection_id: ConnectionId, outbound: Outbound) {
        if self.connections.insert(connection_id.clone(), outbound).is_some() {
            warn!(connection_id = %connection_id, "Replaced existing connection queue");
        }
    }

    /// Forget a connection. Returns false if it was not registered.
    pub fn unregister(&self, connection_id: &ConnectionId) -> bool {
        self.connections.remove(connection_id).is_some()
    }

    #[must_use]
    pub fn is_connected(&self, connection_id: &ConnectionId) -> bool {
        self.connections.contains_key(connection_id)
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Queue a message for one connection.
    ///
    /// Unknown targets and full queues drop the message; the return value
    /// says whether it was queued.
    pub fn send(&self, target: &ConnectionId, message: ServerMessage) -> bool {
        // Clone the sender so no map guard is held while sending
        let Some(outbound) = self.connections.get(target).map(|e| e.value().clone()) else {
            debug!(target = %target, kind = message.kind(), "Dropping message for unknown connection");
            return false;
        };

        match outbound.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(message)) => {
                warn!(
                    target = %target,
                    kind = message.kind(),
                    "Outbound queue full, dropping message"
                );
                false
            }
            Err(TrySendError::Closed(message)) => {
                debug!(target = %target, kind = message.kind(), "Connection closed, dropping message");
                false
            }
        }
    }

    /// Queue a copy of `message` for each target. Returns how many were queued.
    pub fn broadcast(&self, targets: &[ConnectionId], message: &ServerMessage) -> usize {
        targets
            .iter()
            .filter(|target| self.send(target, message.clone()))
            .count()
    }
}
