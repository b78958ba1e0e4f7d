//! Signaling service
//!
//! Transport-agnostic processing of the three inbound connection events:
//! connect, message and disconnect. Transports own the sockets; this service
//! owns the registry and the relay and decides who hears what.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::models::{ConnectionId, SessionId};
use crate::protocol::{self, ClientMessage, ServerMessage};
use crate::Error;

use super::registry::SessionRegistry;
use super::relay::SignalingRelay;

/// Signaling service shared by every connection
#[derive(Clone)]
pub struct SignalingService {
    registry: Arc<SessionRegistry>,
    relay: Arc<SignalingRelay>,
}

impl SignalingService {
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self::with_registry(Arc::new(SessionRegistry::new(config)))
    }

    #[must_use]
    pub fn with_registry(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            relay: Arc::new(SignalingRelay::new()),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn relay(&self) -> &Arc<SignalingRelay> {
        &self.relay
    }

    /// Register a new connection and return the queue of messages for it
    pub fn connect(&self, connection_id: ConnectionId) -> mpsc::Receiver<ServerMessage> {
        let (tx, rx) = mpsc::channel(self.registry.config().outbound_queue);
        self.relay.register(connection_id.clone(), tx);
        debug!(connection_id = %connection_id, "Connection registered");
        rx
    }

    /// Decode and process one text frame. Malformed frames are answered with
    /// an `error` message; the connection stays open.
    pub fn handle_text(&self, connection_id: &ConnectionId, text: &str) {
        match protocol::decode_client(text) {
            Ok(message) => self.handle(connection_id, message),
            Err(e) => {
                warn!(connection_id = %connection_id, error = %e, "Rejected malformed frame");
                self.reply_error(connection_id, &e);
            }
        }
    }

    /// Process one decoded client message
    pub fn handle(&self, connection_id: &ConnectionId, message: ClientMessage) {
        debug!(connection_id = %connection_id, kind = message.kind(), "Inbound message");

        match message {
            ClientMessage::CreateSession => self.create_session(connection_id),
            ClientMessage::JoinSession {
                session_id,
                display_name,
            } => self.join_session(connection_id, &session_id, display_name.as_deref()),
            ClientMessage::LeaveSession => {
                self.leave(connection_id);
            }
            ClientMessage::Offer {
                sdp_payload,
                target_id,
            } => self.route(
                connection_id,
                target_id.as_ref(),
                ServerMessage::Offer {
                    sdp_payload,
                    sender_id: connection_id.clone(),
                },
            ),
            ClientMessage::Answer {
                sdp_payload,
                target_id,
            } => self.route(
                connection_id,
                target_id.as_ref(),
                ServerMessage::Answer {
                    sdp_payload,
                    sender_id: connection_id.clone(),
                },
            ),
            ClientMessage::IceCandidate {
                candidate_payload,
                target_id,
            } => self.route(
                connection_id,
                target_id.as_ref(),
                ServerMessage::IceCandidate {
                    candidate_payload,
                    sender_id: connection_id.clone(),
                },
            ),
            ClientMessage::StatusUpdate { status } => self.route(
                connection_id,
                None,
                ServerMessage::StatusUpdate {
                    status,
                    sender_id: connection_id.clone(),
                },
            ),
        }
    }

    /// Remove the connection from its session and tell the remaining members.
    /// Returns false when it was not in a session.
    pub fn leave(&self, connection_id: &ConnectionId) -> bool {
        let Some(outcome) = self.registry.leave_session(connection_id) else {
            return false;
        };

        let notice = ServerMessage::MemberLeft {
            participant_id: connection_id.clone(),
            name: outcome.participant.name,
            member_count: outcome.member_count,
        };
        self.relay.broadcast(&outcome.others, &notice);
        true
    }

    /// Tear down everything the connection owns. Safe to call more than once.
    pub fn disconnect(&self, connection_id: &ConnectionId) {
        let left = self.leave(connection_id);
        self.registry.discard_unclaimed(connection_id);
        let was_registered = self.relay.unregister(connection_id);

        if was_registered {
            info!(connection_id = %connection_id, left_session = left, "Connection closed");
        }
    }

    /// Periodically drop sessions that were created but never joined
    pub async fn run_sweeper(&self, mut shutdown: watch::Receiver<bool>) {
        let ttl = Duration::from_secs(self.registry.config().unclaimed_ttl_secs);
        let mut ticker = tokio::time::interval(ttl.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.registry.sweep_unclaimed(ttl);
                }
                _ = shutdown.changed() => {
                    debug!("Session sweeper stopping");
                    break;
                }
            }
        }
    }

    fn create_session(&self, connection_id: &ConnectionId) {
        match self.registry.create_session(Some(connection_id)) {
            Ok(session_id) => {
                self.relay
                    .send(connection_id, ServerMessage::SessionCreated { session_id });
            }
            Err(e) => self.reply_error(connection_id, &e),
        }
    }

    fn join_session(
        &self,
        connection_id: &ConnectionId,
        session_id: &SessionId,
        display_name: Option<&str>,
    ) {
        let outcome = match self
            .registry
            .join_session(session_id, connection_id, display_name)
        {
            Ok(outcome) => outcome,
            Err(e) => {
                self.reply_error(connection_id, &e);
                return;
            }
        };

        if outcome.newly_joined {
            let notice = ServerMessage::MemberJoined {
                participant_id: connection_id.clone(),
                name: outcome.participant.name.clone(),
                member_count: outcome.members.len(),
            };
            self.relay.broadcast(&outcome.others, &notice);
        }

        self.relay.send(
            connection_id,
            ServerMessage::SessionJoined {
                session_id: outcome.session_id,
                participant_id: connection_id.clone(),
                members: outcome.members,
                is_initiator: outcome.is_initiator,
            },
        );
    }

    /// Forward a negotiation or status message within the sender's session.
    ///
    /// With a target, only that member receives it; without one, every other
    /// member does. Anything addressed outside the session is dropped.
    fn route(&self, sender: &ConnectionId, target: Option<&ConnectionId>, message: ServerMessage) {
        let Some((session_id, others)) = self.registry.peers_of(sender) else {
            debug!(sender = %sender, kind = message.kind(), "Sender not in a session, dropping");
            return;
        };

        match target {
            Some(target) if others.contains(target) => {
                self.relay.send(target, message);
            }
            Some(target) => {
                debug!(
                    session_id = %session_id,
                    sender = %sender,
                    target = %target,
                    kind = message.kind(),
                    "Target not in sender's session, dropping"
                );
            }
            None => {
                self.relay.broadcast(&others, &message);
            }
        }
    }

    /// Answer a request with an `error` message
    pub fn reply_error(&self, connection_id: &ConnectionId, error: &Error) {
        self.relay
            .send(connection_id, ServerMessage::from_error(error));
    }
}
