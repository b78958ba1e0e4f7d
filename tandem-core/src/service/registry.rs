//! Session registry
//!
//! Authoritative, in-memory record of which connections belong to which
//! session. Every operation on one session runs under that session's map
//! entry lock, so concurrent joins and leaves on the same session are
//! linearized while unrelated sessions proceed in parallel.

use chrono::{Duration as ChronoDuration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::models::{ConnectionId, Participant, ParticipantInfo, Session, SessionId};
use crate::{Error, Result};

/// How many times the token length may grow by one character before giving up
const MAX_ID_WIDENING: usize = 4;

type IdGenerator = Box<dyn Fn(usize) -> SessionId + Send + Sync>;

/// Result of a successful join
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub session_id: SessionId,
    pub participant: ParticipantInfo,
    /// Full member list in join order, including the joiner
    pub members: Vec<ParticipantInfo>,
    pub is_initiator: bool,
    /// Members that should hear about the join
    pub others: Vec<ConnectionId>,
    /// False when the connection was already a member
    pub newly_joined: bool,
}

/// Result of removing a participant
#[derive(Debug, Clone)]
pub struct LeaveOutcome {
    pub session_id: SessionId,
    pub participant: ParticipantInfo,
    /// Remaining member count after removal
    pub member_count: usize,
    /// Members that should hear about the departure
    pub others: Vec<ConnectionId>,
    pub session_destroyed: bool,
}

/// Public view of a live session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub member_count: usize,
    pub capacity: usize,
    pub created_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    pub live_sessions: usize,
    pub live_participants: usize,
}

/// In-memory session registry
pub struct SessionRegistry {
    config: SessionConfig,
    sessions: DashMap<SessionId, Session>,
    /// Reverse index: which session each connection belongs to
    memberships: DashMap<ConnectionId, SessionId>,
    id_generator: IdGenerator,
}

impl SessionRegistry {
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self::with_id_generator(config, Box::new(SessionId::generate))
    }

    /// Create a registry with a custom token source
    #[must_use]
    pub fn with_id_generator(config: SessionConfig, id_generator: IdGenerator) -> Self {
        Self {
            config,
            sessions: DashMap::new(),
            memberships: DashMap::new(),
            id_generator,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Create an empty session and return its token.
    ///
    /// Collisions with live sessions are retried; after `id_max_attempts`
    /// collisions at one length the token grows by a character.
    pub fn create_session(&self, creator: Option<&ConnectionId>) -> Result<SessionId> {
        let mut attempts = 0;

        for widening in 0..=MAX_ID_WIDENING {
            let len = self.config.id_length + widening;

            for _ in 0..self.config.id_max_attempts {
                attempts += 1;
                let id = (self.id_generator)(len);

                if let Entry::Vacant(entry) = self.sessions.entry(id.clone()) {
                    let mut session = Session::new(id.clone(), self.config.capacity);
                    if let Some(creator) = creator {
                        session = session.with_creator(creator.clone());
                    }
                    entry.insert(session);

                    info!(
                        session_id = %id,
                        attempts,
                        total_sessions = self.sessions.len(),
                        "Created session"
                    );
                    return Ok(id);
                }

                debug!(session_id = %id, attempts, "Session id collision");
            }

            warn!(len, attempts, "Session id space crowded, widening token");
        }

        Err(Error::IdSpaceExhausted { attempts })
    }

    /// Add `connection_id` to a session.
    ///
    /// Joining a session the connection already belongs to is a no-op that
    /// returns the current snapshot. Joining a second session is rejected.
    pub fn join_session(
        &self,
        session_id: &SessionId,
        connection_id: &ConnectionId,
        display_name: Option<&str>,
    ) -> Result<JoinOutcome> {
        let current = self.memberships.get(connection_id).map(|e| e.value().clone());
        if let Some(current) = current {
            if &current != session_id {
                return Err(Error::AlreadyInSession(current));
            }
        }

        let mut session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.clone()))?;

        let newly_joined = if session.contains(connection_id) {
            false
        } else {
            if session.is_full() {
                warn!(
                    session_id = %session_id,
                    connection_id = %connection_id,
                    capacity = session.capacity,
                    "Join rejected, session full"
                );
                return Err(Error::SessionFull {
                    session_id: session_id.clone(),
                    capacity: session.capacity,
                });
            }

            session.admit(connection_id.clone(), display_name);
            self.memberships
                .insert(connection_id.clone(), session_id.clone());
            true
        };

        let participant = session
            .participant(connection_id)
            .map(Participant::info)
            .ok_or_else(|| Error::Internal("joined participant missing".to_string()))?;

        let outcome = JoinOutcome {
            session_id: session_id.clone(),
            participant,
            members: session.members(),
            is_initiator: session.is_initiator(connection_id),
            others: session.others(connection_id),
            newly_joined,
        };

        if newly_joined {
            info!(
                session_id = %session_id,
                connection_id = %connection_id,
                member_count = outcome.members.len(),
                is_initiator = outcome.is_initiator,
                "Participant joined session"
            );
        } else {
            debug!(session_id = %session_id, connection_id = %connection_id, "Duplicate join ignored");
        }

        Ok(outcome)
    }

    /// Remove `connection_id` from whatever session it belongs to.
    ///
    /// Returns `None` when the connection is not a member. The session is
    /// destroyed as soon as its last member leaves.
    pub fn leave_session(&self, connection_id: &ConnectionId) -> Option<LeaveOutcome> {
        let (_, session_id) = self.memberships.remove(connection_id)?;

        let mut outcome = {
            let mut session = self.sessions.get_mut(&session_id)?;
            let participant = session.remove(connection_id)?;
            LeaveOutcome {
                session_id: session_id.clone(),
                participant: participant.info(),
                member_count: session.member_count(),
                others: session.others(connection_id),
                session_destroyed: false,
            }
        };

        if outcome.member_count == 0 {
            outcome.session_destroyed = self
                .sessions
                .remove_if(&session_id, |_, s| s.is_empty())
                .is_some();
        }

        info!(
            session_id = %session_id,
            connection_id = %connection_id,
            member_count = outcome.member_count,
            session_destroyed = outcome.session_destroyed,
            "Participant left session"
        );

        Some(outcome)
    }

    /// Drop sessions `connection_id` created but nobody ever joined
    pub fn discard_unclaimed(&self, connection_id: &ConnectionId) -> usize {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, s| !(s.is_empty() && s.created_by.as_ref() == Some(connection_id)));
        let removed = before.saturating_sub(self.sessions.len());

        if removed > 0 {
            debug!(connection_id = %connection_id, removed, "Discarded unclaimed sessions");
        }
        removed
    }

    /// Drop member-less sessions older than `ttl`
    pub fn sweep_unclaimed(&self, ttl: Duration) -> usize {
        let ttl = ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::MAX);
        let Some(cutoff) = Utc::now().checked_sub_signed(ttl) else {
            return 0;
        };

        let before = self.sessions.len();
        self.sessions
            .retain(|_, s| !(s.is_empty() && s.created_at <= cutoff));
        let removed = before.saturating_sub(self.sessions.len());

        if removed > 0 {
            info!(removed, "Swept unclaimed sessions");
        }
        removed
    }

    #[must_use]
    pub fn get_session(&self, session_id: &SessionId) -> Option<SessionSnapshot> {
        self.sessions.get(session_id).map(|s| SessionSnapshot {
            session_id: s.id.clone(),
            member_count: s.member_count(),
            capacity: s.capacity,
            created_at: s.created_at,
        })
    }

    #[must_use]
    pub fn session_exists(&self, session_id: &SessionId) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Session the connection currently belongs to
    #[must_use]
    pub fn session_of(&self, connection_id: &ConnectionId) -> Option<SessionId> {
        self.memberships.get(connection_id).map(|e| e.value().clone())
    }

    /// The connection's session and every other member of it
    #[must_use]
    pub fn peers_of(&self, connection_id: &ConnectionId) -> Option<(SessionId, Vec<ConnectionId>)> {
        let session_id = self.session_of(connection_id)?;
        let session = self.sessions.get(&session_id)?;
        if !session.contains(connection_id) {
            return None;
        }
        Some((session_id, session.others(connection_id)))
    }

    /// Whether both connections are members of the same session
    #[must_use]
    pub fn share_session(&self, a: &ConnectionId, b: &ConnectionId) -> bool {
        match (self.session_of(a), self.session_of(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    }

    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            live_sessions: self.sessions.len(),
            live_participants: self.memberships.len(),
        }
    }
}
