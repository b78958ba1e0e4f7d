//! Session and participant models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ConnectionId, SessionId};

/// Longest display name kept; anything beyond is cut off.
pub const MAX_DISPLAY_NAME_CHARS: usize = 64;

/// One connected party within a session
#[derive(Debug, Clone)]
pub struct Participant {
    pub connection_id: ConnectionId,
    pub display_name: String,
    pub joined_at: DateTime<Utc>,
    /// Whether the session was empty when this participant joined
    pub is_initiator: bool,
}

impl Participant {
    /// Create a participant, falling back to a positional label
    /// ("Participant 2") when no usable name was given.
    #[must_use]
    pub fn new(connection_id: ConnectionId, display_name: Option<&str>, position: usize) -> Self {
        let display_name = display_name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map_or_else(
                || format!("Participant {position}"),
                |name| name.chars().take(MAX_DISPLAY_NAME_CHARS).collect(),
            );

        Self {
            connection_id,
            display_name,
            joined_at: Utc::now(),
            is_initiator: false,
        }
    }

    #[must_use]
    pub fn initiator(mut self, is_initiator: bool) -> Self {
        self.is_initiator = is_initiator;
        self
    }

    #[must_use]
    pub fn info(&self) -> ParticipantInfo {
        ParticipantInfo {
            participant_id: self.connection_id.clone(),
            name: self.display_name.clone(),
            joined_at: self.joined_at,
        }
    }
}

/// Wire representation of a participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantInfo {
    pub participant_id: ConnectionId,
    pub name: String,
    pub joined_at: DateTime<Utc>,
}

/// A logical meeting context.
///
/// `participants` is kept in join order; the first entry is the member that
/// initiates negotiation with later joiners.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub participants: Vec<Participant>,
    pub capacity: usize,
    pub created_at: DateTime<Utc>,
    /// Connection that requested the session, if any
    pub created_by: Option<ConnectionId>,
    /// Joins so far, including members that have since left
    pub joins: usize,
}

impl Session {
    #[must_use]
    pub fn new(id: SessionId, capacity: usize) -> Self {
        Self {
            id,
            participants: Vec::new(),
            capacity,
            created_at: Utc::now(),
            created_by: None,
            joins: 0,
        }
    }

    #[must_use]
    pub fn with_creator(mut self, connection_id: ConnectionId) -> Self {
        self.created_by = Some(connection_id);
        self
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.participants.len() >= self.capacity
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    #[must_use]
    pub fn member_count(&self) -> usize {
        self.participants.len()
    }

    #[must_use]
    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.participants
            .iter()
            .any(|p| &p.connection_id == connection_id)
    }

    #[must_use]
    pub fn participant(&self, connection_id: &ConnectionId) -> Option<&Participant> {
        self.participants
            .iter()
            .find(|p| &p.connection_id == connection_id)
    }

    /// Whether `connection_id` joined as the negotiation initiator. The flag
    /// is fixed at join time and survives the departure of other members.
    #[must_use]
    pub fn is_initiator(&self, connection_id: &ConnectionId) -> bool {
        self.participant(connection_id).is_some_and(|p| p.is_initiator)
    }

    /// Admit a new participant, labelling it by join count when unnamed
    pub fn admit(&mut self, connection_id: ConnectionId, display_name: Option<&str>) -> &Participant {
        self.joins += 1;
        let participant = Participant::new(connection_id, display_name, self.joins)
            .initiator(self.participants.is_empty());
        self.participants.push(participant);
        &self.participants[self.participants.len() - 1]
    }

    /// Remove a participant, returning it if it was a member
    pub fn remove(&mut self, connection_id: &ConnectionId) -> Option<Participant> {
        let index = self
            .participants
            .iter()
            .position(|p| &p.connection_id == connection_id)?;
        Some(self.participants.remove(index))
    }

    #[must_use]
    pub fn members(&self) -> Vec<ParticipantInfo> {
        self.participants.iter().map(Participant::info).collect()
    }

    /// Every member except `connection_id`
    #[must_use]
    pub fn others(&self, connection_id: &ConnectionId) -> Vec<ConnectionId> {
        self.participants
            .iter()
            .filter(|p| &p.connection_id != connection_id)
            .map(|p| p.connection_id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_display_name() {
        let p = Participant::new(ConnectionId::from("c1"), None, 2);
        assert_eq!(p.display_name, "Participant 2");

        let p = Participant::new(ConnectionId::from("c1"), Some("   "), 1);
        assert_eq!(p.display_name, "Participant 1");

        let p = Participant::new(ConnectionId::from("c1"), Some(" Bob "), 1);
        assert_eq!(p.display_name, "Bob");
    }

    #[test]
    fn test_display_name_truncated() {
        let long = "x".repeat(200);
        let p = Participant::new(ConnectionId::from("c1"), Some(&long), 1);
        assert_eq!(p.display_name.chars().count(), MAX_DISPLAY_NAME_CHARS);
    }

    #[test]
    fn test_session_membership() {
        let mut session = Session::new(SessionId::from("abc123xy"), 2);
        assert!(session.is_empty());

        session.admit(ConnectionId::from("a"), Some("Alice"));
        session.admit(ConnectionId::from("b"), Some("Bob"));

        assert!(session.is_full());
        assert!(session.is_initiator(&ConnectionId::from("a")));
        assert!(!session.is_initiator(&ConnectionId::from("b")));
        assert_eq!(session.others(&ConnectionId::from("a")), vec![ConnectionId::from("b")]);

        let removed = session.remove(&ConnectionId::from("a")).unwrap();
        assert_eq!(removed.display_name, "Alice");
        assert!(session.remove(&ConnectionId::from("a")).is_none());
        assert_eq!(session.member_count(), 1);
    }

    #[test]
    fn test_admit_keeps_initiator_and_label_after_leave() {
        let mut session = Session::new(SessionId::from("abc123xy"), 2);
        session.admit(ConnectionId::from("a"), None);
        session.admit(ConnectionId::from("b"), None);
        session.remove(&ConnectionId::from("a"));

        assert!(!session.is_initiator(&ConnectionId::from("b")));

        let c = session.admit(ConnectionId::from("c"), None);
        assert_eq!(c.display_name, "Participant 3");
        assert!(!c.is_initiator);
        assert_eq!(session.joins, 3);
    }
}
