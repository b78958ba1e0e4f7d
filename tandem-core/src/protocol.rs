//! Signaling wire protocol
//!
//! Every frame is a JSON object tagged by `type`. Type names are kebab-case
//! (`join-session`, `member-left`), fields are camelCase.
//!
//! Negotiation payloads (`SessionDescription`, `IceCandidate`) are carried
//! verbatim; the server only looks at the routing fields around them.

use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::models::{ConnectionId, ParticipantInfo, SessionId};

/// Session description type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

impl SdpType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::Pranswer => "pranswer",
            Self::Rollback => "rollback",
        }
    }
}

/// Session description (SDP)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self { sdp_type: SdpType::Offer, sdp: sdp.into() }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self { sdp_type: SdpType::Answer, sdp: sdp.into() }
    }
}

/// Connectivity candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// Messages sent by clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Request a new session identifier
    CreateSession,
    /// Request membership of an existing session
    JoinSession {
        session_id: SessionId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        display_name: Option<String>,
    },
    /// Explicitly leave the current session
    LeaveSession,
    Offer {
        sdp_payload: SessionDescription,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_id: Option<ConnectionId>,
    },
    Answer {
        sdp_payload: SessionDescription,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_id: Option<ConnectionId>,
    },
    IceCandidate {
        candidate_payload: IceCandidate,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_id: Option<ConnectionId>,
    },
    /// Presence hint relayed to every other member of the session
    StatusUpdate { status: String },
}

impl ClientMessage {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::CreateSession => "create-session",
            Self::JoinSession { .. } => "join-session",
            Self::LeaveSession => "leave-session",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::IceCandidate { .. } => "ice-candidate",
            Self::StatusUpdate { .. } => "status-update",
        }
    }
}

/// Messages sent by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    SessionCreated {
        session_id: SessionId,
    },
    SessionJoined {
        session_id: SessionId,
        /// Identifier the server assigned to the receiving connection
        participant_id: ConnectionId,
        members: Vec<ParticipantInfo>,
        is_initiator: bool,
    },
    MemberJoined {
        participant_id: ConnectionId,
        name: String,
        member_count: usize,
    },
    MemberLeft {
        participant_id: ConnectionId,
        name: String,
        member_count: usize,
    },
    Offer {
        sdp_payload: SessionDescription,
        sender_id: ConnectionId,
    },
    Answer {
        sdp_payload: SessionDescription,
        sender_id: ConnectionId,
    },
    IceCandidate {
        candidate_payload: IceCandidate,
        sender_id: ConnectionId,
    },
    StatusUpdate {
        status: String,
        sender_id: ConnectionId,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
}

impl ServerMessage {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::SessionCreated { .. } => "session-created",
            Self::SessionJoined { .. } => "session-joined",
            Self::MemberJoined { .. } => "member-joined",
            Self::MemberLeft { .. } => "member-left",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::IceCandidate { .. } => "ice-candidate",
            Self::StatusUpdate { .. } => "status-update",
            Self::Error { .. } => "error",
        }
    }

    /// Build an `error` message for a failed request
    #[must_use]
    pub fn from_error(err: &crate::Error) -> Self {
        Self::Error {
            code: err.code(),
            message: err.user_message(),
        }
    }
}

/// Decode a client text frame
pub fn decode_client(text: &str) -> crate::Result<ClientMessage> {
    serde_json::from_str(text).map_err(|e| crate::Error::InvalidMessage(e.to_string()))
}

/// Decode a server text frame
pub fn decode_server(text: &str) -> crate::Result<ServerMessage> {
    serde_json::from_str(text).map_err(|e| crate::Error::InvalidMessage(e.to_string()))
}

/// Encode any protocol message as a text frame
pub fn encode<T: Serialize>(message: &T) -> crate::Result<String> {
    Ok(serde_json::to_string(message)?)
}
