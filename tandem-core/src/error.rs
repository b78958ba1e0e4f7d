use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::SessionId;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("Session {session_id} is full (capacity {capacity})")]
    SessionFull { session_id: SessionId, capacity: usize },

    #[error("Connection already belongs to session {0}")]
    AlreadyInSession(SessionId),

    #[error("Session identifier space exhausted after {attempts} attempts")]
    IdSpaceExhausted { attempts: usize },

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable code sent to clients in `error` messages
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::SessionNotFound(_) => ErrorCode::SessionNotFound,
            Self::SessionFull { .. } => ErrorCode::SessionFull,
            Self::AlreadyInSession(_) => ErrorCode::AlreadyInSession,
            Self::InvalidMessage(_) | Self::Serialization(_) => ErrorCode::InvalidMessage,
            Self::IdSpaceExhausted { .. } | Self::Configuration(_) | Self::Internal(_) => {
                ErrorCode::Internal
            }
        }
    }

    /// Message shown to the user. Registry errors are actionable, everything
    /// else is reported generically.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::SessionNotFound(id) => {
                format!("Session {id} does not exist. Check the code or start a new session.")
            }
            Self::SessionFull { capacity, .. } => {
                format!("This session is full ({capacity} participants). Try again later.")
            }
            Self::AlreadyInSession(id) => {
                format!("You are already in session {id}. Leave it before joining another.")
            }
            Self::InvalidMessage(msg) => format!("Invalid message: {msg}"),
            Self::Serialization(e) => format!("Invalid message: {e}"),
            other => {
                tracing::error!("Internal error: {other}");
                "Internal server error".to_string()
            }
        }
    }
}

/// Wire-level error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    SessionNotFound,
    SessionFull,
    AlreadyInSession,
    InvalidMessage,
    Internal,
}

impl ErrorCode {
    /// Registry rejections end the join attempt and must not be retried
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::SessionNotFound | Self::SessionFull | Self::AlreadyInSession)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
