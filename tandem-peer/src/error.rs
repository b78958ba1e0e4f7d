use tandem_core::ErrorCode;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Signaling transport error: {0}")]
    Transport(String),

    #[error("Media acquisition failed: {0}")]
    MediaAcquisition(#[from] MediaError),

    #[error("Negotiation error: {0}")]
    Negotiation(String),

    /// Rejection reported by the signaling server
    #[error("{message}")]
    Session { code: ErrorCode, message: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Call session closed")]
    Closed,
}

impl Error {
    /// Whether the error ends the current join attempt
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        match self {
            Self::Session { code, .. } => code.is_terminal(),
            Self::MediaAcquisition(_) | Self::Closed => true,
            Self::Transport(_) | Self::Negotiation(_) | Self::InvalidState(_) => false,
        }
    }
}

impl From<webrtc::Error> for Error {
    fn from(err: webrtc::Error) -> Self {
        Self::Negotiation(err.to_string())
    }
}

/// Why local capture could not be started
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("Camera or microphone permission was denied. Allow access and try again.")]
    PermissionDenied,

    #[error("No camera or microphone was found. Connect a device and try again.")]
    DeviceNotFound,

    #[error("Could not start capture: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
