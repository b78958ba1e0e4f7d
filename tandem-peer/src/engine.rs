//! Peer connection seam
//!
//! The negotiation logic talks to a peer connection only through
//! [`RtcEngine`]. The production implementation wraps webrtc-rs
//! (see [`crate::rtc`]); tests plug in an in-memory one.

use async_trait::async_trait;
use std::sync::Arc;
use tandem_core::protocol::{IceCandidate, SessionDescription};
use tandem_core::ConnectionId;
use tokio::sync::mpsc;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

use crate::error::Result;
use crate::media::LocalTrack;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

impl From<TrackKind> for RTPCodecType {
    fn from(kind: TrackKind) -> Self {
        match kind {
            TrackKind::Audio => Self::Audio,
            TrackKind::Video => Self::Video,
        }
    }
}

impl TryFrom<RTPCodecType> for TrackKind {
    type Error = RTPCodecType;

    fn try_from(codec: RTPCodecType) -> std::result::Result<Self, Self::Error> {
        match codec {
            RTPCodecType::Audio => Ok(Self::Audio),
            RTPCodecType::Video => Ok(Self::Video),
            other => Err(other),
        }
    }
}

/// Transport-level connection state of one peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionStatus {
    /// The connection will not recover on its own
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }
}

impl From<RTCPeerConnectionState> for ConnectionStatus {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Connecting => Self::Connecting,
            RTCPeerConnectionState::Connected => Self::Connected,
            RTCPeerConnectionState::Disconnected => Self::Disconnected,
            RTCPeerConnectionState::Failed => Self::Failed,
            RTCPeerConnectionState::Closed => Self::Closed,
            RTCPeerConnectionState::New | RTCPeerConnectionState::Unspecified => Self::New,
        }
    }
}

/// Media arriving from the remote participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrackInfo {
    pub track_id: String,
    pub stream_id: String,
    pub kind: TrackKind,
}

/// Something the peer connection reported on its own
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    LocalCandidate(IceCandidate),
    RemoteTrack(RemoteTrackInfo),
    ConnectionState(ConnectionStatus),
}

/// An engine event tagged with the connection it came from
#[derive(Debug, Clone)]
pub struct EngineEnvelope {
    pub remote: ConnectionId,
    pub generation: u64,
    pub event: EngineEvent,
}

/// Callback sink handed to an engine at creation.
///
/// `generation` identifies the engine instance, so events from an engine
/// that has since been replaced can be told apart.
#[derive(Debug, Clone)]
pub struct EngineEvents {
    remote: ConnectionId,
    generation: u64,
    tx: mpsc::UnboundedSender<EngineEnvelope>,
}

impl EngineEvents {
    pub fn new(remote: ConnectionId, generation: u64, tx: mpsc::UnboundedSender<EngineEnvelope>) -> Self {
        Self { remote, generation, tx }
    }

    #[must_use]
    pub fn remote(&self) -> &ConnectionId {
        &self.remote
    }

    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns false once nobody is listening
    pub fn emit(&self, event: EngineEvent) -> bool {
        self.tx
            .send(EngineEnvelope {
                remote: self.remote.clone(),
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

/// One peer connection
#[async_trait]
pub trait RtcEngine: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    async fn add_track(&self, track: &LocalTrack) -> Result<()>;

    /// Swap the outgoing track of `kind` in place, without renegotiating.
    /// Returns false when no sender of that kind exists.
    async fn replace_track(&self, kind: TrackKind, track: &LocalTrack) -> Result<bool>;

    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait RtcEngineFactory: Send + Sync {
    /// Create the peer connection between `local` and `remote`
    async fn create(
        &self,
        local: &ConnectionId,
        remote: &ConnectionId,
        events: EngineEvents,
    ) -> Result<Arc<dyn RtcEngine>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ConnectionStatus::from(RTCPeerConnectionState::Connected), ConnectionStatus::Connected);
        assert_eq!(ConnectionStatus::from(RTCPeerConnectionState::Unspecified), ConnectionStatus::New);
        assert!(ConnectionStatus::Failed.is_terminal());
        assert!(!ConnectionStatus::Disconnected.is_terminal());
    }

    #[test]
    fn test_kind_conversion() {
        assert_eq!(TrackKind::try_from(RTPCodecType::Video), Ok(TrackKind::Video));
        assert!(TrackKind::try_from(RTPCodecType::Unspecified).is_err());
        assert_eq!(RTPCodecType::from(TrackKind::Audio), RTPCodecType::Audio);
    }

    #[test]
    fn test_events_are_tagged() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let events = EngineEvents::new(ConnectionId::from("peer"), 3, tx);
        assert!(events.emit(EngineEvent::ConnectionState(ConnectionStatus::Connecting)));

        let envelope = rx.try_recv().unwrap();
        assert_eq!(envelope.remote, ConnectionId::from("peer"));
        assert_eq!(envelope.generation, 3);

        drop(rx);
        assert!(!events.emit(EngineEvent::ConnectionState(ConnectionStatus::Closed)));
    }
}
