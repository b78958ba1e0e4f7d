//! webrtc-rs backed [`RtcEngine`]

use async_trait::async_trait;
use std::sync::Arc;
use tandem_core::protocol::{IceCandidate, SdpType, SessionDescription};
use tandem_core::ConnectionId;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_remote::TrackRemote;

use crate::config::{IceServer, PeerConfig};
use crate::engine::{
    ConnectionStatus, EngineEvent, EngineEvents, RemoteTrackInfo, RtcEngine, RtcEngineFactory,
    TrackKind,
};
use crate::error::{Error, Result};
use crate::media::LocalTrack;

/// Builds one `RTCPeerConnection` per remote participant
#[derive(Debug, Clone)]
pub struct WebRtcEngineFactory {
    ice_servers: Vec<IceServer>,
}

impl WebRtcEngineFactory {
    #[must_use]
    pub const fn new(ice_servers: Vec<IceServer>) -> Self {
        Self { ice_servers }
    }

    #[must_use]
    pub fn from_config(config: &PeerConfig) -> Self {
        Self::new(config.ice_servers.clone())
    }

    fn rtc_configuration(&self) -> RTCConfiguration {
        RTCConfiguration {
            ice_servers: self
                .ice_servers
                .iter()
                .map(|s| RTCIceServer {
                    urls: s.urls.clone(),
                    username: s.username.clone().unwrap_or_default(),
                    credential: s.credential.clone().unwrap_or_default(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl RtcEngineFactory for WebRtcEngineFactory {
    async fn create(
        &self,
        local: &ConnectionId,
        remote: &ConnectionId,
        events: EngineEvents,
    ) -> Result<Arc<dyn RtcEngine>> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(api.new_peer_connection(self.rtc_configuration()).await?);

        let candidate_events = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let events = candidate_events.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        events.emit(EngineEvent::LocalCandidate(IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_m_line_index: init.sdp_mline_index,
                            username_fragment: init.username_fragment,
                        }));
                    }
                    Err(e) => warn!(error = %e, "Failed to serialize local candidate"),
                }
            })
        }));

        let track_events = events.clone();
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>, _receiver: Arc<RTCRtpReceiver>, _transceiver: Arc<RTCRtpTransceiver>| {
                let Ok(kind) = TrackKind::try_from(track.kind()) else {
                    return Box::pin(async {});
                };
                track_events.emit(EngineEvent::RemoteTrack(RemoteTrackInfo {
                    track_id: track.id(),
                    stream_id: track.stream_id(),
                    kind,
                }));
                Box::pin(async {})
            },
        ));

        let state_events = events;
        let remote_id = remote.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            debug!(remote = %remote_id, state = %state, "Peer connection state changed");
            state_events.emit(EngineEvent::ConnectionState(ConnectionStatus::from(state)));
            Box::pin(async {})
        }));

        info!(local = %local, remote = %remote, "Peer connection created");
        Ok(Arc::new(WebRtcEngine { pc }))
    }
}

pub struct WebRtcEngine {
    pc: Arc<RTCPeerConnection>,
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription> {
    let desc = match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp)?,
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp)?,
        SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp)?,
        SdpType::Rollback => {
            return Err(Error::Negotiation("rollback is not supported".to_string()));
        }
    };
    Ok(desc)
}

fn from_rtc(desc: RTCSessionDescription) -> Result<SessionDescription> {
    let sdp_type = match desc.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        RTCSdpType::Unspecified => {
            return Err(Error::Negotiation("description has no type".to_string()));
        }
    };
    Ok(SessionDescription { sdp_type, sdp: desc.sdp })
}

#[async_trait]
impl RtcEngine for WebRtcEngine {
    async fn create_offer(&self) -> Result<SessionDescription> {
        from_rtc(self.pc.create_offer(None).await?)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        from_rtc(self.pc.create_answer(None).await?)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc.set_local_description(to_rtc(desc)?).await?;
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc.set_remote_description(to_rtc(desc)?).await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_m_line_index,
                username_fragment: candidate.username_fragment,
            })
            .await?;
        Ok(())
    }

    async fn add_track(&self, track: &LocalTrack) -> Result<()> {
        let sender = self.pc.add_track(track.rtp_track()).await?;

        // RTCP has to be drained for the interceptors to work
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });
        Ok(())
    }

    async fn replace_track(&self, kind: TrackKind, track: &LocalTrack) -> Result<bool> {
        let wanted = kind.into();
        for sender in self.pc.get_senders().await {
            let Some(current) = sender.track().await else {
                continue;
            };
            if current.kind() == wanted {
                sender.replace_track(Some(track.rtp_track())).await?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn close(&self) -> Result<()> {
        self.pc.close().await?;
        Ok(())
    }
}
