//! Shared harness: an in-process signaling server and an in-memory network of
//! fake peer connections

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tandem_core::protocol::{IceCandidate, SessionDescription};
use tandem_core::service::{SessionRegistry, SignalingService};
use tandem_core::{Config, ConnectionId, SessionId};
use tandem_peer::{
    CallEvent, ConnectionStatus, EngineEvent, EngineEvents, Error, LocalTrack, PeerConfig,
    ReconnectConfig, RemoteTrackInfo, Result, RtcEngine, RtcEngineFactory, TrackKind,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Start the HTTP/WebSocket server on an ephemeral port. Every created
/// session gets `session_id`.
pub async fn start_server(session_id: &'static str) -> (String, SignalingService) {
    let config = Config::default();
    let registry = SessionRegistry::with_id_generator(
        config.session.clone(),
        Box::new(move |_| SessionId::from(session_id)),
    );
    let signaling = SignalingService::with_registry(Arc::new(registry));
    let router = tandem_api::create_router(Arc::new(config), signaling.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (format!("ws://{addr}/ws"), signaling)
}

pub fn peer_config(url: &str) -> PeerConfig {
    PeerConfig {
        signaling_url: url.to_string(),
        ice_servers: vec![],
        reconnect: ReconnectConfig {
            min_delay_ms: 10,
            max_delay_ms: 100,
            jitter: false,
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Wait for the first event `pick` accepts, skipping the rest
pub async fn expect<T>(
    events: &mut mpsc::UnboundedReceiver<CallEvent>,
    mut pick: impl FnMut(&CallEvent) -> Option<T>,
) -> T {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let event = tokio::time::timeout_at(deadline, events.recv())
            .await
            .expect("timed out waiting for call event")
            .expect("call session ended");
        if let Some(found) = pick(&event) {
            return found;
        }
    }
}

#[derive(Default)]
struct EngineState {
    calls: Vec<&'static str>,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    audio_track: Option<String>,
    video_track: Option<String>,
    offers_created: usize,
    connected: bool,
    closed: bool,
}

/// Peer connection stand-in. Two engines for the same pair of participants
/// find each other through the network and "connect" once both have their
/// descriptions in place.
pub struct FakeEngine {
    local: ConnectionId,
    remote: ConnectionId,
    events: EngineEvents,
    network: FakeNetwork,
    state: Mutex<EngineState>,
}

impl FakeEngine {
    pub fn calls(&self) -> Vec<&'static str> {
        self.state.lock().calls.clone()
    }

    pub fn offers_created(&self) -> usize {
        self.state.lock().offers_created
    }

    pub fn video_track(&self) -> Option<String> {
        self.state.lock().video_track.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn record(&self, call: &'static str) {
        self.state.lock().calls.push(call);
    }

    fn local_tracks(&self) -> Vec<RemoteTrackInfo> {
        let state = self.state.lock();
        let mut tracks = Vec::new();
        if let Some(id) = &state.audio_track {
            tracks.push(self.track_info(id, TrackKind::Audio));
        }
        if let Some(id) = &state.video_track {
            tracks.push(self.track_info(id, TrackKind::Video));
        }
        tracks
    }

    fn track_info(&self, id: &str, kind: TrackKind) -> RemoteTrackInfo {
        RemoteTrackInfo {
            track_id: id.to_string(),
            stream_id: self.local.to_string(),
            kind,
        }
    }

    fn maybe_connect(&self) {
        {
            let mut state = self.state.lock();
            if state.connected || state.local.is_none() || state.remote.is_none() {
                return;
            }
            state.connected = true;
        }

        self.events
            .emit(EngineEvent::ConnectionState(ConnectionStatus::Connected));
        if let Some(peer) = self.network.engine(&self.remote, &self.local) {
            for track in self.local_tracks() {
                peer.events.emit(EngineEvent::RemoteTrack(track));
            }
        }
    }
}

#[async_trait]
impl RtcEngine for FakeEngine {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let mut state = self.state.lock();
        state.calls.push("create_offer");
        state.offers_created += 1;
        Ok(SessionDescription::offer(format!("v=0 offer from {}", self.local)))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let mut state = self.state.lock();
        state.calls.push("create_answer");
        if state.remote.is_none() {
            return Err(Error::Negotiation("answer requested before remote offer".into()));
        }
        Ok(SessionDescription::answer(format!("v=0 answer from {}", self.local)))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        {
            let mut state = self.state.lock();
            state.calls.push("set_local");
            state.local = Some(desc);
        }
        self.events.emit(EngineEvent::LocalCandidate(IceCandidate {
            candidate: format!("candidate:1 1 UDP 2130706431 127.0.0.1 5000 typ host ufrag {}", self.local),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
            username_fragment: None,
        }));
        self.maybe_connect();
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        {
            let mut state = self.state.lock();
            state.calls.push("set_remote");
            state.remote = Some(desc);
        }
        self.maybe_connect();
        Ok(())
    }

    async fn add_ice_candidate(&self, _candidate: IceCandidate) -> Result<()> {
        self.record("add_candidate");
        Ok(())
    }

    async fn add_track(&self, track: &LocalTrack) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push("add_track");
        match track.kind() {
            TrackKind::Audio => state.audio_track = Some(track.id().to_string()),
            TrackKind::Video => state.video_track = Some(track.id().to_string()),
        }
        Ok(())
    }

    async fn replace_track(&self, kind: TrackKind, track: &LocalTrack) -> Result<bool> {
        let connected = {
            let mut state = self.state.lock();
            state.calls.push("replace_track");
            let slot = match kind {
                TrackKind::Audio => &mut state.audio_track,
                TrackKind::Video => &mut state.video_track,
            };
            if slot.is_none() {
                return Ok(false);
            }
            *slot = Some(track.id().to_string());
            state.connected
        };

        // The remote side simply sees the new track start flowing
        if connected {
            if let Some(peer) = self.network.engine(&self.remote, &self.local) {
                peer.events
                    .emit(EngineEvent::RemoteTrack(self.track_info(track.id(), kind)));
            }
        }
        Ok(true)
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push("close");
        state.closed = true;
        Ok(())
    }
}

/// Every engine created by any client in the test, keyed by (local, remote)
#[derive(Clone, Default)]
pub struct FakeNetwork {
    engines: Arc<Mutex<HashMap<(ConnectionId, ConnectionId), Arc<FakeEngine>>>>,
}

impl FakeNetwork {
    pub fn engine(&self, local: &ConnectionId, remote: &ConnectionId) -> Option<Arc<FakeEngine>> {
        self.engines
            .lock()
            .get(&(local.clone(), remote.clone()))
            .cloned()
    }
}

#[async_trait]
impl RtcEngineFactory for FakeNetwork {
    async fn create(
        &self,
        local: &ConnectionId,
        remote: &ConnectionId,
        events: EngineEvents,
    ) -> Result<Arc<dyn RtcEngine>> {
        let engine = Arc::new(FakeEngine {
            local: local.clone(),
            remote: remote.clone(),
            events,
            network: self.clone(),
            state: Mutex::new(EngineState::default()),
        });
        self.engines
            .lock()
            .insert((local.clone(), remote.clone()), engine.clone());
        Ok(engine)
    }
}
