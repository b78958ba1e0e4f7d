//! Call session actor
//!
//! One task owns the signaling channel, the local media and a
//! [`PeerController`] per remote participant. It reacts to server messages,
//! engine callbacks, user commands and a stall-check ticker, and reports
//! everything the presentation layer needs as [`CallEvent`]s.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tandem_core::models::ParticipantInfo;
use tandem_core::protocol::{ClientMessage, IceCandidate, ServerMessage, SessionDescription};
use tandem_core::{ConnectionId, SessionId};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::{ChannelEvent, SignalingChannel};
use crate::config::PeerConfig;
use crate::controller::PeerController;
use crate::engine::{
    ConnectionStatus, EngineEnvelope, EngineEvent, EngineEvents, RemoteTrackInfo, RtcEngineFactory,
};
use crate::error::{Error, Result};
use crate::media::{LocalTrack, MediaDevices, MediaSourceManager, SampleTrackDevices};
use crate::negotiation::NegotiationState;
use crate::rtc::WebRtcEngineFactory;

const COMMAND_BUFFER: usize = 32;
const STALL_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Everything the presentation layer observes
#[derive(Debug, Clone)]
pub enum CallEvent {
    SessionCreated {
        session_id: SessionId,
    },
    SessionJoined {
        session_id: SessionId,
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
    RemoteTrack {
        participant_id: ConnectionId,
        track: RemoteTrackInfo,
    },
    /// The remote media surface for this participant is gone
    RemoteMediaRemoved {
        participant_id: ConnectionId,
    },
    NegotiationStateChanged {
        participant_id: ConnectionId,
        state: NegotiationState,
    },
    ConnectionStatus {
        participant_id: ConnectionId,
        status: ConnectionStatus,
    },
    StatusUpdate {
        sender_id: ConnectionId,
        status: String,
    },
    SignalingDisconnected {
        reason: String,
    },
    SignalingReconnected,
    Error(Error),
}

enum CallCommand {
    CreateSession {
        name: Option<String>,
        reply: oneshot::Sender<Result<()>>,
    },
    JoinSession {
        session_id: SessionId,
        name: Option<String>,
        reply: oneshot::Sender<Result<()>>,
    },
    Leave {
        reply: oneshot::Sender<()>,
    },
    ToggleAudio {
        reply: oneshot::Sender<Option<bool>>,
    },
    ToggleVideo {
        reply: oneshot::Sender<Option<bool>>,
    },
    StartScreenShare {
        reply: oneshot::Sender<Result<LocalTrack>>,
    },
    StopScreenShare {
        reply: oneshot::Sender<bool>,
    },
    SendStatus {
        status: String,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Handle to a running call. Dropping every handle ends the call.
#[derive(Clone)]
pub struct CallHandle {
    commands: mpsc::Sender<CallCommand>,
}

impl CallHandle {
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> CallCommand) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(build(tx)).await.map_err(|_| Error::Closed)?;
        rx.await.map_err(|_| Error::Closed)
    }

    /// Acquire local media and ask the server for a new session. The
    /// session is joined as soon as it has been created.
    pub async fn create_session(&self, display_name: Option<String>) -> Result<()> {
        self.request(|reply| CallCommand::CreateSession {
            name: display_name,
            reply,
        })
        .await?
    }

    /// Acquire local media and join an existing session
    pub async fn join_session(&self, session_id: SessionId, display_name: Option<String>) -> Result<()> {
        self.request(|reply| CallCommand::JoinSession {
            session_id,
            name: display_name,
            reply,
        })
        .await?
    }

    /// Leave the session, close every peer connection and release media
    pub async fn leave(&self) -> Result<()> {
        self.request(|reply| CallCommand::Leave { reply }).await
    }

    /// Returns the new enabled state, or `None` without local media
    pub async fn toggle_audio(&self) -> Result<Option<bool>> {
        self.request(|reply| CallCommand::ToggleAudio { reply }).await
    }

    pub async fn toggle_video(&self) -> Result<Option<bool>> {
        self.request(|reply| CallCommand::ToggleVideo { reply }).await
    }

    /// Replace the outgoing video with a screen capture. Ending the returned
    /// track reverts to the camera.
    pub async fn start_screen_share(&self) -> Result<LocalTrack> {
        self.request(|reply| CallCommand::StartScreenShare { reply })
            .await?
    }

    /// Returns false when no share was active
    pub async fn stop_screen_share(&self) -> Result<bool> {
        self.request(|reply| CallCommand::StopScreenShare { reply }).await
    }

    pub async fn send_status(&self, status: impl Into<String>) -> Result<()> {
        let status = status.into();
        self.request(|reply| CallCommand::SendStatus { status, reply })
            .await?
    }
}

enum Request {
    Create { name: Option<String> },
    Join { session_id: SessionId, name: Option<String> },
}

impl Request {
    fn message(&self) -> ClientMessage {
        match self {
            Self::Create { .. } => ClientMessage::CreateSession,
            Self::Join { session_id, name } => ClientMessage::JoinSession {
                session_id: session_id.clone(),
                display_name: name.clone(),
            },
        }
    }
}

struct Membership {
    session_id: SessionId,
    participant_id: ConnectionId,
    display_name: Option<String>,
}

pub struct CallSession {
    config: PeerConfig,
    factory: Arc<dyn RtcEngineFactory>,
    media: MediaSourceManager,
    channel: SignalingChannel,
    events: mpsc::UnboundedSender<CallEvent>,
    engine_tx: mpsc::UnboundedSender<EngineEnvelope>,
    peers: HashMap<ConnectionId, PeerController>,
    request: Option<Request>,
    membership: Option<Membership>,
    connected: bool,
    ever_connected: bool,
    next_generation: u64,
}

impl CallSession {
    /// Connect to the signaling server and start the call task
    pub fn spawn(
        config: PeerConfig,
        factory: Arc<dyn RtcEngineFactory>,
        devices: Arc<dyn MediaDevices>,
    ) -> Result<(CallHandle, mpsc::UnboundedReceiver<CallEvent>)> {
        let (channel, channel_events) =
            SignalingChannel::connect(&config.signaling_url, config.reconnect.clone())?;
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();

        let session = Self {
            media: MediaSourceManager::new(devices, config.media.clone()),
            config,
            factory,
            channel,
            events: events_tx,
            engine_tx,
            peers: HashMap::new(),
            request: None,
            membership: None,
            connected: false,
            ever_connected: false,
            next_generation: 0,
        };

        tokio::spawn(session.run(commands_rx, channel_events, engine_rx));

        Ok((CallHandle { commands: commands_tx }, events_rx))
    }

    /// [`spawn`](Self::spawn) with webrtc-rs peer connections and
    /// application-fed sample tracks
    pub fn spawn_default(config: PeerConfig) -> Result<(CallHandle, mpsc::UnboundedReceiver<CallEvent>)> {
        let factory = Arc::new(WebRtcEngineFactory::from_config(&config));
        Self::spawn(config, factory, Arc::new(SampleTrackDevices::default()))
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<CallCommand>,
        mut channel_events: mpsc::UnboundedReceiver<ChannelEvent>,
        mut engine_events: mpsc::UnboundedReceiver<EngineEnvelope>,
    ) {
        let mut stall_check = tokio::time::interval(STALL_CHECK_INTERVAL);
        stall_check.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },

                event = channel_events.recv() => match event {
                    Some(event) => self.handle_channel_event(event).await,
                    None => break,
                },

                Some(envelope) = engine_events.recv() => self.handle_engine_event(envelope).await,

                () = wait_ended(self.media.screen_ended()) => {
                    info!("Screen share ended outside the call");
                    self.stop_screen_share().await;
                }

                _ = stall_check.tick() => self.check_stalled().await,
            }
        }

        self.shutdown().await;
    }

    fn emit(&self, event: CallEvent) {
        let _ = self.events.send(event);
    }

    fn send(&self, message: ClientMessage) {
        if let Err(e) = self.channel.send(message) {
            warn!(error = %e, "Signaling channel unavailable");
        }
    }

    fn report(&self, err: Error) {
        self.emit(CallEvent::Error(err));
    }

    async fn handle_command(&mut self, command: CallCommand) {
        match command {
            CallCommand::CreateSession { name, reply } => {
                let result = self.begin(Request::Create { name }).await;
                let _ = reply.send(result);
            }
            CallCommand::JoinSession {
                session_id,
                name,
                reply,
            } => {
                let result = self.begin(Request::Join { session_id, name }).await;
                let _ = reply.send(result);
            }
            CallCommand::Leave { reply } => {
                self.leave().await;
                let _ = reply.send(());
            }
            CallCommand::ToggleAudio { reply } => {
                let _ = reply.send(self.media.toggle_audio());
            }
            CallCommand::ToggleVideo { reply } => {
                let _ = reply.send(self.media.toggle_video());
            }
            CallCommand::StartScreenShare { reply } => {
                let result = self.start_screen_share().await;
                let _ = reply.send(result);
            }
            CallCommand::StopScreenShare { reply } => {
                let _ = reply.send(self.stop_screen_share().await);
            }
            CallCommand::SendStatus { status, reply } => {
                let result = if self.membership.is_some() {
                    self.channel.send(ClientMessage::StatusUpdate { status })
                } else {
                    Err(Error::InvalidState("not in a session".to_string()))
                };
                let _ = reply.send(result);
            }
        }
    }

    /// Start a create or join attempt. Local media comes first; without it
    /// the attempt never reaches the server.
    async fn begin(&mut self, request: Request) -> Result<()> {
        if self.membership.is_some() || self.request.is_some() {
            return Err(Error::InvalidState("already in a session".to_string()));
        }

        if let Err(e) = self.media.acquire().await {
            warn!(error = %e, "Local media unavailable");
            let err = Error::MediaAcquisition(e);
            self.report(err.clone());
            return Err(err);
        }

        if self.connected {
            self.send(request.message());
        }
        self.request = Some(request);
        Ok(())
    }

    async fn leave(&mut self) {
        if self.membership.take().is_some() {
            self.send(ClientMessage::LeaveSession);
        }
        self.request = None;
        self.close_all_peers().await;
        self.media.release();
    }

    async fn start_screen_share(&mut self) -> Result<LocalTrack> {
        let screen = self.media.start_screen_share().await?;
        self.replace_outgoing_video(&screen).await;
        Ok(screen)
    }

    async fn stop_screen_share(&mut self) -> bool {
        let Some(camera) = self.media.stop_screen_share() else {
            return false;
        };
        self.replace_outgoing_video(&camera).await;
        true
    }

    async fn replace_outgoing_video(&self, track: &LocalTrack) {
        for peer in self.peers.values() {
            if let Err(e) = peer.replace_video(track).await {
                warn!(remote = %peer.remote(), error = %e, "Failed to replace outgoing video");
            }
        }
    }

    async fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Connected => {
                self.connected = true;
                if self.ever_connected {
                    self.resume().await;
                } else if let Some(request) = &self.request {
                    self.send(request.message());
                }
                self.ever_connected = true;
            }
            ChannelEvent::Disconnected(reason) => {
                self.connected = false;
                self.emit(CallEvent::SignalingDisconnected { reason });
            }
            ChannelEvent::Message(message) => self.handle_server_message(message).await,
        }
    }

    /// After a reconnect: negotiations in flight are abandoned and presence
    /// is reconfirmed under the new connection
    async fn resume(&mut self) {
        info!("Signaling reconnected");
        self.emit(CallEvent::SignalingReconnected);
        self.close_all_peers().await;

        if let Some(membership) = self.membership.take() {
            self.request = Some(Request::Join {
                session_id: membership.session_id,
                name: membership.display_name,
            });
        }
        if let Some(request) = &self.request {
            self.send(request.message());
        }
    }

    async fn handle_server_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::SessionCreated { session_id } => {
                let name = match self.request.take() {
                    Some(Request::Create { name }) => name,
                    other => {
                        self.request = other;
                        debug!(session_id = %session_id, "Unexpected session-created");
                        return;
                    }
                };
                info!(session_id = %session_id, "Session created");
                self.emit(CallEvent::SessionCreated {
                    session_id: session_id.clone(),
                });

                let request = Request::Join { session_id, name };
                self.send(request.message());
                self.request = Some(request);
            }

            ServerMessage::SessionJoined {
                session_id,
                participant_id,
                members,
                is_initiator,
            } => {
                let display_name = match self.request.take() {
                    Some(Request::Join { name, .. }) => name,
                    _ => None,
                };
                info!(
                    session_id = %session_id,
                    participant_id = %participant_id,
                    members = members.len(),
                    is_initiator,
                    "Joined session"
                );
                self.membership = Some(Membership {
                    session_id: session_id.clone(),
                    participant_id: participant_id.clone(),
                    display_name,
                });
                self.emit(CallEvent::SessionJoined {
                    session_id,
                    participant_id,
                    members,
                    is_initiator,
                });
            }

            ServerMessage::MemberJoined {
                participant_id,
                name,
                member_count,
            } => {
                self.emit(CallEvent::MemberJoined {
                    participant_id: participant_id.clone(),
                    name,
                    member_count,
                });
                self.offer_to(&participant_id).await;
            }

            ServerMessage::MemberLeft {
                participant_id,
                name,
                member_count,
            } => {
                self.emit(CallEvent::MemberLeft {
                    participant_id: participant_id.clone(),
                    name,
                    member_count,
                });
                self.remove_peer(&participant_id, None).await;
            }

            ServerMessage::Offer {
                sdp_payload,
                sender_id,
            } => self.answer(&sender_id, sdp_payload).await,

            ServerMessage::Answer {
                sdp_payload,
                sender_id,
            } => self.accept_answer(&sender_id, sdp_payload).await,

            ServerMessage::IceCandidate {
                candidate_payload,
                sender_id,
            } => self.remote_candidate(&sender_id, candidate_payload).await,

            ServerMessage::StatusUpdate { status, sender_id } => {
                self.emit(CallEvent::StatusUpdate { sender_id, status });
            }

            ServerMessage::Error { code, message } => {
                warn!(code = ?code, message = %message, "Server rejected request");
                if code.is_terminal() {
                    self.request = None;
                }
                self.report(Error::Session { code, message });
            }
        }
    }

    /// Create the controller for `remote` if needed and attach local media
    async fn ensure_peer(&mut self, remote: &ConnectionId) -> Result<&mut PeerController> {
        if !self.peers.contains_key(remote) {
            let local = self
                .membership
                .as_ref()
                .map(|m| m.participant_id.clone())
                .ok_or_else(|| Error::InvalidState("not in a session".to_string()))?;

            self.next_generation += 1;
            let events = EngineEvents::new(remote.clone(), self.next_generation, self.engine_tx.clone());
            let engine = self.factory.create(&local, remote, events).await?;
            let peer = PeerController::new(
                remote.clone(),
                engine,
                self.next_generation,
                self.config.negotiation_timeout(),
            );
            self.peers.insert(remote.clone(), peer);
        }

        let peer = self
            .peers
            .get_mut(remote)
            .ok_or_else(|| Error::InvalidState(format!("no connection for {remote}")))?;
        if !peer.has_media() {
            if let (Some(audio), Some(video)) = (self.media.audio(), self.media.outgoing_video()) {
                peer.attach_media(audio, video).await?;
            }
        }
        Ok(peer)
    }

    fn state_changed(&self, remote: &ConnectionId, state: NegotiationState) {
        self.emit(CallEvent::NegotiationStateChanged {
            participant_id: remote.clone(),
            state,
        });
    }

    /// A new member arrived: offer once our side is ready
    async fn offer_to(&mut self, remote: &ConnectionId) {
        let result = match self.ensure_peer(remote).await {
            Ok(peer) if peer.is_ready_to_offer() => peer.start_offer().await.map(Some),
            Ok(_) => Ok(None),
            Err(e) => Err(e),
        };
        self.after_step(remote, result).await;
    }

    async fn answer(&mut self, remote: &ConnectionId, offer: SessionDescription) {
        let result = match self.ensure_peer(remote).await {
            Ok(peer) => peer.handle_offer(offer).await.map(Some),
            Err(e) => Err(e),
        };
        self.after_step(remote, result).await;
    }

    async fn accept_answer(&mut self, remote: &ConnectionId, answer: SessionDescription) {
        let Some(peer) = self.peers.get_mut(remote) else {
            debug!(remote = %remote, "Answer for unknown connection ignored");
            return;
        };
        let result = peer.handle_answer(answer).await.map(|()| Some(Vec::new()));
        self.after_step(remote, result).await;
    }

    /// Candidates only feed an existing connection; one is created by a
    /// member arriving or an offer, never by trickle
    async fn remote_candidate(&mut self, remote: &ConnectionId, candidate: IceCandidate) {
        let Some(peer) = self.peers.get_mut(remote) else {
            debug!(remote = %remote, "Candidate for unknown connection dropped");
            return;
        };
        if let Err(e) = peer.add_remote_candidate(candidate).await {
            warn!(remote = %remote, error = %e, "Remote candidate rejected");
            self.report(e);
        }
    }

    /// Send what a negotiation step produced and report where it left the
    /// controller. `Ok(None)` means no step was taken.
    async fn after_step(&mut self, remote: &ConnectionId, result: Result<Option<Vec<ClientMessage>>>) {
        match result {
            Ok(Some(messages)) => {
                for message in messages {
                    self.send(message);
                }
            }
            Ok(None) => return,
            Err(e) => {
                warn!(remote = %remote, error = %e, "Negotiation step failed");
                self.report(e);
            }
        }

        let Some(state) = self.peers.get(remote).map(PeerController::state) else {
            return;
        };
        if state == NegotiationState::Failed {
            self.remove_peer(remote, Some("negotiation failed")).await;
        } else {
            self.state_changed(remote, state);
        }
    }

    async fn handle_engine_event(&mut self, envelope: EngineEnvelope) {
        let EngineEnvelope {
            remote,
            generation,
            event,
        } = envelope;

        let Some(peer) = self.peers.get_mut(&remote) else {
            return;
        };
        if peer.generation() != generation {
            debug!(remote = %remote, generation, "Event from replaced connection ignored");
            return;
        }

        match event {
            EngineEvent::LocalCandidate(candidate) => {
                if let Some(message) = peer.on_local_candidate(candidate) {
                    self.send(message);
                }
            }
            EngineEvent::RemoteTrack(track) => {
                debug!(remote = %remote, track = %track.track_id, kind = track.kind.as_str(), "Remote track");
                self.emit(CallEvent::RemoteTrack {
                    participant_id: remote,
                    track,
                });
            }
            EngineEvent::ConnectionState(status) => {
                self.emit(CallEvent::ConnectionStatus {
                    participant_id: remote.clone(),
                    status,
                });
                match status {
                    ConnectionStatus::Failed => {
                        self.remove_peer(&remote, Some("peer connection failed")).await;
                    }
                    ConnectionStatus::Closed => self.remove_peer(&remote, None).await,
                    _ => {}
                }
            }
        }
    }

    async fn check_stalled(&mut self) {
        let now = Instant::now();
        let stalled: Vec<ConnectionId> = self
            .peers
            .values()
            .filter(|peer| peer.is_stalled(now))
            .map(|peer| peer.remote().clone())
            .collect();

        for remote in stalled {
            warn!(remote = %remote, "Negotiation stalled");
            self.report(Error::Negotiation(format!(
                "negotiation with {remote} timed out"
            )));
            self.remove_peer(&remote, Some("negotiation timed out")).await;
        }
    }

    /// Tear down the connection to `remote`, failing it when a reason is
    /// given and closing it otherwise
    async fn remove_peer(&mut self, remote: &ConnectionId, failure: Option<&str>) {
        let Some(mut peer) = self.peers.remove(remote) else {
            return;
        };
        match failure {
            Some(reason) => peer.fail(reason).await,
            None => peer.close().await,
        }
        info!(remote = %remote, state = %peer.state(), "Peer connection removed");
        self.emit(CallEvent::RemoteMediaRemoved {
            participant_id: remote.clone(),
        });
        self.state_changed(remote, peer.state());
    }

    async fn close_all_peers(&mut self) {
        let remotes: Vec<ConnectionId> = self.peers.keys().cloned().collect();
        for remote in remotes {
            self.remove_peer(&remote, None).await;
        }
    }

    async fn shutdown(&mut self) {
        self.close_all_peers().await;
        self.media.release();
        self.channel.close();
        info!("Call session stopped");
    }
}

async fn wait_ended(token: Option<CancellationToken>) {
    match token {
        Some(token) => token.cancelled_owned().await,
        None => std::future::pending().await,
    }
}
