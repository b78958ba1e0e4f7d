//! Per-participant negotiation driver
//!
//! A `PeerController` owns one peer connection and walks it through the
//! [`NegotiationState`] machine. It never touches the signaling channel
//! itself: every operation returns the messages that should be sent, and the
//! caller sends them in order.

use std::sync::Arc;
use std::time::Duration;
use tandem_core::protocol::{ClientMessage, IceCandidate, SessionDescription};
use tandem_core::ConnectionId;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::engine::{RtcEngine, TrackKind};
use crate::error::{Error, Result};
use crate::media::LocalTrack;
use crate::negotiation::{NegotiationEvent, NegotiationState};

pub struct PeerController {
    remote: ConnectionId,
    engine: Arc<dyn RtcEngine>,
    generation: u64,
    state: NegotiationState,
    media_attached: bool,
    engine_closed: bool,
    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,
    /// Remote candidates that arrived before any remote description
    pending_remote_candidates: Vec<IceCandidate>,
    /// Local candidates gathered before our description went out
    pending_local_candidates: Vec<IceCandidate>,
    pending_since: Option<Instant>,
    timeout: Duration,
}

impl PeerController {
    pub fn new(
        remote: ConnectionId,
        engine: Arc<dyn RtcEngine>,
        generation: u64,
        timeout: Duration,
    ) -> Self {
        Self {
            remote,
            engine,
            generation,
            state: NegotiationState::Idle,
            media_attached: false,
            engine_closed: false,
            local_description: None,
            remote_description: None,
            pending_remote_candidates: Vec::new(),
            pending_local_candidates: Vec::new(),
            pending_since: None,
            timeout,
        }
    }

    #[must_use]
    pub fn remote(&self) -> &ConnectionId {
        &self.remote
    }

    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub const fn state(&self) -> NegotiationState {
        self.state
    }

    #[must_use]
    pub const fn local_description(&self) -> Option<&SessionDescription> {
        self.local_description.as_ref()
    }

    #[must_use]
    pub const fn remote_description(&self) -> Option<&SessionDescription> {
        self.remote_description.as_ref()
    }

    #[must_use]
    pub const fn has_media(&self) -> bool {
        self.media_attached
    }

    /// Add the outgoing tracks. Only the first call has any effect.
    pub async fn attach_media(&mut self, audio: &LocalTrack, video: &LocalTrack) -> Result<()> {
        if self.media_attached || self.state.is_terminal() {
            return Ok(());
        }
        self.engine.add_track(audio).await?;
        self.engine.add_track(video).await?;
        self.media_attached = true;
        Ok(())
    }

    /// Idle with local media in place
    #[must_use]
    pub fn is_ready_to_offer(&self) -> bool {
        self.state == NegotiationState::Idle && self.media_attached
    }

    fn transition(&mut self, event: NegotiationEvent) -> Result<NegotiationState> {
        let next = self
            .state
            .apply(event)
            .map_err(|e| Error::InvalidState(e.to_string()))?;

        debug!(remote = %self.remote, from = %self.state, to = %next, "Negotiation transition");
        self.state = next;
        self.pending_since = next.is_pending().then(Instant::now);
        Ok(next)
    }

    /// A failure once the exchange is under way leaves nothing to retry
    fn escalate(&mut self, err: Error) -> Error {
        warn!(remote = %self.remote, state = %self.state, error = %err, "Negotiation failed");
        if !self.state.is_terminal() {
            let _ = self.transition(NegotiationEvent::Fail);
        }
        err
    }

    /// Create and apply an offer. Returns the offer followed by any
    /// candidates gathered so far.
    pub async fn start_offer(&mut self) -> Result<Vec<ClientMessage>> {
        if !self.is_ready_to_offer() {
            return Err(Error::InvalidState(format!(
                "cannot offer to {} in state {} (media attached: {})",
                self.remote, self.state, self.media_attached
            )));
        }

        let offer = self.engine.create_offer().await?;
        self.engine.set_local_description(offer.clone()).await?;
        self.transition(NegotiationEvent::LocalOfferApplied)?;
        self.local_description = Some(offer.clone());

        info!(remote = %self.remote, "Offer created");

        let mut out = vec![ClientMessage::Offer {
            sdp_payload: offer,
            target_id: Some(self.remote.clone()),
        }];
        out.extend(self.flush_local_candidates());
        Ok(out)
    }

    /// Apply a remote offer, then create and apply the answer.
    ///
    /// The answer is only built once the offer is in place; a bad offer
    /// leaves the controller `Idle`.
    pub async fn handle_offer(&mut self, offer: SessionDescription) -> Result<Vec<ClientMessage>> {
        if self.state != NegotiationState::Idle {
            return Err(Error::InvalidState(format!(
                "offer from {} received in state {}",
                self.remote, self.state
            )));
        }

        self.engine.set_remote_description(offer.clone()).await?;
        self.remote_description = Some(offer);
        self.transition(NegotiationEvent::RemoteOfferApplied)?;
        self.drain_remote_candidates().await;

        let answer = match self.engine.create_answer().await {
            Ok(answer) => answer,
            Err(e) => return Err(self.escalate(e)),
        };
        if let Err(e) = self.engine.set_local_description(answer.clone()).await {
            return Err(self.escalate(e));
        }
        self.transition(NegotiationEvent::LocalAnswerApplied)?;
        self.local_description = Some(answer.clone());

        info!(remote = %self.remote, "Answer created");

        let mut out = vec![ClientMessage::Answer {
            sdp_payload: answer,
            target_id: Some(self.remote.clone()),
        }];
        out.extend(self.flush_local_candidates());
        Ok(out)
    }

    /// Apply the remote answer to our outstanding offer
    pub async fn handle_answer(&mut self, answer: SessionDescription) -> Result<()> {
        if self.state != NegotiationState::HaveLocalOffer {
            return Err(Error::InvalidState(format!(
                "answer from {} received in state {}",
                self.remote, self.state
            )));
        }

        if let Err(e) = self.engine.set_remote_description(answer.clone()).await {
            return Err(self.escalate(e));
        }
        self.remote_description = Some(answer);
        self.transition(NegotiationEvent::RemoteAnswerApplied)?;
        self.drain_remote_candidates().await;

        info!(remote = %self.remote, "Negotiation complete");
        Ok(())
    }

    /// Apply a remote candidate, or hold it until a remote description exists
    pub async fn add_remote_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
        if self.state.is_terminal() {
            debug!(remote = %self.remote, "Candidate for closed connection ignored");
            return Ok(());
        }
        if self.remote_description.is_none() {
            self.pending_remote_candidates.push(candidate);
            return Ok(());
        }
        self.engine.add_ice_candidate(candidate).await
    }

    async fn drain_remote_candidates(&mut self) {
        for candidate in std::mem::take(&mut self.pending_remote_candidates) {
            if let Err(e) = self.engine.add_ice_candidate(candidate).await {
                warn!(remote = %self.remote, error = %e, "Buffered candidate rejected");
            }
        }
    }

    /// A candidate gathered locally. Returns the message to send, or `None`
    /// while it has to wait for our description to go out.
    pub fn on_local_candidate(&mut self, candidate: IceCandidate) -> Option<ClientMessage> {
        if self.state.is_terminal() {
            return None;
        }
        if self.local_description.is_none() {
            self.pending_local_candidates.push(candidate);
            return None;
        }
        Some(self.candidate_message(candidate))
    }

    fn flush_local_candidates(&mut self) -> Vec<ClientMessage> {
        std::mem::take(&mut self.pending_local_candidates)
            .into_iter()
            .map(|c| self.candidate_message(c))
            .collect()
    }

    fn candidate_message(&self, candidate: IceCandidate) -> ClientMessage {
        ClientMessage::IceCandidate {
            candidate_payload: candidate,
            target_id: Some(self.remote.clone()),
        }
    }

    /// Swap the outgoing video in place. No offer or answer is exchanged;
    /// without an attached sender this is a no-op.
    pub async fn replace_video(&self, track: &LocalTrack) -> Result<bool> {
        if self.state.is_terminal() || !self.media_attached {
            return Ok(false);
        }
        let replaced = self.engine.replace_track(TrackKind::Video, track).await?;
        if replaced {
            debug!(remote = %self.remote, track = track.id(), "Outgoing video replaced");
        }
        Ok(replaced)
    }

    /// Waiting on the remote side for longer than the negotiation timeout
    #[must_use]
    pub fn is_stalled(&self, now: Instant) -> bool {
        self.pending_since
            .is_some_and(|since| now.saturating_duration_since(since) >= self.timeout)
    }

    /// Move to `Failed` and release the connection
    pub async fn fail(&mut self, reason: &str) {
        let _ = self.escalate(Error::Negotiation(reason.to_string()));
        self.close_engine().await;
    }

    /// Move to `Closed` and release the connection
    pub async fn close(&mut self) {
        if !self.state.is_terminal() {
            let _ = self.transition(NegotiationEvent::Close);
        }
        self.pending_remote_candidates.clear();
        self.pending_local_candidates.clear();
        self.close_engine().await;
    }

    async fn close_engine(&mut self) {
        if self.engine_closed {
            return;
        }
        self.engine_closed = true;
        if let Err(e) = self.engine.close().await {
            warn!(remote = %self.remote, error = %e, "Failed to close peer connection");
        }
    }
}
