//! Negotiation state machine
//!
//! ```text
//!            LocalOfferApplied              RemoteAnswerApplied
//!   Idle ───────────────────▶ HaveLocalOffer ───────────────────▶ Stable
//!     │                                                             ▲
//!     │ RemoteOfferApplied                  LocalAnswerApplied      │
//!     └──────────────────────▶ HaveRemoteOffer ─────────────────────┘
//!
//!   any non-terminal ── Close ──▶ Closed
//!   any non-terminal ── Fail  ──▶ Failed
//! ```
//!
//! Each event names a description that has already been applied, so an
//! answer can only be produced from `HaveRemoteOffer`, which is only reached
//! once the remote offer is in place.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NegotiationState {
    Idle,
    HaveLocalOffer,
    HaveRemoteOffer,
    Stable,
    Closed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationEvent {
    LocalOfferApplied,
    RemoteOfferApplied,
    LocalAnswerApplied,
    RemoteAnswerApplied,
    Close,
    Fail,
}

/// An event that is not valid in the current state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: NegotiationState,
    pub event: NegotiationEvent,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} is not allowed in state {}", self.event, self.from)
    }
}

impl std::error::Error for InvalidTransition {}

impl NegotiationState {
    /// Next state for `event`
    pub fn apply(self, event: NegotiationEvent) -> Result<Self, InvalidTransition> {
        use NegotiationEvent as E;
        use NegotiationState as S;

        let next = match (self, event) {
            (S::Idle, E::LocalOfferApplied) => S::HaveLocalOffer,
            (S::Idle, E::RemoteOfferApplied) => S::HaveRemoteOffer,
            (S::HaveRemoteOffer, E::LocalAnswerApplied) => S::Stable,
            (S::HaveLocalOffer, E::RemoteAnswerApplied) => S::Stable,
            (s, E::Close) if !s.is_terminal() => S::Closed,
            (s, E::Fail) if !s.is_terminal() => S::Failed,
            (from, event) => return Err(InvalidTransition { from, event }),
        };
        Ok(next)
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    /// Waiting on the other side to complete an offer/answer exchange
    #[must_use]
    pub const fn is_pending(self) -> bool {
        matches!(self, Self::HaveLocalOffer | Self::HaveRemoteOffer)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::HaveLocalOffer => "have-local-offer",
            Self::HaveRemoteOffer => "have-remote-offer",
            Self::Stable => "stable",
            Self::Closed => "closed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use NegotiationEvent as E;
    use NegotiationState as S;

    #[test]
    fn test_offerer_path() {
        let state = S::Idle.apply(E::LocalOfferApplied).unwrap();
        assert_eq!(state, S::HaveLocalOffer);
        assert!(state.is_pending());
        assert_eq!(state.apply(E::RemoteAnswerApplied).unwrap(), S::Stable);
    }

    #[test]
    fn test_answerer_path() {
        let state = S::Idle.apply(E::RemoteOfferApplied).unwrap();
        assert_eq!(state, S::HaveRemoteOffer);
        assert_eq!(state.apply(E::LocalAnswerApplied).unwrap(), S::Stable);
    }

    #[test]
    fn test_answer_requires_remote_offer() {
        assert!(S::Idle.apply(E::LocalAnswerApplied).is_err());
        assert!(S::HaveLocalOffer.apply(E::LocalAnswerApplied).is_err());
        assert!(S::Idle.apply(E::RemoteAnswerApplied).is_err());
    }

    #[test]
    fn test_close_and_fail_from_any_live_state() {
        for state in [S::Idle, S::HaveLocalOffer, S::HaveRemoteOffer, S::Stable] {
            assert_eq!(state.apply(E::Close).unwrap(), S::Closed);
            assert_eq!(state.apply(E::Fail).unwrap(), S::Failed);
        }
    }

    #[test]
    fn test_terminal_states_absorb_nothing() {
        for state in [S::Closed, S::Failed] {
            assert!(state.is_terminal());
            let err = state.apply(E::Close).unwrap_err();
            assert_eq!(err.from, state);
            assert!(state.apply(E::LocalOfferApplied).is_err());
        }
    }

    #[test]
    fn test_stable_rejects_new_offer() {
        // Track replacement never goes back through negotiation
        assert!(S::Stable.apply(E::LocalOfferApplied).is_err());
        assert!(S::Stable.apply(E::RemoteOfferApplied).is_err());
    }
}
