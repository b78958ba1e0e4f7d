//! Tandem peer
//!
//! Client side of a call: a reconnecting signaling channel, one negotiation
//! state machine per remote participant, local media management and the
//! `CallSession` actor tying them together.
//!
//! ```no_run
//! # async fn demo() -> tandem_peer::Result<()> {
//! use tandem_peer::{CallSession, PeerConfig};
//!
//! let (call, mut events) = CallSession::spawn_default(PeerConfig::default())?;
//! call.create_session(Some("Alice".to_string())).await?;
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod media;
pub mod negotiation;
pub mod rtc;
pub mod session;

pub use channel::{ChannelEvent, SignalingChannel};
pub use config::{IceServer, MediaConstraints, PeerConfig, ReconnectConfig};
pub use controller::PeerController;
pub use engine::{ConnectionStatus, EngineEvent, EngineEvents, RemoteTrackInfo, RtcEngine, RtcEngineFactory, TrackKind};
pub use error::{Error, MediaError, Result};
pub use media::{LocalMedia, LocalTrack, MediaDevices, MediaSourceManager, SampleTrackDevices, TrackSource};
pub use negotiation::{NegotiationEvent, NegotiationState};
pub use rtc::WebRtcEngineFactory;
pub use session::{CallEvent, CallHandle, CallSession};
