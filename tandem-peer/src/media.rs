//! Local media sources
//!
//! A `LocalTrack` is an outgoing sample track plus an enabled flag and an
//! "ended" signal. Capture itself lives behind `MediaDevices`: whatever feeds
//! samples into the tracks (a camera pipeline, a file, a test pattern) is
//! outside this crate.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::config::MediaConstraints;
use crate::engine::TrackKind;
use crate::error::{MediaError, Result};

static NEXT_TRACK_ID: AtomicU64 = AtomicU64::new(1);

/// Where a local track's samples come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackSource {
    Microphone,
    Camera,
    Screen,
}

impl TrackSource {
    #[must_use]
    pub const fn kind(self) -> TrackKind {
        match self {
            Self::Microphone => TrackKind::Audio,
            Self::Camera | Self::Screen => TrackKind::Video,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Microphone => "microphone",
            Self::Camera => "camera",
            Self::Screen => "screen",
        }
    }
}

/// Outgoing track handed to peer connections
#[derive(Clone)]
pub struct LocalTrack {
    rtp: Arc<TrackLocalStaticSample>,
    source: TrackSource,
    enabled: Arc<AtomicBool>,
    ended: CancellationToken,
}

impl LocalTrack {
    /// Create a track for `source` inside the media stream `stream_id`
    #[must_use]
    pub fn new(source: TrackSource, stream_id: &str) -> Self {
        let capability = match source.kind() {
            TrackKind::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
                rtcp_feedback: vec![],
            },
            TrackKind::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: 90000,
                ..Default::default()
            },
        };

        let id = format!(
            "{}-{}",
            source.as_str(),
            NEXT_TRACK_ID.fetch_add(1, Ordering::Relaxed)
        );

        Self {
            rtp: Arc::new(TrackLocalStaticSample::new(
                capability,
                id,
                stream_id.to_owned(),
            )),
            source,
            enabled: Arc::new(AtomicBool::new(true)),
            ended: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        self.rtp.id()
    }

    #[must_use]
    pub const fn kind(&self) -> TrackKind {
        self.source.kind()
    }

    #[must_use]
    pub const fn source(&self) -> TrackSource {
        self.source
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Disabled tracks keep their capture but send nothing
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// End the track. Used both for releasing the device and for the
    /// platform's own "stop sharing" control.
    pub fn stop(&self) {
        self.ended.cancel();
    }

    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.ended.is_cancelled()
    }

    /// Token cancelled once the track has ended
    #[must_use]
    pub fn ended(&self) -> CancellationToken {
        self.ended.clone()
    }

    /// Push one encoded sample. Dropped while disabled or ended.
    pub async fn write_sample(&self, sample: &Sample) -> Result<()> {
        if !self.is_enabled() || self.is_ended() {
            return Ok(());
        }
        self.rtp.write_sample(sample).await?;
        Ok(())
    }

    /// The track as the peer connection sees it
    #[must_use]
    pub fn rtp_track(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        Arc::clone(&self.rtp) as Arc<dyn TrackLocal + Send + Sync>
    }
}

impl std::fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id())
            .field("source", &self.source)
            .field("enabled", &self.is_enabled())
            .field("ended", &self.is_ended())
            .finish()
    }
}

/// Camera and microphone captured together
#[derive(Debug, Clone)]
pub struct LocalMedia {
    pub audio: LocalTrack,
    pub video: LocalTrack,
    pub constraints: MediaConstraints,
}

impl LocalMedia {
    pub fn stop(&self) {
        self.audio.stop();
        self.video.stop();
    }
}

/// Capture backend
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Start camera and microphone capture
    async fn user_media(&self, constraints: &MediaConstraints) -> std::result::Result<LocalMedia, MediaError>;

    /// Start screen capture
    async fn display_media(&self) -> std::result::Result<LocalTrack, MediaError>;
}

/// Devices whose tracks are fed by the application through
/// [`LocalTrack::write_sample`]
#[derive(Debug, Clone)]
pub struct SampleTrackDevices {
    stream_id: String,
}

impl SampleTrackDevices {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
        }
    }
}

impl Default for SampleTrackDevices {
    fn default() -> Self {
        Self::new("tandem")
    }
}

#[async_trait]
impl MediaDevices for SampleTrackDevices {
    async fn user_media(&self, constraints: &MediaConstraints) -> std::result::Result<LocalMedia, MediaError> {
        Ok(LocalMedia {
            audio: LocalTrack::new(TrackSource::Microphone, &self.stream_id),
            video: LocalTrack::new(TrackSource::Camera, &self.stream_id),
            constraints: constraints.clone(),
        })
    }

    async fn display_media(&self) -> std::result::Result<LocalTrack, MediaError> {
        Ok(LocalTrack::new(TrackSource::Screen, &self.stream_id))
    }
}

/// Owner of the local capture for one call
pub struct MediaSourceManager {
    devices: Arc<dyn MediaDevices>,
    constraints: MediaConstraints,
    camera: Option<LocalMedia>,
    screen: Option<LocalTrack>,
    video_enabled: bool,
}

impl MediaSourceManager {
    pub fn new(devices: Arc<dyn MediaDevices>, constraints: MediaConstraints) -> Self {
        Self {
            devices,
            constraints,
            camera: None,
            screen: None,
            video_enabled: true,
        }
    }

    /// Start camera and microphone capture if not already running
    pub async fn acquire(&mut self) -> std::result::Result<&LocalMedia, MediaError> {
        let media = match self.camera.take() {
            Some(media) => media,
            None => {
                let media = self.devices.user_media(&self.constraints).await?;
                media.video.set_enabled(self.video_enabled);
                info!(
                    audio = media.audio.id(),
                    video = media.video.id(),
                    width = self.constraints.width,
                    height = self.constraints.height,
                    "Local media acquired"
                );
                media
            }
        };
        let media: &LocalMedia = self.camera.insert(media);
        Ok(media)
    }

    #[must_use]
    pub const fn is_acquired(&self) -> bool {
        self.camera.is_some()
    }

    #[must_use]
    pub fn audio(&self) -> Option<&LocalTrack> {
        self.camera.as_ref().map(|m| &m.audio)
    }

    #[must_use]
    pub fn camera_video(&self) -> Option<&LocalTrack> {
        self.camera.as_ref().map(|m| &m.video)
    }

    /// The video track currently sent to peers
    #[must_use]
    pub fn outgoing_video(&self) -> Option<&LocalTrack> {
        self.screen.as_ref().or_else(|| self.camera_video())
    }

    #[must_use]
    pub const fn is_screen_sharing(&self) -> bool {
        self.screen.is_some()
    }

    /// Flip the outgoing audio track. Returns the new state, or `None`
    /// without local media.
    pub fn toggle_audio(&mut self) -> Option<bool> {
        let audio = self.audio()?;
        let enabled = !audio.is_enabled();
        audio.set_enabled(enabled);
        debug!(enabled, "Audio toggled");
        Some(enabled)
    }

    /// Flip the outgoing video. Applies to the camera and to an active
    /// screen share alike.
    pub fn toggle_video(&mut self) -> Option<bool> {
        self.camera.as_ref()?;
        self.video_enabled = !self.video_enabled;
        if let Some(video) = self.camera_video() {
            video.set_enabled(self.video_enabled);
        }
        if let Some(screen) = &self.screen {
            screen.set_enabled(self.video_enabled);
        }
        debug!(enabled = self.video_enabled, "Video toggled");
        Some(self.video_enabled)
    }

    /// Start screen capture and return the track that should replace the
    /// outgoing video
    pub async fn start_screen_share(&mut self) -> std::result::Result<LocalTrack, MediaError> {
        if let Some(screen) = &self.screen {
            return Ok(screen.clone());
        }

        let screen = self.devices.display_media().await?;
        screen.set_enabled(self.video_enabled);
        info!(track = screen.id(), "Screen share started");
        Ok(self.screen.insert(screen).clone())
    }

    /// Stop screen capture and return the camera track to revert to
    pub fn stop_screen_share(&mut self) -> Option<LocalTrack> {
        let screen = self.screen.take()?;
        screen.stop();
        info!(track = screen.id(), "Screen share stopped");
        self.camera_video().cloned()
    }

    /// Cancelled when the active screen share is ended from outside
    #[must_use]
    pub fn screen_ended(&self) -> Option<CancellationToken> {
        self.screen.as_ref().map(LocalTrack::ended)
    }

    /// Stop every track and release the devices
    pub fn release(&mut self) {
        if let Some(screen) = self.screen.take() {
            screen.stop();
        }
        if let Some(media) = self.camera.take() {
            media.stop();
            info!("Local media released");
        }
        self.video_enabled = true;
    }
}
