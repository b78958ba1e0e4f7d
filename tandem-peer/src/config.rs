use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder};
use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// WebSocket endpoint of the signaling server
    pub signaling_url: String,
    pub ice_servers: Vec<IceServer>,
    /// How long a negotiation may wait for the other side before it fails
    pub negotiation_timeout_secs: u64,
    pub reconnect: ReconnectConfig,
    pub media: MediaConstraints,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://127.0.0.1:8080/ws".to_string(),
            ice_servers: vec![IceServer {
                urls: vec!["stun:stun.l.google.com:19302".to_string()],
                username: None,
                credential: None,
            }],
            negotiation_timeout_secs: 30,
            reconnect: ReconnectConfig::default(),
            media: MediaConstraints::default(),
        }
    }
}

impl PeerConfig {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (`TANDEM_PEER_SIGNALING_URL`, `TANDEM_PEER_RECONNECT__MAX_DELAY_MS`, ...)
    /// 2. Config file (if provided)
    /// 3. Defaults
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("TANDEM_PEER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    #[must_use]
    pub const fn negotiation_timeout(&self) -> Duration {
        Duration::from_secs(self.negotiation_timeout_secs)
    }
}

/// STUN/TURN server handed to the peer connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// Signaling reconnect backoff
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub factor: f32,
    /// `None` retries forever
    pub max_attempts: Option<usize>,
    pub jitter: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 250,
            max_delay_ms: 10_000,
            factor: 2.0,
            max_attempts: None,
            jitter: true,
        }
    }
}

impl ReconnectConfig {
    /// Delays between connection attempts, not including the first attempt
    #[must_use]
    pub fn backoff(&self) -> ExponentialBackoff {
        let mut builder = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.min_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_factor(self.factor);

        builder = match self.max_attempts {
            Some(times) => builder.with_max_times(times),
            None => builder.without_max_times(),
        };
        if self.jitter {
            builder = builder.with_jitter();
        }

        builder.build()
    }
}

/// Fixed capture settings requested from the media devices
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConstraints {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            frame_rate: 30,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}
