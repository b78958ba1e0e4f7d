use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub session: SessionConfig,
    pub webrtc: WebRTCConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

/// Session registry and relay limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum concurrent members per session
    pub capacity: usize,
    /// Length of freshly generated session tokens
    pub id_length: usize,
    /// Collision retries before the token is widened by one character
    pub id_max_attempts: usize,
    /// Largest accepted signaling frame in bytes
    pub max_message_bytes: usize,
    /// Per-connection outbound queue; messages beyond it are dropped
    pub outbound_queue: usize,
    /// How long a created session may stay without members before it is swept
    pub unclaimed_ttl_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capacity: 2,
            id_length: 8,
            id_max_attempts: 16,
            max_message_bytes: 64 * 1024,
            outbound_queue: 256,
            unclaimed_ttl_secs: 60,
        }
    }
}

/// ICE servers handed to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebRTCConfig {
    /// STUN server URLs for NAT traversal
    pub stun_servers: Vec<String>,
    /// Optional TURN relay
    pub turn: Option<TurnConfig>,
}

impl Default for WebRTCConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
            ],
            turn: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnConfig {
    pub url: String,
    pub username: String,
    pub credential: String,
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // TANDEM_SERVER__HOST, TANDEM_SESSION__CAPACITY, ...
        builder = builder.add_source(
            Environment::with_prefix("TANDEM")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only (for Docker/K8s)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Collect every configuration problem instead of stopping at the first
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.http_port == 0 {
            errors.push("server.http_port must be non-zero".to_string());
        }
        if self.session.capacity == 0 {
            errors.push("session.capacity must be at least 1".to_string());
        }
        if self.session.id_length < 4 {
            errors.push(format!(
                "session.id_length must be at least 4 (got {})",
                self.session.id_length
            ));
        }
        if self.session.id_max_attempts == 0 {
            errors.push("session.id_max_attempts must be at least 1".to_string());
        }
        if self.session.outbound_queue == 0 {
            errors.push("session.outbound_queue must be at least 1".to_string());
        }
        if !matches!(
            self.logging.level.to_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "warning" | "error"
        ) {
            errors.push(format!("logging.level is invalid: {}", self.logging.level));
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be \"json\" or \"pretty\" (got {})",
                self.logging.format
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Get HTTP address
    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.http_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.session.capacity, 2);
        assert_eq!(config.session.id_length, 8);
        assert!(config.server.http_port > 0);
        assert!(!config.webrtc.stun_servers.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_http_address() {
        let config = Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                http_port: 9000,
            },
            ..Default::default()
        };

        assert_eq!(config.http_address(), "127.0.0.1:9000");
    }

    #[test]
    fn test_validate_reports_all_errors() {
        let mut config = Config::default();
        config.session.capacity = 0;
        config.session.id_length = 2;
        config.logging.format = "xml".to_string();

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[session]\ncapacity = 6\n\n[server]\nhttp_port = 9100").unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let config = Config::from_file(&path).unwrap();

        assert_eq!(config.session.capacity, 6);
        assert_eq!(config.server.http_port, 9100);
        // Untouched sections keep their defaults
        assert_eq!(config.session.id_length, 8);
    }
}
