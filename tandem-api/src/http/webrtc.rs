//! ICE server configuration endpoint

use axum::{
    extract::State,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tandem_core::config::WebRTCConfig;

use crate::http::AppState;

/// ICE Server configuration (STUN/TURN)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    /// URLs for the ICE server (e.g., ["stun:stun.example.com:3478"])
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// Response for ICE servers request
#[derive(Debug, Serialize, Deserialize)]
pub struct GetIceServersResponse {
    pub servers: Vec<IceServerConfig>,
}

impl From<&WebRTCConfig> for GetIceServersResponse {
    fn from(config: &WebRTCConfig) -> Self {
        let mut servers = Vec::new();

        if !config.stun_servers.is_empty() {
            servers.push(IceServerConfig {
                urls: config.stun_servers.clone(),
                username: None,
                credential: None,
            });
        }

        if let Some(turn) = &config.turn {
            servers.push(IceServerConfig {
                urls: vec![turn.url.clone()],
                username: Some(turn.username.clone()),
                credential: Some(turn.credential.clone()),
            });
        }

        Self { servers }
    }
}

/// Get ICE servers configuration for WebRTC
///
/// Path: `GET /api/ice-servers`
///
/// # Response
/// ```json
/// {
///   "servers": [
///     { "urls": ["stun:stun.l.google.com:19302"] },
///     { "urls": ["turn:turn.example.com:3478"], "username": "u", "credential": "c" }
///   ]
/// }
/// ```
pub async fn get_ice_servers(State(state): State<AppState>) -> impl IntoResponse {
    Json(GetIceServersResponse::from(&state.config.webrtc))
}
