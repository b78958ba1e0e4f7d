// Module: http
// Signaling WebSocket plus a small JSON API

pub mod error;
pub mod health;
pub mod session;
pub mod webrtc;
pub mod websocket;

use axum::{routing::get, Router};
use std::sync::Arc;
use tandem_core::service::SignalingService;
use tandem_core::Config;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use error::{AppError, AppResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub signaling: SignalingService,
}

/// Create the HTTP router with all routes
pub fn create_router(config: Arc<Config>, signaling: SignalingService) -> Router {
    let state = AppState { config, signaling };

    Router::new()
        .merge(health::create_health_router())
        .route("/ws", get(websocket::websocket_handler))
        .route("/api/ice-servers", get(webrtc::get_ice_servers))
        .route("/api/sessions/{session_id}", get(session::get_session))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
