//! HTTP and WebSocket surface of the signaling server

pub mod http;

pub use http::{create_router, AppState};
