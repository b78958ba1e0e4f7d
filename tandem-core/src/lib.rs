//! Tandem core
//!
//! Shared building blocks for the signaling server and its clients:
//!
//! - **`config`**: layered configuration (defaults, file, `TANDEM_*` env)
//! - **`protocol`**: the JSON messages exchanged over the signaling channel
//! - **`service::SessionRegistry`**: in-memory session membership
//! - **`service::SignalingRelay`**: per-connection routing of negotiation messages
//! - **`service::SignalingService`**: transport-agnostic processing of inbound events

pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod protocol;
pub mod service;

pub use config::Config;
pub use error::{Error, ErrorCode, Result};
pub use models::{ConnectionId, SessionId};
