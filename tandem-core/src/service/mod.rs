//! Server-side services

pub mod registry;
pub mod relay;
pub mod signaling;

pub use registry::{JoinOutcome, LeaveOutcome, RegistryStats, SessionRegistry, SessionSnapshot};
pub use relay::{Outbound, SignalingRelay};
pub use signaling::SignalingService;
