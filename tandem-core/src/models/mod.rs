//! Domain models shared by the server and clients

pub mod id;
pub mod session;

pub use id::{ConnectionId, SessionId};
pub use session::{Participant, ParticipantInfo, Session};
