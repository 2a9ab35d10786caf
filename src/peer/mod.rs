//! Negotiation sessions (peer connections).

mod connection;
mod state;

pub use connection::{deliver_session_event, PeerConnection};
pub use state::{IceConnectionState, IceGatheringState, PeerConnectionState, SignalingState};

#[cfg(test)]
pub(crate) use connection::is_peer_registered;
