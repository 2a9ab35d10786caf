//! ICE (Interactive Connectivity Establishment) configuration and candidates.
//!
//! Provides helpers for configuring STUN and TURN servers.

mod candidate;
mod config;
mod server;

pub use candidate::IceCandidate;
pub use config::{BundlePolicy, Configuration, IceTransportPolicy};
pub use server::IceServer;

/// Default Google STUN servers
pub fn google_stun_servers() -> Vec<IceServer> {
    vec![
        IceServer::stun("stun:stun.l.google.com:19302"),
        IceServer::stun("stun:stun1.l.google.com:19302"),
    ]
}
