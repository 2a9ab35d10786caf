//! webrtc-bridge: handle-based binding layer over a WebRTC negotiation engine.
//!
//! The negotiation engine (ICE, DTLS/SCTP, SDP, codecs) is a black box that
//! calls back from its own threads. This crate never hands it a Rust
//! reference: sessions, channels, listeners, audio sources and sinks are
//! registered in handle registries, and every engine callback is resolved
//! by handle to the live host object before a user handler runs.
//!
//! ## Features
//!
//! - **Sessions**: offer/answer, pranswer and rollback, ICE candidates,
//!   configuration mirror, state change events
//! - **Data channels**: monotonic ready state, text and binary messages,
//!   host-side buffered-amount-low threshold
//! - **Audio**: float frame / 16-bit PCM bridge, tracks, sinks, streams
//! - **Engines**: in-process loopback engine; webrtc-rs engine behind the
//!   `webrtc-engine` feature
//! - **C ABI**: callback entry points for a native engine

#![allow(non_snake_case)]

pub mod bridge;
pub mod channel;
pub mod codec;
pub mod engine;
pub mod error;
pub mod ffi;
pub mod ice;
pub mod media;
pub mod peer;
pub mod registry;
pub mod sdp;

pub use bridge::{EventListener, Notifier};
pub use channel::{DataChannel, DataChannelInit, DataState};
pub use error::{BridgeError, Result};
pub use ice::{BundlePolicy, Configuration, IceCandidate, IceServer, IceTransportPolicy};
pub use media::{AudioSink, AudioSinkId, AudioSource, AudioTrack, MediaStream};
pub use peer::{IceConnectionState, IceGatheringState, PeerConnection, PeerConnectionState, SignalingState};
pub use registry::{Handle, HandleRegistry};
pub use sdp::{SdpType, SessionDescription};

// ============================================================================
// Tokio Runtime (shared, webrtc-rs engine only)
// ============================================================================

#[cfg(feature = "webrtc-engine")]
lazy_static::lazy_static! {
    /// Shared tokio runtime the webrtc-rs engine blocks on
    pub(crate) static ref RUNTIME: tokio::runtime::Runtime =
        tokio::runtime::Runtime::new().expect("Failed to create tokio runtime");
}
