//! Boundary with the native negotiation engine.
//!
//! The engine is an external actor. Host code reaches it through the
//! blocking trait methods below. The engine reaches host code only through
//! the `deliver_*` entry points, naming objects by [`Handle`], from threads
//! it owns.

pub mod loopback;
#[cfg(feature = "webrtc-engine")]
pub mod webrtc_rs;

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::bridge::Notifier;
use crate::channel::{DataChannelInit, DataState};
use crate::error::Result;
use crate::ice::{Configuration, IceCandidate};
use crate::peer::{IceConnectionState, IceGatheringState, SignalingState};
use crate::registry::Handle;
use crate::sdp::SessionDescription;

pub use crate::bridge::deliver_notification;
pub use crate::channel::deliver_channel_event;
pub use crate::media::{deliver_sink_data, source_add_sink, source_destruct, source_remove_sink};
pub use crate::peer::deliver_session_event;

/// Engine token for an attached audio sink.
pub type SinkId = u64;

/// Factory for native sessions and tracks.
pub trait NegotiationEngine: Send + Sync {
    /// Create the native side of a session. Every event for it must be
    /// delivered with `handle`.
    fn create_peer(&self, handle: Handle, config: &Configuration) -> Result<Arc<dyn EnginePeer>>;

    /// Create a local audio track fed by the host source registered as `source`.
    fn create_audio_track(&self, label: &str, source: Handle) -> Result<Arc<dyn EngineAudioTrack>>;
}

/// Native session. All calls block until the engine is done.
pub trait EnginePeer: Send + Sync {
    fn create_offer(&self) -> Result<String>;
    fn create_answer(&self) -> Result<String>;
    fn set_local_description(&self, desc: &SessionDescription) -> Result<()>;
    fn set_remote_description(&self, desc: &SessionDescription) -> Result<()>;

    /// Current local description. Its SDP text may include candidates
    /// gathered since it was set.
    fn local_description(&self) -> Option<SessionDescription>;
    fn remote_description(&self) -> Option<SessionDescription>;

    fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<()>;
    fn set_configuration(&self, config: &Configuration) -> Result<()>;

    fn signaling_state(&self) -> SignalingState;
    fn ice_gathering_state(&self) -> IceGatheringState;
    fn ice_connection_state(&self) -> IceConnectionState;

    fn create_data_channel(&self, label: &str, init: &DataChannelInit) -> Result<Arc<dyn EngineChannel>>;
    fn create_media_stream(&self, label: &str) -> Result<Arc<dyn EngineMediaStream>>;

    /// Close the session. Once this returns no event may be delivered for
    /// this session's handle.
    fn close(&self);
}

/// Native data channel.
pub trait EngineChannel: Send + Sync {
    /// Start delivering this channel's events with `handle`.
    fn bind(&self, handle: Handle);
    /// Stop delivering. No event may start after this returns.
    fn unbind(&self);

    fn send(&self, data: &[u8], is_binary: bool);
    fn close(&self);

    fn label(&self) -> String;
    fn ordered(&self) -> bool;
    fn protocol(&self) -> String;
    fn negotiated(&self) -> bool;
    fn id(&self) -> Option<u16>;
    fn max_packet_life_time(&self) -> Option<u16>;
    fn max_retransmits(&self) -> Option<u16>;
    fn ready_state(&self) -> DataState;
    fn buffered_amount(&self) -> usize;
}

/// Native audio track. Its notifier reports enabled/ended changes.
pub trait EngineAudioTrack: Send + Sync {
    fn id(&self) -> String;
    fn enabled(&self) -> bool;
    fn set_enabled(&self, enabled: bool);
    fn ended(&self) -> bool;
    fn notifier(&self) -> Arc<dyn Notifier>;

    /// Attach the host sink registered as `sink`.
    fn add_sink(&self, sink: Handle) -> SinkId;
    /// Detach a sink. Returns the host handle it was attached with.
    fn remove_sink(&self, sink: SinkId) -> Option<Handle>;
}

/// Engine-side receiver of 16-bit PCM produced by a host audio source.
pub trait EngineAudioSink: Send + Sync {
    fn on_data(&self, pcm: &[i16], bits_per_sample: u32, sample_rate: u32, channels: usize, frames: usize);
}

pub trait EngineMediaStream: Send + Sync {
    fn label(&self) -> String;
    fn audio_tracks(&self) -> Vec<Arc<dyn EngineAudioTrack>>;
    fn add_audio_track(&self, track: Arc<dyn EngineAudioTrack>) -> bool;
}

/// Session events raised by the engine.
pub enum SessionEvent {
    NegotiationNeeded,
    IceCandidate(IceCandidate),
    IceCandidateError,
    SignalingStateChange(SignalingState),
    IceConnectionStateChange(IceConnectionState),
    IceGatheringStateChange(IceGatheringState),
    /// A channel opened by the remote side.
    DataChannel(Arc<dyn EngineChannel>),
}

/// Channel events raised by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    StateChange(DataState),
    Message(Bytes),
    BufferedAmountChange(usize),
}

/// Guarantees "no delivery after retire returns".
///
/// Deliveries run under a shared guard and [`RetireGate::retire`] takes the
/// exclusive one, so retiring waits for in-flight deliveries and blocks new
/// ones. Retiring from inside a delivery on the same gate deadlocks.
pub struct RetireGate {
    retired: RwLock<bool>,
}

impl RetireGate {
    pub fn new() -> Self {
        Self {
            retired: RwLock::new(false),
        }
    }

    /// Run `deliver` unless retired. Returns whether it ran.
    pub fn deliver<F: FnOnce()>(&self, deliver: F) -> bool {
        let retired = self.retired.read_recursive();
        if *retired {
            return false;
        }
        deliver();
        true
    }

    /// Returns `false` if already retired.
    pub fn retire(&self) -> bool {
        let mut retired = self.retired.write();
        !std::mem::replace(&mut *retired, true)
    }

    pub fn is_retired(&self) -> bool {
        *self.retired.read_recursive()
    }
}

impl Default for RetireGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_retire_gate_blocks_after_retire() {
        let gate = RetireGate::new();
        let count = AtomicUsize::new(0);
        assert!(gate.deliver(|| {
            count.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(gate.retire());
        assert!(!gate.retire());
        assert!(!gate.deliver(|| {
            count.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_nested_delivery() {
        let gate = RetireGate::new();
        let mut inner_ran = false;
        gate.deliver(|| {
            gate.deliver(|| inner_ran = true);
        });
        assert!(inner_ran);
    }
}
