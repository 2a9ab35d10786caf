//! Deterministic in-process engine.
//!
//! Performs no networking. It enforces the signaling table, produces
//! synthetic SDP and gathers a single host candidate per session. Every
//! event is delivered synchronously on the thread whose call caused it, or
//! on the thread driving one of the `simulate_*` controls.

mod channel;
mod media;

pub use channel::{LoopbackChannel, SentMessage};
pub use media::{LoopbackAudioTrack, LoopbackMediaStream, LoopbackNotifier};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::{
    EngineAudioTrack, EngineChannel, EngineMediaStream, EnginePeer, NegotiationEngine, RetireGate,
    SessionEvent,
};
use crate::channel::DataChannelInit;
use crate::error::{BridgeError, Result};
use crate::ice::{Configuration, IceCandidate, IceTransportPolicy};
use crate::peer::{deliver_session_event, IceConnectionState, IceGatheringState, SignalingState};
use crate::registry::Handle;
use crate::sdp::{SdpType, SessionDescription};

const MAX_LABEL_LEN: usize = 65535;

pub struct LoopbackEngine {
    peers: Mutex<HashMap<Handle, Weak<LoopbackPeer>>>,
    refuse_peers: AtomicBool,
    next_session: AtomicU64,
}

impl LoopbackEngine {
    pub fn new() -> Self {
        Self {
            peers: Mutex::new(HashMap::new()),
            refuse_peers: AtomicBool::new(false),
            next_session: AtomicU64::new(1),
        }
    }

    /// Native session created for `handle`, while it is alive.
    pub fn peer(&self, handle: Handle) -> Option<Arc<LoopbackPeer>> {
        let mut peers = self.peers.lock();
        peers.retain(|_, p| p.strong_count() > 0);
        peers.get(&handle).and_then(Weak::upgrade)
    }

    /// Make `create_peer` fail until reset.
    pub fn refuse_new_peers(&self, refuse: bool) {
        self.refuse_peers.store(refuse, Ordering::Release);
    }

    /// Track as if received from the remote peer.
    pub fn remote_audio_track(&self, id: &str) -> Arc<LoopbackAudioTrack> {
        LoopbackAudioTrack::remote(id)
    }
}

impl Default for LoopbackEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl NegotiationEngine for LoopbackEngine {
    fn create_peer(&self, handle: Handle, config: &Configuration) -> Result<Arc<dyn EnginePeer>> {
        if self.refuse_peers.load(Ordering::Acquire) {
            return Err(BridgeError::Engine("peer connection factory unavailable".into()));
        }
        let session_id = self.next_session.fetch_add(1, Ordering::Relaxed);
        let peer = Arc::new(LoopbackPeer::new(handle, session_id, config.clone()));
        self.peers.lock().insert(handle, Arc::downgrade(&peer));
        Ok(peer)
    }

    fn create_audio_track(&self, label: &str, source: Handle) -> Result<Arc<dyn EngineAudioTrack>> {
        Ok(LoopbackAudioTrack::local(label, source))
    }
}

struct PeerState {
    signaling: SignalingState,
    gathering: IceGatheringState,
    connection: IceConnectionState,
    config: Configuration,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    stable_local: Option<SessionDescription>,
    stable_remote: Option<SessionDescription>,
    remote_candidates: Vec<IceCandidate>,
    channels: Vec<Arc<LoopbackChannel>>,
    announce_on_close: Vec<Arc<LoopbackChannel>>,
    next_stream_id: u16,
    sdp_version: u64,
}

pub struct LoopbackPeer {
    handle: Handle,
    session_id: u64,
    gate: RetireGate,
    state: Mutex<PeerState>,
}

impl LoopbackPeer {
    fn new(handle: Handle, session_id: u64, config: Configuration) -> Self {
        Self {
            handle,
            session_id,
            gate: RetireGate::new(),
            state: Mutex::new(PeerState {
                signaling: SignalingState::Stable,
                gathering: IceGatheringState::New,
                connection: IceConnectionState::New,
                config,
                local: None,
                remote: None,
                stable_local: None,
                stable_remote: None,
                remote_candidates: Vec::new(),
                channels: Vec::new(),
                announce_on_close: Vec::new(),
                next_stream_id: 0,
                sdp_version: 0,
            }),
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    fn emit(&self, event: SessionEvent) {
        self.gate.deliver(|| deliver_session_event(self.handle, event));
    }

    fn render_sdp(&self, state: &mut PeerState, setup: &str) -> String {
        state.sdp_version += 1;
        format!(
            "v=0\r\n\
             o=- {} {} IN IP4 127.0.0.1\r\n\
             s=-\r\n\
             t=0 0\r\n\
             a=group:BUNDLE 0\r\n\
             m=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n\
             c=IN IP4 0.0.0.0\r\n\
             a=mid:0\r\n\
             a=setup:{}\r\n\
             a=sctp-port:5000\r\n",
            self.session_id, state.sdp_version, setup
        )
    }

    fn check_sdp(desc: &SessionDescription) -> Result<()> {
        if desc.sdp_type() != SdpType::Rollback && !desc.sdp().starts_with("v=0") {
            return Err(BridgeError::DescriptionRejected("SDP must start with v=0".into()));
        }
        Ok(())
    }

    /// Gathering runs once, on the first local description.
    fn gather(&self, policy: IceTransportPolicy) {
        self.state.lock().gathering = IceGatheringState::Gathering;
        self.emit(SessionEvent::IceGatheringStateChange(IceGatheringState::Gathering));
        if policy == IceTransportPolicy::All {
            let port = 50000 + (self.session_id % 10000);
            self.emit(SessionEvent::IceCandidate(IceCandidate::new(
                format!("candidate:1 1 UDP 2122260223 127.0.0.1 {} typ host", port),
                "0",
                0,
            )));
        }
        self.state.lock().gathering = IceGatheringState::Complete;
        self.emit(SessionEvent::IceGatheringStateChange(IceGatheringState::Complete));
    }

    pub fn simulate_negotiation_needed(&self) {
        self.emit(SessionEvent::NegotiationNeeded);
    }

    pub fn simulate_ice_candidate_error(&self) {
        self.emit(SessionEvent::IceCandidateError);
    }

    pub fn simulate_ice_connection_state(&self, state: IceConnectionState) {
        self.state.lock().connection = state;
        self.emit(SessionEvent::IceConnectionStateChange(state));
    }

    /// Remote channels take odd stream ids.
    fn remote_channel(state: &mut PeerState, label: &str, init: &DataChannelInit) -> Arc<LoopbackChannel> {
        let id = init.id.unwrap_or_else(|| {
            state.next_stream_id += 1;
            state.next_stream_id * 2 - 1
        });
        LoopbackChannel::new(label, init, Some(id))
    }

    /// Announce a channel opened by the remote side.
    pub fn simulate_remote_data_channel(&self, label: &str, init: &DataChannelInit) -> Arc<LoopbackChannel> {
        let channel = {
            let mut state = self.state.lock();
            let channel = Self::remote_channel(&mut state, label, init);
            state.channels.push(channel.clone());
            channel
        };
        self.emit(SessionEvent::DataChannel(channel.clone()));
        channel
    }

    /// Announce a remote channel from inside `close`, after the session is
    /// marked closed and before the engine stops delivering.
    pub fn announce_on_close(&self, label: &str, init: &DataChannelInit) -> Arc<LoopbackChannel> {
        let mut state = self.state.lock();
        let channel = Self::remote_channel(&mut state, label, init);
        state.announce_on_close.push(channel.clone());
        channel
    }

    pub fn channels(&self) -> Vec<Arc<LoopbackChannel>> {
        self.state.lock().channels.clone()
    }

    pub fn remote_candidates(&self) -> Vec<IceCandidate> {
        self.state.lock().remote_candidates.clone()
    }

    pub fn configuration(&self) -> Configuration {
        self.state.lock().config.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.gate.is_retired()
    }
}

impl EnginePeer for LoopbackPeer {
    fn create_offer(&self) -> Result<String> {
        let mut state = self.state.lock();
        if !state.signaling.can_create_offer() {
            return Err(BridgeError::Negotiation(format!(
                "cannot create offer in state {}",
                state.signaling
            )));
        }
        Ok(self.render_sdp(&mut state, "actpass"))
    }

    fn create_answer(&self) -> Result<String> {
        let mut state = self.state.lock();
        if !state.signaling.can_create_answer() {
            return Err(BridgeError::Negotiation(format!(
                "cannot create answer in state {}",
                state.signaling
            )));
        }
        Ok(self.render_sdp(&mut state, "active"))
    }

    fn set_local_description(&self, desc: &SessionDescription) -> Result<()> {
        Self::check_sdp(desc)?;
        let (next, changed, gather, policy) = {
            let mut state = self.state.lock();
            let next = state.signaling.after_local(desc.sdp_type()).ok_or_else(|| {
                BridgeError::DescriptionRejected(format!(
                    "cannot apply local {} in state {}",
                    desc.sdp_type(),
                    state.signaling
                ))
            })?;

            if desc.sdp_type() == SdpType::Rollback {
                state.local = state.stable_local.clone();
            } else {
                state.local = Some(desc.clone());
            }
            if next == SignalingState::Stable {
                state.stable_local = state.local.clone();
                state.stable_remote = state.remote.clone();
            }

            let changed = next != state.signaling;
            state.signaling = next;
            let gather = desc.sdp_type() != SdpType::Rollback && state.gathering == IceGatheringState::New;
            (next, changed, gather, state.config.ice_transport_policy)
        };

        if changed {
            self.emit(SessionEvent::SignalingStateChange(next));
        }
        if gather {
            self.gather(policy);
        }
        Ok(())
    }

    fn set_remote_description(&self, desc: &SessionDescription) -> Result<()> {
        Self::check_sdp(desc)?;
        let (next, changed) = {
            let mut state = self.state.lock();
            let next = state.signaling.after_remote(desc.sdp_type()).ok_or_else(|| {
                BridgeError::DescriptionRejected(format!(
                    "cannot apply remote {} in state {}",
                    desc.sdp_type(),
                    state.signaling
                ))
            })?;

            if desc.sdp_type() == SdpType::Rollback {
                state.remote = state.stable_remote.clone();
            } else {
                state.remote = Some(desc.clone());
            }
            if next == SignalingState::Stable {
                state.stable_local = state.local.clone();
                state.stable_remote = state.remote.clone();
            }

            let changed = next != state.signaling;
            state.signaling = next;
            (next, changed)
        };

        if changed {
            self.emit(SessionEvent::SignalingStateChange(next));
        }
        Ok(())
    }

    fn local_description(&self) -> Option<SessionDescription> {
        self.state.lock().local.clone()
    }

    fn remote_description(&self) -> Option<SessionDescription> {
        self.state.lock().remote.clone()
    }

    fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        let mut state = self.state.lock();
        if state.signaling == SignalingState::Closed {
            return Err(BridgeError::CandidateRejected("session is closed".into()));
        }
        if state.remote.is_none() {
            return Err(BridgeError::CandidateRejected("no remote description".into()));
        }
        // Empty candidate text marks end-of-candidates
        if !candidate.candidate.is_empty() && !candidate.candidate.starts_with("candidate:") {
            return Err(BridgeError::CandidateRejected(format!(
                "malformed candidate '{}'",
                candidate.candidate
            )));
        }
        state.remote_candidates.push(candidate.clone());
        Ok(())
    }

    fn set_configuration(&self, config: &Configuration) -> Result<()> {
        let mut state = self.state.lock();
        if state.signaling == SignalingState::Closed {
            return Err(BridgeError::Engine("session is closed".into()));
        }
        if config.bundle_policy != state.config.bundle_policy {
            return Err(BridgeError::Engine("bundle policy cannot be modified".into()));
        }
        state.config = config.clone();
        Ok(())
    }

    fn signaling_state(&self) -> SignalingState {
        self.state.lock().signaling
    }

    fn ice_gathering_state(&self) -> IceGatheringState {
        self.state.lock().gathering
    }

    fn ice_connection_state(&self) -> IceConnectionState {
        self.state.lock().connection
    }

    fn create_data_channel(&self, label: &str, init: &DataChannelInit) -> Result<Arc<dyn EngineChannel>> {
        if label.len() > MAX_LABEL_LEN {
            return Err(BridgeError::Engine("data channel label too long".into()));
        }
        let (channel, first) = {
            let mut state = self.state.lock();
            if state.signaling == SignalingState::Closed {
                return Err(BridgeError::Engine("session is closed".into()));
            }
            let id = init.id.unwrap_or_else(|| {
                let id = state.next_stream_id * 2;
                state.next_stream_id += 1;
                id
            });
            let channel = LoopbackChannel::new(label, init, Some(id));
            let first = state.channels.is_empty();
            state.channels.push(channel.clone());
            (channel, first)
        };

        if first {
            self.emit(SessionEvent::NegotiationNeeded);
        }
        Ok(channel)
    }

    fn create_media_stream(&self, label: &str) -> Result<Arc<dyn EngineMediaStream>> {
        Ok(LoopbackMediaStream::new(label))
    }

    fn close(&self) {
        let late = {
            let mut state = self.state.lock();
            if state.signaling == SignalingState::Closed {
                return;
            }
            state.signaling = SignalingState::Closed;
            state.connection = IceConnectionState::Closed;
            let late = std::mem::take(&mut state.announce_on_close);
            state.channels.extend(late.iter().cloned());
            late
        };
        for channel in late {
            self.emit(SessionEvent::DataChannel(channel));
        }

        let channels = std::mem::take(&mut self.state.lock().channels);
        for channel in channels {
            channel.close();
        }
        self.gate.retire();
    }
}
