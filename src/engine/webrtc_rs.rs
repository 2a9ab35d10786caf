//! Engine backed by webrtc-rs.
//!
//! Host calls block on the shared tokio runtime. webrtc-rs raises its
//! handlers on runtime worker threads; each one is forwarded through a
//! [`RetireGate`] so nothing reaches the host after close/unbind returns.
//! A handler may call back into sessions and channels: on a worker thread
//! the call moves off the worker with `block_in_place` before blocking.
//! Closing a session from its own handler is still not allowed.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::api::API;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_gathering_state::RTCIceGatheringState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::ice_transport_policy::RTCIceTransportPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;

use super::{
    ChannelEvent, EngineAudioTrack, EngineChannel, EngineMediaStream, EnginePeer, NegotiationEngine,
    RetireGate, SessionEvent,
};
use crate::channel::{deliver_channel_event, DataChannelInit, DataState};
use crate::error::{BridgeError, Result};
use crate::ice::{BundlePolicy, Configuration, IceCandidate, IceServer, IceTransportPolicy};
use crate::peer::{deliver_session_event, IceConnectionState, IceGatheringState, SignalingState};
use crate::registry::Handle;
use crate::sdp::SessionDescription;
use crate::RUNTIME;

/// Run `fut` to completion on the shared runtime from any thread.
///
/// Inside a multi-thread runtime (our own handlers included) the worker is
/// handed over first, as blocking it directly panics.
fn block_on<F: Future>(fut: F) -> F::Output {
    match tokio::runtime::Handle::try_current() {
        Ok(current) if current.runtime_flavor() == tokio::runtime::RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(|| RUNTIME.handle().block_on(fut))
        }
        _ => RUNTIME.block_on(fut),
    }
}

fn engine_err(context: &str, e: impl std::fmt::Display) -> BridgeError {
    BridgeError::Engine(format!("{}: {}", context, e))
}

fn to_rtc_ice_server(server: &IceServer) -> RTCIceServer {
    RTCIceServer {
        urls: server.urls.clone(),
        username: server.username.clone().unwrap_or_default(),
        credential: server.credential.clone().unwrap_or_default(),
        ..Default::default()
    }
}

fn to_rtc_config(config: &Configuration) -> Result<RTCConfiguration> {
    let ice_transport_policy = match config.ice_transport_policy {
        IceTransportPolicy::All => RTCIceTransportPolicy::All,
        IceTransportPolicy::Relay => RTCIceTransportPolicy::Relay,
        IceTransportPolicy::None => {
            return Err(BridgeError::Engine(
                "ICE transport policy 'none' is not supported by webrtc-rs".into(),
            ))
        }
    };
    let bundle_policy = match config.bundle_policy {
        BundlePolicy::Balanced => RTCBundlePolicy::Balanced,
        BundlePolicy::MaxBundle => RTCBundlePolicy::MaxBundle,
        BundlePolicy::MaxCompat => RTCBundlePolicy::MaxCompat,
    };
    Ok(RTCConfiguration {
        ice_servers: config.ice_servers.iter().map(to_rtc_ice_server).collect(),
        ice_transport_policy,
        bundle_policy,
        ..Default::default()
    })
}

// Both sides share the {"type","sdp"} JSON form.
fn to_rtc_description(desc: &SessionDescription) -> Result<RTCSessionDescription> {
    serde_json::from_str(&desc.serialize())
        .map_err(|e| BridgeError::DescriptionRejected(format!("Invalid description: {}", e)))
}

fn from_rtc_description(desc: &RTCSessionDescription) -> Option<SessionDescription> {
    serde_json::to_string(desc)
        .ok()
        .and_then(|json| SessionDescription::deserialize(&json))
}

fn signaling_state(s: RTCSignalingState) -> SignalingState {
    match s {
        RTCSignalingState::HaveLocalOffer => SignalingState::HaveLocalOffer,
        RTCSignalingState::HaveLocalPranswer => SignalingState::HaveLocalPrAnswer,
        RTCSignalingState::HaveRemoteOffer => SignalingState::HaveRemoteOffer,
        RTCSignalingState::HaveRemotePranswer => SignalingState::HaveRemotePrAnswer,
        RTCSignalingState::Closed => SignalingState::Closed,
        _ => SignalingState::Stable,
    }
}

fn ice_connection_state(s: RTCIceConnectionState) -> IceConnectionState {
    match s {
        RTCIceConnectionState::Checking => IceConnectionState::Checking,
        RTCIceConnectionState::Connected => IceConnectionState::Connected,
        RTCIceConnectionState::Completed => IceConnectionState::Completed,
        RTCIceConnectionState::Failed => IceConnectionState::Failed,
        RTCIceConnectionState::Disconnected => IceConnectionState::Disconnected,
        RTCIceConnectionState::Closed => IceConnectionState::Closed,
        _ => IceConnectionState::New,
    }
}

fn data_state(s: RTCDataChannelState) -> DataState {
    match s {
        RTCDataChannelState::Open => DataState::Open,
        RTCDataChannelState::Closing => DataState::Closing,
        RTCDataChannelState::Closed => DataState::Closed,
        _ => DataState::Connecting,
    }
}

/// webrtc-rs API shared by every session it creates.
pub struct WebRtcEngine {
    api: API,
}

impl WebRtcEngine {
    pub fn new() -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| engine_err("Failed to register codecs", e))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| engine_err("Failed to register interceptors", e))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self { api })
    }
}

impl NegotiationEngine for WebRtcEngine {
    fn create_peer(&self, handle: Handle, config: &Configuration) -> Result<Arc<dyn EnginePeer>> {
        let rtc_config = to_rtc_config(config)?;
        let pc = block_on(self.api.new_peer_connection(rtc_config))
            .map_err(|e| engine_err("Failed to create peer connection", e))?;
        Ok(WebRtcPeer::wire(handle, Arc::new(pc)))
    }

    fn create_audio_track(&self, _label: &str, _source: Handle) -> Result<Arc<dyn EngineAudioTrack>> {
        Err(BridgeError::Engine("audio tracks are not supported by the webrtc-rs engine".into()))
    }
}

pub struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
    gate: Arc<RetireGate>,
}

impl WebRtcPeer {
    /// Install forwarding handlers for every session event.
    fn wire(handle: Handle, pc: Arc<RTCPeerConnection>) -> Arc<Self> {
        let gate = Arc::new(RetireGate::new());

        let g = gate.clone();
        pc.on_negotiation_needed(Box::new(move || {
            g.deliver(|| deliver_session_event(handle, SessionEvent::NegotiationNeeded));
            Box::pin(async {})
        }));

        let g = gate.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            if let Some(init) = candidate.and_then(|c| c.to_json().ok()) {
                let candidate = IceCandidate::new(
                    init.candidate,
                    init.sdp_mid.unwrap_or_default(),
                    init.sdp_mline_index.map_or(0, i32::from),
                );
                g.deliver(|| deliver_session_event(handle, SessionEvent::IceCandidate(candidate)));
            }
            Box::pin(async {})
        }));

        let g = gate.clone();
        pc.on_signaling_state_change(Box::new(move |s: RTCSignalingState| {
            let state = signaling_state(s);
            g.deliver(|| deliver_session_event(handle, SessionEvent::SignalingStateChange(state)));
            Box::pin(async {})
        }));

        let g = gate.clone();
        pc.on_ice_connection_state_change(Box::new(move |s: RTCIceConnectionState| {
            let state = ice_connection_state(s);
            g.deliver(|| deliver_session_event(handle, SessionEvent::IceConnectionStateChange(state)));
            Box::pin(async {})
        }));

        let g = gate.clone();
        pc.on_ice_gathering_state_change(Box::new(move |s: RTCIceGathererState| {
            let state = match s {
                RTCIceGathererState::Gathering => Some(IceGatheringState::Gathering),
                RTCIceGathererState::Complete => Some(IceGatheringState::Complete),
                RTCIceGathererState::New => Some(IceGatheringState::New),
                _ => None,
            };
            if let Some(state) = state {
                g.deliver(|| deliver_session_event(handle, SessionEvent::IceGatheringStateChange(state)));
            }
            Box::pin(async {})
        }));

        let g = gate.clone();
        pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let limits = ChannelLimits::reported(&dc);
            let channel = WebRtcChannel::wire(dc, limits);
            g.deliver(|| deliver_session_event(handle, SessionEvent::DataChannel(channel)));
            Box::pin(async {})
        }));

        Arc::new(Self { pc, gate })
    }
}

impl EnginePeer for WebRtcPeer {
    fn create_offer(&self) -> Result<String> {
        let offer = block_on(self.pc.create_offer(None))
            .map_err(|e| BridgeError::Negotiation(format!("Failed to create offer: {}", e)))?;
        Ok(offer.sdp)
    }

    fn create_answer(&self) -> Result<String> {
        let answer = block_on(self.pc.create_answer(None))
            .map_err(|e| BridgeError::Negotiation(format!("Failed to create answer: {}", e)))?;
        Ok(answer.sdp)
    }

    fn set_local_description(&self, desc: &SessionDescription) -> Result<()> {
        let rtc = to_rtc_description(desc)?;
        block_on(self.pc.set_local_description(rtc))
            .map_err(|e| BridgeError::DescriptionRejected(format!("Failed to set local description: {}", e)))
    }

    fn set_remote_description(&self, desc: &SessionDescription) -> Result<()> {
        let rtc = to_rtc_description(desc)?;
        block_on(self.pc.set_remote_description(rtc))
            .map_err(|e| BridgeError::DescriptionRejected(format!("Failed to set remote description: {}", e)))
    }

    fn local_description(&self) -> Option<SessionDescription> {
        block_on(self.pc.local_description())
            .as_ref()
            .and_then(from_rtc_description)
    }

    fn remote_description(&self) -> Option<SessionDescription> {
        block_on(self.pc.remote_description())
            .as_ref()
            .and_then(from_rtc_description)
    }

    fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate.clone(),
            sdp_mid: Some(candidate.sdp_mid.clone()),
            sdp_mline_index: u16::try_from(candidate.sdp_mline_index).ok(),
            username_fragment: None,
        };
        block_on(self.pc.add_ice_candidate(init))
            .map_err(|e| BridgeError::CandidateRejected(format!("Failed to add ICE candidate: {}", e)))
    }

    fn set_configuration(&self, config: &Configuration) -> Result<()> {
        // webrtc-rs only accepts a configuration at construction
        to_rtc_config(config)?;
        Err(BridgeError::Engine(
            "configuration changes are not supported by the webrtc-rs engine".into(),
        ))
    }

    fn signaling_state(&self) -> SignalingState {
        signaling_state(self.pc.signaling_state())
    }

    fn ice_gathering_state(&self) -> IceGatheringState {
        match self.pc.ice_gathering_state() {
            RTCIceGatheringState::Gathering => IceGatheringState::Gathering,
            RTCIceGatheringState::Complete => IceGatheringState::Complete,
            _ => IceGatheringState::New,
        }
    }

    fn ice_connection_state(&self) -> IceConnectionState {
        ice_connection_state(self.pc.ice_connection_state())
    }

    fn create_data_channel(&self, label: &str, init: &DataChannelInit) -> Result<Arc<dyn EngineChannel>> {
        let options = RTCDataChannelInit {
            ordered: Some(init.ordered),
            max_packet_life_time: init.max_packet_life_time,
            max_retransmits: init.max_retransmits,
            protocol: Some(init.protocol.clone()),
            negotiated: if init.negotiated { init.id } else { None },
        };
        let dc = block_on(self.pc.create_data_channel(label, Some(options)))
            .map_err(|e| engine_err("Failed to create data channel", e))?;
        let limits = ChannelLimits {
            max_packet_life_time: init.max_packet_life_time,
            max_retransmits: init.max_retransmits,
        };
        Ok(WebRtcChannel::wire(dc, limits))
    }

    fn create_media_stream(&self, _label: &str) -> Result<Arc<dyn EngineMediaStream>> {
        Err(BridgeError::Engine("media streams are not supported by the webrtc-rs engine".into()))
    }

    fn close(&self) {
        if let Err(e) = block_on(self.pc.close()) {
            log::warn!("Failed to close peer connection: {}", e);
        }
        self.gate.retire();
    }
}

type Binding = Arc<RwLock<Option<Handle>>>;

fn emit(binding: &Binding, event: ChannelEvent) {
    let bound = binding.read_recursive();
    if let Some(handle) = *bound {
        deliver_channel_event(handle, event);
    }
}

/// Partial reliability settings. webrtc-rs reports unset values as 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ChannelLimits {
    max_packet_life_time: Option<u16>,
    max_retransmits: Option<u16>,
}

impl ChannelLimits {
    fn reported(dc: &RTCDataChannel) -> Self {
        Self::from_raw(dc.max_packet_lifetime(), dc.max_retransmits())
    }

    fn from_raw(max_packet_life_time: u16, max_retransmits: u16) -> Self {
        Self {
            max_packet_life_time: Some(max_packet_life_time).filter(|v| *v != 0),
            max_retransmits: Some(max_retransmits).filter(|v| *v != 0),
        }
    }
}

pub struct WebRtcChannel {
    dc: Arc<RTCDataChannel>,
    binding: Binding,
    limits: ChannelLimits,
}

impl WebRtcChannel {
    fn wire(dc: Arc<RTCDataChannel>, limits: ChannelLimits) -> Arc<Self> {
        let binding: Binding = Arc::new(RwLock::new(None));

        let b = binding.clone();
        dc.on_open(Box::new(move || {
            emit(&b, ChannelEvent::StateChange(DataState::Open));
            Box::pin(async {})
        }));

        let b = binding.clone();
        dc.on_close(Box::new(move || {
            emit(&b, ChannelEvent::StateChange(DataState::Closed));
            Box::pin(async {})
        }));

        let b = binding.clone();
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            emit(&b, ChannelEvent::Message(msg.data));
            Box::pin(async {})
        }));

        // The host applies its own threshold; report every drain to zero.
        // Spawned because remote channels are wired from a runtime worker.
        let b = binding.clone();
        let low = dc.clone();
        RUNTIME.spawn(async move {
            low.set_buffered_amount_low_threshold(0).await;
            low.on_buffered_amount_low(Box::new(move || {
                emit(&b, ChannelEvent::BufferedAmountChange(0));
                Box::pin(async {})
            }))
            .await;
        });

        Arc::new(Self { dc, binding, limits })
    }
}

impl EngineChannel for WebRtcChannel {
    fn bind(&self, handle: Handle) {
        *self.binding.write() = Some(handle);
    }

    fn unbind(&self) {
        *self.binding.write() = None;
    }

    fn send(&self, data: &[u8], is_binary: bool) {
        let result = if is_binary {
            block_on(self.dc.send(&Bytes::copy_from_slice(data)))
        } else {
            block_on(self.dc.send_text(String::from_utf8_lossy(data).into_owned()))
        };
        match result {
            Ok(_) => {
                let amount = block_on(self.dc.buffered_amount());
                emit(&self.binding, ChannelEvent::BufferedAmountChange(amount));
            }
            Err(e) => log::warn!("DataChannel '{}': send failed: {}", self.dc.label(), e),
        }
    }

    fn close(&self) {
        if let Err(e) = block_on(self.dc.close()) {
            log::warn!("DataChannel '{}': close failed: {}", self.dc.label(), e);
        }
    }

    fn label(&self) -> String {
        self.dc.label().to_string()
    }

    fn ordered(&self) -> bool {
        self.dc.ordered()
    }

    fn protocol(&self) -> String {
        self.dc.protocol().to_string()
    }

    fn negotiated(&self) -> bool {
        self.dc.negotiated()
    }

    fn id(&self) -> Option<u16> {
        Some(self.dc.id())
    }

    fn max_packet_life_time(&self) -> Option<u16> {
        self.limits.max_packet_life_time
    }

    fn max_retransmits(&self) -> Option<u16> {
        self.limits.max_retransmits
    }

    fn ready_state(&self) -> DataState {
        data_state(self.dc.ready_state())
    }

    fn buffered_amount(&self) -> usize {
        block_on(self.dc.buffered_amount())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::DataChannel;
    use crate::peer::PeerConnection;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn open_session() -> PeerConnection {
        let engine = WebRtcEngine::new().unwrap();
        PeerConnection::new(&engine, Configuration::new()).unwrap()
    }

    #[test]
    fn test_config_mapping() {
        let config = Configuration::new()
            .with_ice_server(IceServer::turn("turn:relay.example.org", "u", "p"))
            .with_bundle_policy(BundlePolicy::MaxBundle);
        let rtc = to_rtc_config(&config).unwrap();
        assert_eq!(rtc.ice_servers[0].username, "u");
        assert_eq!(rtc.bundle_policy, RTCBundlePolicy::MaxBundle);
        assert_eq!(rtc.ice_transport_policy, RTCIceTransportPolicy::All);

        let none = config.with_ice_transport_policy(IceTransportPolicy::None);
        assert!(to_rtc_config(&none).is_err());
    }

    #[test]
    fn test_description_json_bridge() {
        let desc = SessionDescription::answer("v=0\r\n");
        let rtc = to_rtc_description(&desc).unwrap();
        assert_eq!(rtc.sdp, "v=0\r\n");
        assert_eq!(from_rtc_description(&rtc), Some(desc));
    }

    #[test]
    fn test_reported_limits_treat_zero_as_unset() {
        assert_eq!(ChannelLimits::from_raw(0, 0), ChannelLimits::default());
        assert_eq!(
            ChannelLimits::from_raw(0, 3),
            ChannelLimits {
                max_packet_life_time: None,
                max_retransmits: Some(3),
            }
        );
    }

    #[test]
    fn test_channel_limits_follow_init() {
        let pc = open_session();
        let plain = pc.create_data_channel("plain", DataChannelInit::default()).unwrap();
        assert_eq!(plain.max_retransmits(), None);
        assert_eq!(plain.max_packet_life_time(), None);

        let lossy = pc
            .create_data_channel("lossy", DataChannelInit::default().with_max_retransmits(3))
            .unwrap();
        assert_eq!(lossy.max_retransmits(), Some(3));
        assert_eq!(lossy.max_packet_life_time(), None);
    }

    #[test]
    fn test_set_configuration_is_refused() {
        let pc = open_session();
        let before = pc.get_configuration();
        let relay = Configuration::new().with_ice_transport_policy(IceTransportPolicy::Relay);
        assert!(matches!(pc.set_configuration(relay), Err(BridgeError::Engine(_))));
        assert_eq!(pc.get_configuration(), before);
    }

    #[test]
    fn test_handler_may_call_back_from_worker() {
        let pc = open_session();
        let channel = pc.create_data_channel("echo", DataChannelInit::default()).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let c = calls.clone();
        let inner: DataChannel = channel.clone();
        channel.on_open(move || {
            inner.send_text("hello");
            let _ = inner.buffered_amount();
            c.fetch_add(1, Ordering::SeqCst);
        });

        // Deliver the open event from a runtime worker, as webrtc-rs does
        let handle = channel.handle();
        let delivery = RUNTIME.spawn(async move {
            deliver_channel_event(handle, ChannelEvent::StateChange(DataState::Open));
        });
        assert!(block_on(delivery).is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Blocking calls from plain async code on the runtime work too
        let amount = RUNTIME.spawn(async move { channel.buffered_amount() });
        assert!(block_on(amount).is_ok());
        pc.close();
    }
}
