//! Host side of one negotiation session.
//!
//! A [`PeerConnection`] registers itself before the engine learns about it,
//! keeps host mirrors of the configuration and descriptions, and turns
//! engine events (delivered by handle from engine threads) into calls of the
//! optional handlers installed with the `on_*` methods.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lazy_static::lazy_static;
use parking_lot::{Mutex, RwLock};

use super::state::{IceConnectionState, IceGatheringState, PeerConnectionState, SignalingState};
use crate::bridge::HandlerSlot;
use crate::channel::{DataChannel, DataChannelInit};
use crate::engine::{EnginePeer, NegotiationEngine, SessionEvent};
use crate::error::{BridgeError, Result};
use crate::ice::{Configuration, IceCandidate};
use crate::media::MediaStream;
use crate::registry::{Handle, HandleRegistry};
use crate::sdp::{SdpType, SessionDescription};

lazy_static! {
    static ref PEERS: HandleRegistry<Arc<PeerShared>> = HandleRegistry::new();
}

#[derive(Default)]
struct PeerHandlers {
    negotiation_needed: HandlerSlot<()>,
    ice_candidate: HandlerSlot<IceCandidate>,
    ice_candidate_error: HandlerSlot<()>,
    ice_complete: HandlerSlot<()>,
    signaling_state_change: HandlerSlot<SignalingState>,
    ice_connection_state_change: HandlerSlot<IceConnectionState>,
    ice_gathering_state_change: HandlerSlot<IceGatheringState>,
    connection_state_change: HandlerSlot<PeerConnectionState>,
    data_channel: HandlerSlot<DataChannel>,
}

impl PeerHandlers {
    fn clear(&self) {
        self.negotiation_needed.clear();
        self.ice_candidate.clear();
        self.ice_candidate_error.clear();
        self.ice_complete.clear();
        self.signaling_state_change.clear();
        self.ice_connection_state_change.clear();
        self.ice_gathering_state_change.clear();
        self.connection_state_change.clear();
        self.data_channel.clear();
    }
}

struct PeerShared {
    handle: Handle,
    native: RwLock<Option<Arc<dyn EnginePeer>>>,
    closed: AtomicBool,
    ice_complete_fired: AtomicBool,
    config: RwLock<Configuration>,
    local_description: RwLock<Option<SessionDescription>>,
    remote_description: RwLock<Option<SessionDescription>>,
    ice_gathering_state: Mutex<IceGatheringState>,
    ice_connection_state: Mutex<IceConnectionState>,
    connection_state: Mutex<PeerConnectionState>,
    channels: Mutex<Vec<DataChannel>>,
    handlers: PeerHandlers,
}

impl PeerShared {
    fn dispatch(&self, event: SessionEvent) {
        match event {
            SessionEvent::NegotiationNeeded => {
                log::debug!("PeerConnection {}: negotiation needed", self.handle);
                self.handlers.negotiation_needed.fire(());
            }
            SessionEvent::IceCandidate(candidate) => {
                log::debug!("PeerConnection {}: local candidate {}", self.handle, candidate.candidate);
                self.handlers.ice_candidate.fire(candidate);
            }
            SessionEvent::IceCandidateError => {
                log::debug!("PeerConnection {}: ICE candidate error", self.handle);
                self.handlers.ice_candidate_error.fire(());
            }
            SessionEvent::SignalingStateChange(state) => {
                log::debug!("PeerConnection {}: signaling state {}", self.handle, state);
                self.handlers.signaling_state_change.fire(state);
            }
            SessionEvent::IceConnectionStateChange(state) => {
                log::debug!("PeerConnection {}: ICE connection state {}", self.handle, state);
                *self.ice_connection_state.lock() = state;
                self.handlers.ice_connection_state_change.fire(state);

                match PeerConnectionState::from_ice(state) {
                    Some(aggregate) => {
                        *self.connection_state.lock() = aggregate;
                        self.handlers.connection_state_change.fire(aggregate);
                    }
                    None => {
                        log::warn!(
                            "PeerConnection {}: ICE connection state {} has no aggregate connection state",
                            self.handle,
                            state
                        );
                    }
                }
            }
            SessionEvent::IceGatheringStateChange(state) => {
                log::debug!("PeerConnection {}: ICE gathering state {}", self.handle, state);
                *self.ice_gathering_state.lock() = state;
                self.handlers.ice_gathering_state_change.fire(state);
                // Once per session, a later gathering round is not reported
                if state == IceGatheringState::Complete && !self.ice_complete_fired.swap(true, Ordering::AcqRel) {
                    self.handlers.ice_complete.fire(());
                }
            }
            SessionEvent::DataChannel(native) => {
                let channel = DataChannel::adopt(native);
                log::info!("PeerConnection {}: remote DataChannel {}", self.handle, channel.handle());
                self.channels.lock().push(channel.clone());
                self.handlers.data_channel.fire(channel);
            }
        }
    }
}

/// One offer/answer session.
///
/// Dropping it closes the session.
pub struct PeerConnection {
    shared: Arc<PeerShared>,
}

impl PeerConnection {
    /// Create a session on `engine`.
    ///
    /// The session is registered before the engine is asked for its native
    /// side, so events raised during creation already resolve. On failure
    /// the handle is released again and nothing is left behind.
    pub fn new(engine: &dyn NegotiationEngine, config: Configuration) -> Result<Self> {
        config.validate()?;

        let (handle, shared) = PEERS.set_with(|handle| {
            Arc::new(PeerShared {
                handle,
                native: RwLock::new(None),
                closed: AtomicBool::new(false),
                ice_complete_fired: AtomicBool::new(false),
                config: RwLock::new(config.clone()),
                local_description: RwLock::new(None),
                remote_description: RwLock::new(None),
                ice_gathering_state: Mutex::new(IceGatheringState::New),
                ice_connection_state: Mutex::new(IceConnectionState::New),
                connection_state: Mutex::new(PeerConnectionState::New),
                channels: Mutex::new(Vec::new()),
                handlers: PeerHandlers::default(),
            })
        });

        let native = match engine.create_peer(handle, &config) {
            Ok(native) => native,
            Err(e) => {
                PEERS.delete(handle);
                log::warn!("Failed to create PeerConnection: {}", e);
                return Err(e);
            }
        };
        *shared.native.write() = Some(native);

        log::info!("PeerConnection {} created", handle);
        Ok(Self { shared })
    }

    pub fn handle(&self) -> Handle {
        self.shared.handle
    }

    fn native(&self) -> Result<Arc<dyn EnginePeer>> {
        self.shared
            .native
            .read()
            .clone()
            .ok_or_else(|| BridgeError::Negotiation("PeerConnection is closed".into()))
    }

    /// Ask the engine for an offer. Does not change the signaling state.
    ///
    /// Blocks until the engine is done; must not be called from inside a
    /// handler of this session.
    pub fn create_offer(&self) -> Result<SessionDescription> {
        let sdp = self.native()?.create_offer()?;
        Ok(SessionDescription::offer(sdp))
    }

    /// Ask the engine for an answer to the applied remote offer.
    ///
    /// Same blocking rules as [`PeerConnection::create_offer`].
    pub fn create_answer(&self) -> Result<SessionDescription> {
        let sdp = self.native()?.create_answer()?;
        Ok(SessionDescription::answer(sdp))
    }

    pub fn set_local_description(&self, desc: &SessionDescription) -> Result<()> {
        check_description(desc)?;
        let native = self.native().map_err(BridgeError::into_description_rejected)?;
        native
            .set_local_description(desc)
            .map_err(BridgeError::into_description_rejected)?;

        *self.shared.local_description.write() = match desc.sdp_type() {
            SdpType::Rollback => native.local_description(),
            _ => Some(desc.clone()),
        };
        Ok(())
    }

    pub fn set_remote_description(&self, desc: &SessionDescription) -> Result<()> {
        check_description(desc)?;
        let native = self.native().map_err(BridgeError::into_description_rejected)?;
        native
            .set_remote_description(desc)
            .map_err(BridgeError::into_description_rejected)?;

        *self.shared.remote_description.write() = match desc.sdp_type() {
            SdpType::Rollback => native.remote_description(),
            _ => Some(desc.clone()),
        };
        Ok(())
    }

    /// Last successfully applied local description.
    ///
    /// The SDP text is refreshed from the engine, which may have appended
    /// gathered candidates.
    pub fn local_description(&self) -> Option<SessionDescription> {
        let mirror = self.shared.local_description.read().clone()?;
        Some(self.refreshed(mirror, |n| n.local_description()))
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        let mirror = self.shared.remote_description.read().clone()?;
        Some(self.refreshed(mirror, |n| n.remote_description()))
    }

    fn refreshed<F>(&self, mirror: SessionDescription, current: F) -> SessionDescription
    where
        F: FnOnce(&dyn EnginePeer) -> Option<SessionDescription>,
    {
        let Ok(native) = self.native() else {
            return mirror;
        };
        match current(native.as_ref()) {
            Some(live) if live.sdp_type() == mirror.sdp_type() => mirror.with_sdp(live.sdp().to_string()),
            _ => mirror,
        }
    }

    pub fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        let native = self.native().map_err(BridgeError::into_candidate_rejected)?;
        native
            .add_ice_candidate(candidate)
            .map_err(BridgeError::into_candidate_rejected)
    }

    /// Host mirror of the configuration last accepted by the engine.
    pub fn get_configuration(&self) -> Configuration {
        self.shared.config.read().clone()
    }

    pub fn set_configuration(&self, config: Configuration) -> Result<()> {
        config.validate()?;
        let native = self
            .native()
            .map_err(|_| BridgeError::Engine("PeerConnection is closed".into()))?;
        native.set_configuration(&config)?;
        *self.shared.config.write() = config;
        Ok(())
    }

    pub fn signaling_state(&self) -> SignalingState {
        match self.native() {
            Ok(native) => native.signaling_state(),
            Err(_) => SignalingState::Closed,
        }
    }

    pub fn ice_gathering_state(&self) -> IceGatheringState {
        match self.native() {
            Ok(native) => native.ice_gathering_state(),
            Err(_) => *self.shared.ice_gathering_state.lock(),
        }
    }

    pub fn ice_connection_state(&self) -> IceConnectionState {
        match self.native() {
            Ok(native) => native.ice_connection_state(),
            Err(_) => *self.shared.ice_connection_state.lock(),
        }
    }

    /// Aggregate state derived from the last reported ICE connection state.
    pub fn connection_state(&self) -> PeerConnectionState {
        *self.shared.connection_state.lock()
    }

    /// Create a locally initiated channel. It starts in Connecting.
    pub fn create_data_channel(&self, label: &str, init: DataChannelInit) -> Result<DataChannel> {
        init.validate()?;
        let native = self
            .native()
            .map_err(|_| BridgeError::Engine("PeerConnection is closed".into()))?;
        let channel = DataChannel::adopt(native.create_data_channel(label, &init)?);
        self.shared.channels.lock().push(channel.clone());
        Ok(channel)
    }

    /// Close a channel and release its handle.
    pub fn delete_data_channel(&self, channel: &DataChannel) {
        channel.close();
        channel.release();
        self.shared.channels.lock().retain(|c| !c.ptr_eq(channel));
    }

    pub fn data_channels(&self) -> Vec<DataChannel> {
        self.shared.channels.lock().clone()
    }

    pub fn new_media_stream(&self, label: &str) -> Result<MediaStream> {
        let native = self
            .native()
            .map_err(|_| BridgeError::Engine("PeerConnection is closed".into()))?;
        Ok(MediaStream::from_native(native.create_media_stream(label)?))
    }

    pub fn on_negotiation_needed<F: Fn() + Send + Sync + 'static>(&self, f: F) {
        self.shared.handlers.negotiation_needed.set(move |()| f());
    }

    pub fn on_ice_candidate<F: Fn(IceCandidate) + Send + Sync + 'static>(&self, f: F) {
        self.shared.handlers.ice_candidate.set(f);
    }

    pub fn on_ice_candidate_error<F: Fn() + Send + Sync + 'static>(&self, f: F) {
        self.shared.handlers.ice_candidate_error.set(move |()| f());
    }

    /// Fires when gathering completes, right after the gathering state
    /// handler sees `Complete`.
    pub fn on_ice_complete<F: Fn() + Send + Sync + 'static>(&self, f: F) {
        self.shared.handlers.ice_complete.set(move |()| f());
    }

    pub fn on_signaling_state_change<F: Fn(SignalingState) + Send + Sync + 'static>(&self, f: F) {
        self.shared.handlers.signaling_state_change.set(f);
    }

    pub fn on_ice_connection_state_change<F: Fn(IceConnectionState) + Send + Sync + 'static>(&self, f: F) {
        self.shared.handlers.ice_connection_state_change.set(f);
    }

    pub fn on_ice_gathering_state_change<F: Fn(IceGatheringState) + Send + Sync + 'static>(&self, f: F) {
        self.shared.handlers.ice_gathering_state_change.set(f);
    }

    pub fn on_connection_state_change<F: Fn(PeerConnectionState) + Send + Sync + 'static>(&self, f: F) {
        self.shared.handlers.connection_state_change.set(f);
    }

    /// Fires for channels opened by the remote side. The channel is already
    /// registered when the handler runs.
    pub fn on_data_channel<F: Fn(DataChannel) + Send + Sync + 'static>(&self, f: F) {
        self.shared.handlers.data_channel.set(f);
    }

    /// Close the session.
    ///
    /// Channels are closed and released, then the engine closes its side,
    /// and only then is the session handle released. Channels the engine
    /// announced while closing are released as well. Calling it again does
    /// nothing. Must not be called from inside a handler of this session.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.release_channels();

        let native = self.shared.native.write().take();
        if let Some(native) = native {
            native.close();
        }
        // No delivery can run past the engine close
        self.release_channels();

        PEERS.delete(self.shared.handle);
        // Handlers often capture clones of this session
        self.shared.handlers.clear();
        log::info!("PeerConnection {} closed", self.shared.handle);
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    fn release_channels(&self) {
        let channels = std::mem::take(&mut *self.shared.channels.lock());
        for channel in &channels {
            channel.close();
            channel.release();
        }
    }
}

impl Drop for PeerConnection {
    fn drop(&mut self) {
        self.close();
    }
}

/// Empty SDP text stands in for a missing description.
fn check_description(desc: &SessionDescription) -> Result<()> {
    if desc.sdp_type() != SdpType::Rollback && desc.sdp().is_empty() {
        return Err(BridgeError::InvalidArgument("session description has no SDP".into()));
    }
    Ok(())
}

/// Engine entry point for session events.
///
/// # Panics
///
/// Panics if `handle` is not a live session.
pub fn deliver_session_event(handle: Handle, event: SessionEvent) {
    let shared = PEERS.get(handle);
    shared.dispatch(event);
}

#[cfg(test)]
pub(crate) fn is_peer_registered(handle: Handle) -> bool {
    PEERS.contains(handle)
}
