//! Data channels.
//!
//! Each [`DataChannel`] lives in its own handle space so the engine can
//! announce channels the host never asked for. The ready state is a host
//! mirror that only moves forward along Connecting, Open, Closing, Closed.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use lazy_static::lazy_static;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::bridge::HandlerSlot;
use crate::engine::{ChannelEvent, EngineChannel};
use crate::error::{BridgeError, Result};
use crate::registry::{Handle, HandleRegistry};

lazy_static! {
    static ref CHANNELS: HandleRegistry<Arc<ChannelShared>> = HandleRegistry::new();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum DataState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl DataState {
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(DataState::Connecting),
            1 => Some(DataState::Open),
            2 => Some(DataState::Closing),
            3 => Some(DataState::Closed),
            _ => None,
        }
    }
}

impl fmt::Display for DataState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DataState::Connecting => "Connecting",
            DataState::Open => "Open",
            DataState::Closing => "Closing",
            DataState::Closed => "Closed",
        })
    }
}

/// Options for a locally created channel.
///
/// Defaults: ordered, unlimited lifetime and retransmits, no subprotocol,
/// in-band negotiation, engine-chosen id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataChannelInit {
    pub ordered: bool,
    pub max_packet_life_time: Option<u16>,
    pub max_retransmits: Option<u16>,
    pub protocol: String,
    pub negotiated: bool,
    pub id: Option<u16>,
}

impl Default for DataChannelInit {
    fn default() -> Self {
        Self {
            ordered: true,
            max_packet_life_time: None,
            max_retransmits: None,
            protocol: String::new(),
            negotiated: false,
            id: None,
        }
    }
}

impl DataChannelInit {
    pub fn with_ordered(mut self, ordered: bool) -> Self {
        self.ordered = ordered;
        self
    }

    pub fn with_max_packet_life_time(mut self, millis: u16) -> Self {
        self.max_packet_life_time = Some(millis);
        self
    }

    pub fn with_max_retransmits(mut self, retransmits: u16) -> Self {
        self.max_retransmits = Some(retransmits);
        self
    }

    pub fn with_protocol(mut self, protocol: &str) -> Self {
        self.protocol = protocol.to_string();
        self
    }

    /// Out-of-band negotiated channel with a fixed stream id.
    pub fn with_negotiated(mut self, id: u16) -> Self {
        self.negotiated = true;
        self.id = Some(id);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_packet_life_time.is_some() && self.max_retransmits.is_some() {
            return Err(BridgeError::Validation(
                "maxPacketLifeTime and maxRetransmits are mutually exclusive".into(),
            ));
        }
        if self.negotiated && self.id.is_none() {
            return Err(BridgeError::Validation("negotiated channel needs an id".into()));
        }
        Ok(())
    }
}

struct ChannelShared {
    handle: Handle,
    native: Arc<dyn EngineChannel>,
    ready_state: Mutex<DataState>,
    close_requested: AtomicBool,
    released: AtomicBool,
    buffered_amount_low_threshold: AtomicUsize,
    on_open: HandlerSlot<()>,
    on_close: HandlerSlot<()>,
    on_message: HandlerSlot<Bytes>,
    on_buffered_amount_low: HandlerSlot<()>,
}

impl ChannelShared {
    /// Move the mirror forward. Returns `false` for stale or repeated states.
    fn advance(&self, next: DataState) -> bool {
        let mut state = self.ready_state.lock();
        if next <= *state {
            return false;
        }
        *state = next;
        true
    }

    fn dispatch(&self, event: ChannelEvent) {
        match event {
            ChannelEvent::StateChange(next) => {
                if !self.advance(next) {
                    log::debug!("DataChannel {}: ignoring state change to {}", self.handle, next);
                    return;
                }
                log::debug!("DataChannel {}: state {}", self.handle, next);
                match next {
                    DataState::Open => {
                        self.on_open.fire(());
                    }
                    DataState::Closed => {
                        self.on_close.fire(());
                    }
                    DataState::Connecting | DataState::Closing => {}
                }
            }
            ChannelEvent::Message(data) => {
                self.on_message.fire(data);
            }
            ChannelEvent::BufferedAmountChange(amount) => {
                if amount <= self.buffered_amount_low_threshold.load(Ordering::Acquire) {
                    self.on_buffered_amount_low.fire(());
                }
            }
        }
    }
}

/// Host side of one data channel. Clones refer to the same channel.
#[derive(Clone)]
pub struct DataChannel {
    shared: Arc<ChannelShared>,
}

impl DataChannel {
    /// Wrap an engine channel: register it, then bind the engine to the new
    /// handle. The channel is fully usable before any event can reach it.
    /// The engine state is read again after binding, so the mirror never
    /// lags behind a transition that raced the adoption.
    pub fn adopt(native: Arc<dyn EngineChannel>) -> DataChannel {
        let initial = native.ready_state();
        let (handle, shared) = CHANNELS.set_with(|handle| {
            Arc::new(ChannelShared {
                handle,
                native: native.clone(),
                ready_state: Mutex::new(initial),
                close_requested: AtomicBool::new(false),
                released: AtomicBool::new(false),
                buffered_amount_low_threshold: AtomicUsize::new(0),
                on_open: HandlerSlot::new(),
                on_close: HandlerSlot::new(),
                on_message: HandlerSlot::new(),
                on_buffered_amount_low: HandlerSlot::new(),
            })
        });
        native.bind(handle);
        // A transition between the first read and bind was emitted unbound
        shared.advance(native.ready_state());
        log::info!(
            "DataChannel {} '{}' adopted in state {}",
            handle,
            native.label(),
            *shared.ready_state.lock()
        );
        DataChannel { shared }
    }

    pub fn handle(&self) -> Handle {
        self.shared.handle
    }

    /// Send binary data. Empty payloads are dropped.
    pub fn send(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.shared.native.send(data, true);
    }

    /// Send a text message. Empty strings are dropped.
    pub fn send_text(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.shared.native.send(text.as_bytes(), false);
    }

    /// Ask the engine to close. Only the first call reaches the engine.
    pub fn close(&self) {
        if *self.shared.ready_state.lock() == DataState::Closed {
            return;
        }
        if self.shared.close_requested.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.native.close();
    }

    pub fn label(&self) -> String {
        self.shared.native.label()
    }

    pub fn ordered(&self) -> bool {
        self.shared.native.ordered()
    }

    pub fn protocol(&self) -> String {
        self.shared.native.protocol()
    }

    pub fn negotiated(&self) -> bool {
        self.shared.native.negotiated()
    }

    pub fn id(&self) -> Option<u16> {
        self.shared.native.id()
    }

    pub fn max_packet_life_time(&self) -> Option<u16> {
        self.shared.native.max_packet_life_time()
    }

    pub fn max_retransmits(&self) -> Option<u16> {
        self.shared.native.max_retransmits()
    }

    pub fn ready_state(&self) -> DataState {
        *self.shared.ready_state.lock()
    }

    pub fn buffered_amount(&self) -> usize {
        self.shared.native.buffered_amount()
    }

    pub fn buffered_amount_low_threshold(&self) -> usize {
        self.shared.buffered_amount_low_threshold.load(Ordering::Acquire)
    }

    pub fn set_buffered_amount_low_threshold(&self, threshold: usize) {
        self.shared
            .buffered_amount_low_threshold
            .store(threshold, Ordering::Release);
    }

    pub fn on_open<F: Fn() + Send + Sync + 'static>(&self, f: F) {
        self.shared.on_open.set(move |()| f());
    }

    pub fn on_close<F: Fn() + Send + Sync + 'static>(&self, f: F) {
        self.shared.on_close.set(move |()| f());
    }

    pub fn on_message<F: Fn(Bytes) + Send + Sync + 'static>(&self, f: F) {
        self.shared.on_message.set(f);
    }

    pub fn on_buffered_amount_low<F: Fn() + Send + Sync + 'static>(&self, f: F) {
        self.shared.on_buffered_amount_low.set(move |()| f());
    }

    /// Unbind from the engine and release the handle.
    pub(crate) fn release(&self) {
        if self.shared.released.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.native.unbind();
        CHANNELS.delete(self.shared.handle);
        self.shared.on_open.clear();
        self.shared.on_close.clear();
        self.shared.on_message.clear();
        self.shared.on_buffered_amount_low.clear();
        log::debug!("DataChannel {} released", self.shared.handle);
    }

    pub fn is_released(&self) -> bool {
        self.shared.released.load(Ordering::Acquire)
    }

    pub(crate) fn ptr_eq(&self, other: &DataChannel) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl fmt::Debug for DataChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataChannel")
            .field("handle", &self.shared.handle)
            .field("ready_state", &self.ready_state())
            .finish()
    }
}

/// Engine entry point for channel events.
///
/// # Panics
///
/// Panics if `handle` is not a live channel.
pub fn deliver_channel_event(handle: Handle, event: ChannelEvent) {
    let shared = CHANNELS.get(handle);
    shared.dispatch(event);
}

#[cfg(test)]
pub(crate) fn is_channel_registered(handle: Handle) -> bool {
    CHANNELS.contains(handle)
}
