//! In-process data channel.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

use crate::channel::{deliver_channel_event, DataChannelInit, DataState};
use crate::engine::{ChannelEvent, EngineChannel};
use crate::registry::Handle;

/// A message handed to [`EngineChannel::send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub data: Bytes,
    pub is_binary: bool,
}

/// Data channel that never touches the network.
///
/// Sent messages are queued for inspection (and echoed back when created
/// with [`LoopbackChannel::fake`]); state, inbound messages and buffered
/// amount are driven by the test through the `set_*`/`deliver_*` controls.
pub struct LoopbackChannel {
    label: String,
    ordered: bool,
    protocol: String,
    negotiated: bool,
    id: Option<u16>,
    max_packet_life_time: Option<u16>,
    max_retransmits: Option<u16>,
    echo: bool,
    state: Mutex<DataState>,
    buffered: AtomicUsize,
    binding: RwLock<Option<Handle>>,
    sent: Mutex<Vec<SentMessage>>,
}

impl LoopbackChannel {
    pub fn new(label: &str, init: &DataChannelInit, id: Option<u16>) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            ordered: init.ordered,
            protocol: init.protocol.clone(),
            negotiated: init.negotiated,
            id,
            max_packet_life_time: init.max_packet_life_time,
            max_retransmits: init.max_retransmits,
            echo: false,
            state: Mutex::new(DataState::Connecting),
            buffered: AtomicUsize::new(0),
            binding: RwLock::new(None),
            sent: Mutex::new(Vec::new()),
        })
    }

    /// Unordered channel labelled "fake" with id 12345 and 1234 bytes
    /// buffered, which echoes every sent message back as inbound.
    pub fn fake() -> Arc<Self> {
        Arc::new(Self {
            label: "fake".to_string(),
            ordered: false,
            protocol: String::new(),
            negotiated: false,
            id: Some(12345),
            max_packet_life_time: None,
            max_retransmits: None,
            echo: true,
            state: Mutex::new(DataState::Connecting),
            buffered: AtomicUsize::new(1234),
            binding: RwLock::new(None),
            sent: Mutex::new(Vec::new()),
        })
    }

    fn emit(&self, event: ChannelEvent) {
        let binding = self.binding.read_recursive();
        if let Some(handle) = *binding {
            deliver_channel_event(handle, event);
        }
    }

    /// Force the ready state and report it.
    pub fn set_state(&self, state: DataState) {
        *self.state.lock() = state;
        self.emit(ChannelEvent::StateChange(state));
    }

    /// Report an inbound message.
    pub fn deliver_message(&self, data: impl Into<Bytes>) {
        self.emit(ChannelEvent::Message(data.into()));
    }

    /// Force the buffered amount and report it.
    pub fn set_buffered_amount(&self, amount: usize) {
        self.buffered.store(amount, Ordering::Release);
        self.emit(ChannelEvent::BufferedAmountChange(amount));
    }

    /// Pretend the transport flushed everything.
    pub fn drain(&self) {
        self.set_buffered_amount(0);
    }

    pub fn take_sent(&self) -> Vec<SentMessage> {
        std::mem::take(&mut *self.sent.lock())
    }

    pub fn is_bound(&self) -> bool {
        self.binding.read_recursive().is_some()
    }
}

impl EngineChannel for LoopbackChannel {
    fn bind(&self, handle: Handle) {
        *self.binding.write() = Some(handle);
    }

    fn unbind(&self) {
        *self.binding.write() = None;
    }

    fn send(&self, data: &[u8], is_binary: bool) {
        if *self.state.lock() != DataState::Open {
            log::warn!("DataChannel '{}' is not open, dropping {} bytes", self.label, data.len());
            return;
        }
        let data = Bytes::copy_from_slice(data);
        self.sent.lock().push(SentMessage {
            data: data.clone(),
            is_binary,
        });

        if self.echo {
            self.emit(ChannelEvent::Message(data));
        } else {
            let amount = self.buffered.fetch_add(data.len(), Ordering::AcqRel) + data.len();
            self.emit(ChannelEvent::BufferedAmountChange(amount));
        }
    }

    fn close(&self) {
        if *self.state.lock() >= DataState::Closing {
            return;
        }
        self.set_state(DataState::Closing);
        self.buffered.store(0, Ordering::Release);
        self.set_state(DataState::Closed);
    }

    fn label(&self) -> String {
        self.label.clone()
    }

    fn ordered(&self) -> bool {
        self.ordered
    }

    fn protocol(&self) -> String {
        self.protocol.clone()
    }

    fn negotiated(&self) -> bool {
        self.negotiated
    }

    fn id(&self) -> Option<u16> {
        self.id
    }

    fn max_packet_life_time(&self) -> Option<u16> {
        self.max_packet_life_time
    }

    fn max_retransmits(&self) -> Option<u16> {
        self.max_retransmits
    }

    fn ready_state(&self) -> DataState {
        *self.state.lock()
    }

    fn buffered_amount(&self) -> usize {
        self.buffered.load(Ordering::Acquire)
    }
}
