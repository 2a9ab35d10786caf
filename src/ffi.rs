//! C ABI entry points for a native engine.
//!
//! A C/C++ engine reports events by calling these functions with the handle
//! it was given and raw enum values in engine order. An unknown raw value or
//! a null required pointer is a bug on the engine side: the call panics,
//! which aborts the process at the C boundary.

use std::ffi::{c_char, c_void, CStr};

use bytes::Bytes;

use crate::bridge::deliver_notification;
use crate::channel::{deliver_channel_event, DataState};
use crate::codec::WIRE_BITS_PER_SAMPLE;
use crate::engine::{ChannelEvent, SessionEvent};
use crate::ice::IceCandidate;
use crate::media::{deliver_sink_data, source_destruct};
use crate::peer::{deliver_session_event, IceConnectionState, IceGatheringState, SignalingState};
use crate::registry::Handle;

fn known<T>(value: Option<T>, kind: &str, raw: i32) -> T {
    match value {
        Some(v) => v,
        None => panic!("unknown {} value {}", kind, raw),
    }
}

/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string.
unsafe fn text(ptr: *const c_char, what: &str) -> String {
    if ptr.is_null() {
        panic!("{} must not be null", what);
    }
    CStr::from_ptr(ptr).to_string_lossy().into_owned()
}

// ============================================================================
// Session events
// ============================================================================

#[no_mangle]
pub extern "C" fn RTCBRIDGE_PeerOnNegotiationNeeded(peer: Handle) {
    deliver_session_event(peer, SessionEvent::NegotiationNeeded);
}

/// # Safety
///
/// `candidate` and `sdp_mid` must be valid NUL-terminated strings for the
/// duration of the call.
#[no_mangle]
pub unsafe extern "C" fn RTCBRIDGE_PeerOnIceCandidate(
    peer: Handle,
    candidate: *const c_char,
    sdp_mid: *const c_char,
    sdp_mline_index: i32,
) {
    let candidate = IceCandidate::new(text(candidate, "candidate"), text(sdp_mid, "sdp_mid"), sdp_mline_index);
    deliver_session_event(peer, SessionEvent::IceCandidate(candidate));
}

#[no_mangle]
pub extern "C" fn RTCBRIDGE_PeerOnIceCandidateError(peer: Handle) {
    deliver_session_event(peer, SessionEvent::IceCandidateError);
}

#[no_mangle]
pub extern "C" fn RTCBRIDGE_PeerOnSignalingStateChange(peer: Handle, state: i32) {
    let state = known(SignalingState::from_raw(state), "signaling state", state);
    deliver_session_event(peer, SessionEvent::SignalingStateChange(state));
}

#[no_mangle]
pub extern "C" fn RTCBRIDGE_PeerOnIceConnectionStateChange(peer: Handle, state: i32) {
    let state = known(IceConnectionState::from_raw(state), "ICE connection state", state);
    deliver_session_event(peer, SessionEvent::IceConnectionStateChange(state));
}

#[no_mangle]
pub extern "C" fn RTCBRIDGE_PeerOnIceGatheringStateChange(peer: Handle, state: i32) {
    let state = known(IceGatheringState::from_raw(state), "ICE gathering state", state);
    deliver_session_event(peer, SessionEvent::IceGatheringStateChange(state));
}

// ============================================================================
// Channel events
// ============================================================================

#[no_mangle]
pub extern "C" fn RTCBRIDGE_ChannelOnStateChange(channel: Handle, state: i32) {
    let state = known(DataState::from_raw(state), "data channel state", state);
    deliver_channel_event(channel, ChannelEvent::StateChange(state));
}

/// # Safety
///
/// `data` must point to `len` readable bytes, or be null when `len` is 0.
#[no_mangle]
pub unsafe extern "C" fn RTCBRIDGE_ChannelOnMessage(channel: Handle, data: *const u8, len: usize) {
    let payload = if len == 0 {
        Bytes::new()
    } else {
        if data.is_null() {
            panic!("message data must not be null");
        }
        Bytes::copy_from_slice(std::slice::from_raw_parts(data, len))
    };
    deliver_channel_event(channel, ChannelEvent::Message(payload));
}

#[no_mangle]
pub extern "C" fn RTCBRIDGE_ChannelOnBufferedAmountChange(channel: Handle, amount: u64) {
    deliver_channel_event(channel, ChannelEvent::BufferedAmountChange(amount as usize));
}

// ============================================================================
// Observers and audio
// ============================================================================

#[no_mangle]
pub extern "C" fn RTCBRIDGE_ObserverOnChanged(callback: Handle) {
    deliver_notification(callback);
}

/// # Safety
///
/// `data` must point to `channels * frames` interleaved samples of
/// `bits_per_sample` bits.
#[no_mangle]
pub unsafe extern "C" fn RTCBRIDGE_AudioSinkOnData(
    sink: Handle,
    data: *const c_void,
    bits_per_sample: i32,
    sample_rate: i32,
    channels: usize,
    frames: usize,
) {
    if bits_per_sample != WIRE_BITS_PER_SAMPLE as i32 {
        panic!("unsupported PCM sample width: {} bits", bits_per_sample);
    }
    let count = channels * frames;
    let pcm: &[i16] = if count == 0 {
        &[]
    } else {
        if data.is_null() {
            panic!("audio data must not be null");
        }
        std::slice::from_raw_parts(data as *const i16, count)
    };
    deliver_sink_data(sink, pcm, WIRE_BITS_PER_SAMPLE, sample_rate as u32, channels, frames);
}

#[no_mangle]
pub extern "C" fn RTCBRIDGE_AudioSourceDestruct(source: Handle) {
    source_destruct(source);
}
