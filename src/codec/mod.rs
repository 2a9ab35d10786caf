//! Audio sample conversion between host frames and engine PCM.
//!
//! Host side: one `Vec<f64>` per channel, samples normalized to [-1, 1].
//! Engine side: interleaved 16-bit signed PCM.

pub mod pcm;

pub use pcm::{host_to_wire, wire_to_host, HostAudio, WireAudio};

/// The only PCM sample width the engine exchanges.
pub const WIRE_BITS_PER_SAMPLE: u32 = 16;

/// Audio format parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    /// Sample rate in Hz (e.g., 48000)
    pub sample_rate: u32,
    /// Number of channels (1 = mono, 2 = stereo)
    pub channels: usize,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channels: usize) -> Self {
        Self { sample_rate, channels }
    }
}
