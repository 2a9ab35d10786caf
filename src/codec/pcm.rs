//! 16-bit PCM conversion.
//!
//! Both directions are pure per-call transforms. Frame and channel counts
//! are preserved exactly.

use super::{AudioFormat, WIRE_BITS_PER_SAMPLE};

const SCALE: f64 = i16::MAX as f64;

/// Interleaved PCM ready for the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct WireAudio {
    pub samples: Vec<i16>,
    pub bits_per_sample: u32,
    pub format: AudioFormat,
    pub frames: usize,
}

/// Per-channel float frames for the host.
#[derive(Debug, Clone, PartialEq)]
pub struct HostAudio {
    pub data: Vec<Vec<f64>>,
    pub sample_rate: u32,
}

/// Interleave `data` (one slice per channel) into 16-bit PCM.
///
/// Samples are scaled by `i16::MAX`. Values outside [-1, 1] are the caller's
/// problem; the float to integer cast saturates them.
///
/// # Panics
///
/// Panics if the channels have different lengths.
pub fn host_to_wire(data: &[Vec<f64>], sample_rate: u32) -> WireAudio {
    let channels = data.len();
    let frames = data.first().map_or(0, Vec::len);
    assert!(
        data.iter().all(|c| c.len() == frames),
        "all channels must carry the same number of frames"
    );

    let mut samples = Vec::with_capacity(channels * frames);
    for frame in 0..frames {
        for channel in data {
            samples.push((channel[frame] * SCALE) as i16);
        }
    }

    WireAudio {
        samples,
        bits_per_sample: WIRE_BITS_PER_SAMPLE,
        format: AudioFormat::new(sample_rate, channels),
        frames,
    }
}

/// De-interleave engine PCM into per-channel float frames.
///
/// # Panics
///
/// Panics if `bits_per_sample` is not 16, or if `pcm` holds fewer than
/// `channels * frames` samples.
pub fn wire_to_host(
    pcm: &[i16],
    bits_per_sample: u32,
    sample_rate: u32,
    channels: usize,
    frames: usize,
) -> HostAudio {
    assert!(
        bits_per_sample == WIRE_BITS_PER_SAMPLE,
        "unsupported PCM sample width: {} bits",
        bits_per_sample
    );
    assert!(
        pcm.len() >= channels * frames,
        "PCM buffer holds {} samples, expected {}",
        pcm.len(),
        channels * frames
    );

    let mut data = vec![Vec::with_capacity(frames); channels];
    for frame in pcm.chunks_exact(channels.max(1)).take(frames) {
        for (channel, &sample) in data.iter_mut().zip(frame) {
            channel.push(sample as f64 / SCALE);
        }
    }

    HostAudio { data, sample_rate }
}
