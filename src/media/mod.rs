//! Audio tracks, media streams, and host audio sources and sinks.
//!
//! Host sources and sinks live in their own handle spaces. The engine pulls
//! samples from a source by attaching engine sinks to it, and pushes
//! received audio into host sinks by handle; both directions go through the
//! 16-bit PCM conversion in [`crate::codec::pcm`].

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lazy_static::lazy_static;
use parking_lot::Mutex;

use crate::bridge::EventListener;
use crate::codec::pcm::{host_to_wire, wire_to_host};
use crate::engine::{EngineAudioSink, EngineAudioTrack, EngineMediaStream, NegotiationEngine, SinkId};
use crate::error::Result;
use crate::registry::{Handle, HandleRegistry};

lazy_static! {
    static ref AUDIO_SOURCES: HandleRegistry<Arc<dyn AudioSource>> = HandleRegistry::new();
    static ref AUDIO_SINKS: HandleRegistry<Arc<dyn AudioSink>> = HandleRegistry::new();
}

/// Identifies one sink attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AudioSinkId(pub u64);

impl fmt::Display for AudioSinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Receives audio as per-channel float frames.
///
/// Called on engine threads.
pub trait AudioSink: Send + Sync {
    fn on_audio_data(&self, data: &[Vec<f64>], sample_rate: u32);
}

/// Produces audio for a local track.
///
/// The engine attaches one sink per consumer; the source pushes its frames
/// into every attached sink.
pub trait AudioSource: Send + Sync {
    fn add_audio_sink(&self, id: AudioSinkId, sink: Arc<dyn AudioSink>);
    fn remove_audio_sink(&self, id: AudioSinkId);
}

/// Host view of an engine sink: float frames in, 16-bit PCM out.
struct WireSink {
    native: Arc<dyn EngineAudioSink>,
}

impl AudioSink for WireSink {
    fn on_audio_data(&self, data: &[Vec<f64>], sample_rate: u32) {
        let wire = host_to_wire(data, sample_rate);
        if wire.frames == 0 {
            return;
        }
        self.native.on_data(
            &wire.samples,
            wire.bits_per_sample,
            wire.format.sample_rate,
            wire.format.channels,
            wire.frames,
        );
    }
}

/// Engine entry point: attach engine sink `sink` to the host source `source`.
pub fn source_add_sink(source: Handle, sink: SinkId, native: Arc<dyn EngineAudioSink>) {
    AUDIO_SOURCES
        .get(source)
        .add_audio_sink(AudioSinkId(sink), Arc::new(WireSink { native }));
}

/// Engine entry point: detach engine sink `sink` from the host source `source`.
pub fn source_remove_sink(source: Handle, sink: SinkId) {
    AUDIO_SOURCES.get(source).remove_audio_sink(AudioSinkId(sink));
}

/// Engine entry point: the engine dropped its last reference to `source`.
pub fn source_destruct(source: Handle) {
    AUDIO_SOURCES.delete(source);
    log::debug!("Audio source {} released", source);
}

/// Engine entry point: PCM for the host sink registered as `sink`.
///
/// # Panics
///
/// Panics if `sink` is not registered or `bits_per_sample` is not 16.
pub fn deliver_sink_data(
    sink: Handle,
    pcm: &[i16],
    bits_per_sample: u32,
    sample_rate: u32,
    channels: usize,
    frames: usize,
) {
    let target = AUDIO_SINKS.get(sink);
    let audio = wire_to_host(pcm, bits_per_sample, sample_rate, channels, frames);
    target.on_audio_data(&audio.data, audio.sample_rate);
}

struct AudioTrackShared {
    native: Arc<dyn EngineAudioTrack>,
    // host sink handle -> engine attachment
    sinks: Mutex<HashMap<Handle, SinkId>>,
}

impl Drop for AudioTrackShared {
    fn drop(&mut self) {
        // Detach sinks the host never removed
        for (handle, attachment) in self.sinks.get_mut().drain() {
            self.native.remove_sink(attachment);
            AUDIO_SINKS.delete(handle);
        }
    }
}

/// Audio track, local or received. Clones refer to the same track.
#[derive(Clone)]
pub struct AudioTrack {
    shared: Arc<AudioTrackShared>,
}

impl AudioTrack {
    /// Create a local track fed by `source`.
    pub fn new(engine: &dyn NegotiationEngine, label: &str, source: Arc<dyn AudioSource>) -> Result<AudioTrack> {
        let handle = AUDIO_SOURCES.set(source);
        match engine.create_audio_track(label, handle) {
            Ok(native) => {
                log::info!("AudioTrack '{}' created with source {}", label, handle);
                Ok(Self::from_native(native))
            }
            Err(e) => {
                AUDIO_SOURCES.delete(handle);
                Err(e)
            }
        }
    }

    /// Wrap a track the engine already owns.
    pub fn from_native(native: Arc<dyn EngineAudioTrack>) -> AudioTrack {
        AudioTrack {
            shared: Arc::new(AudioTrackShared {
                native,
                sinks: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub(crate) fn native(&self) -> Arc<dyn EngineAudioTrack> {
        self.shared.native.clone()
    }

    pub fn id(&self) -> String {
        self.shared.native.id()
    }

    pub fn kind(&self) -> &'static str {
        "audio"
    }

    pub fn enabled(&self) -> bool {
        self.shared.native.enabled()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.shared.native.set_enabled(enabled);
    }

    pub fn ended(&self) -> bool {
        self.shared.native.ended()
    }

    /// Run `f` once, the first time the track is seen ended.
    ///
    /// The returned listener cancels itself after firing. An end that
    /// happened before this call is not reported; check [`AudioTrack::ended`].
    pub fn on_ended<F>(&self, f: F) -> EventListener
    where
        F: Fn() + Send + Sync + 'static,
    {
        let native = self.shared.native.clone();
        let fired = AtomicBool::new(false);
        EventListener::subscribe_with(self.shared.native.notifier(), move |listener| {
            if native.ended() && !fired.swap(true, Ordering::AcqRel) {
                f();
                listener.cancel();
            }
        })
    }

    /// Run `f` every time the engine reports a change on this track.
    pub fn on_changed<F>(&self, f: F) -> EventListener
    where
        F: Fn() + Send + Sync + 'static,
    {
        EventListener::subscribe(self.shared.native.notifier(), f)
    }

    /// Start receiving this track's audio in `sink`.
    pub fn add_sink(&self, sink: Arc<dyn AudioSink>) -> AudioSinkId {
        let handle = AUDIO_SINKS.set(sink);
        let attachment = self.shared.native.add_sink(handle);
        self.shared.sinks.lock().insert(handle, attachment);
        AudioSinkId(handle)
    }

    /// Stop receiving audio in a sink. Returns `false` if it was not attached.
    pub fn remove_sink(&self, id: AudioSinkId) -> bool {
        let attachment = self.shared.sinks.lock().remove(&id.0);
        match attachment {
            Some(attachment) => {
                self.shared.native.remove_sink(attachment);
                AUDIO_SINKS.delete(id.0);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for AudioTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioTrack").field("id", &self.id()).finish()
    }
}

/// Group of tracks sharing a label.
#[derive(Clone)]
pub struct MediaStream {
    native: Arc<dyn EngineMediaStream>,
}

impl MediaStream {
    pub fn from_native(native: Arc<dyn EngineMediaStream>) -> MediaStream {
        MediaStream { native }
    }

    pub fn label(&self) -> String {
        self.native.label()
    }

    pub fn audio_tracks(&self) -> Vec<AudioTrack> {
        self.native
            .audio_tracks()
            .into_iter()
            .map(AudioTrack::from_native)
            .collect()
    }

    /// Returns `false` if the track was already part of the stream.
    pub fn add_track(&self, track: &AudioTrack) -> bool {
        self.native.add_audio_track(track.native())
    }
}

#[cfg(test)]
pub(crate) fn is_source_registered(source: Handle) -> bool {
    AUDIO_SOURCES.contains(source)
}

#[cfg(test)]
pub(crate) fn is_sink_registered(sink: Handle) -> bool {
    AUDIO_SINKS.contains(sink)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::loopback::{LoopbackAudioTrack, LoopbackEngine};
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CollectingSink {
        frames: Mutex<Vec<Vec<Vec<f64>>>>,
    }

    impl AudioSink for CollectingSink {
        fn on_audio_data(&self, data: &[Vec<f64>], _sample_rate: u32) {
            self.frames.lock().push(data.to_vec());
        }
    }

    #[test]
    fn test_remote_pcm_reaches_sink() {
        let native = LoopbackAudioTrack::remote("remote-audio");
        let track = AudioTrack::from_native(native.clone());
        let sink = Arc::new(CollectingSink::default());
        let id = track.add_sink(sink.clone());

        native.deliver_remote_audio(&[16384, -16384, 0, 32767], 48000, 2, 2);
        {
            let frames = sink.frames.lock();
            assert_eq!(frames.len(), 1);
            assert_eq!(frames[0].len(), 2);
            assert_eq!(frames[0][0].len(), 2);
            assert!((frames[0][1][1] - 1.0).abs() < 1e-9);
        }

        assert!(track.remove_sink(id));
        assert!(!track.remove_sink(id));
        assert_eq!(native.sink_count(), 0);
    }

    #[test]
    fn test_dropping_track_detaches_sinks() {
        let native = LoopbackAudioTrack::remote("remote-audio");
        let track = AudioTrack::from_native(native.clone());
        let sink = Arc::new(CollectingSink::default());
        let first = track.add_sink(sink.clone());
        let second = track.add_sink(sink.clone());
        assert_eq!(native.sink_count(), 2);

        let clone = track.clone();
        drop(track);
        assert!(is_sink_registered(first.0));

        drop(clone);
        assert!(!is_sink_registered(first.0));
        assert!(!is_sink_registered(second.0));
        assert_eq!(native.sink_count(), 0);
        assert_eq!(Arc::strong_count(&sink), 1);
    }

    #[test]
    fn test_on_ended_fires_once_and_cancels() {
        let native = LoopbackAudioTrack::remote("t");
        let track = AudioTrack::from_native(native.clone());
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let listener = track.on_ended(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        track.set_enabled(false);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!listener.is_cancelled());

        native.end();
        native.end();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(listener.is_cancelled());
        assert_eq!(native.loopback_notifier().observer_count(), 0);
    }

    #[test]
    fn test_failed_track_creation_releases_source() {
        struct NoTracks;
        impl NegotiationEngine for NoTracks {
            fn create_peer(
                &self,
                _handle: Handle,
                _config: &crate::ice::Configuration,
            ) -> Result<Arc<dyn crate::engine::EnginePeer>> {
                Err(crate::error::BridgeError::Engine("no peers".into()))
            }

            fn create_audio_track(&self, _label: &str, source: Handle) -> Result<Arc<dyn EngineAudioTrack>> {
                assert!(is_source_registered(source));
                Err(crate::error::BridgeError::Engine(format!("no tracks for {}", source)))
            }
        }

        struct Silent;
        impl AudioSource for Silent {
            fn add_audio_sink(&self, _id: AudioSinkId, _sink: Arc<dyn AudioSink>) {}
            fn remove_audio_sink(&self, _id: AudioSinkId) {}
        }

        let err = AudioTrack::new(&NoTracks, "mic", Arc::new(Silent)).err();
        let Some(crate::error::BridgeError::Engine(msg)) = err else {
            panic!("expected engine failure");
        };
        let source: Handle = msg.trim_start_matches("no tracks for ").parse().unwrap();
        assert!(!is_source_registered(source));
    }

    #[test]
    fn test_media_stream_tracks() {
        let engine = LoopbackEngine::new();
        let stream = MediaStream::from_native(crate::engine::loopback::LoopbackMediaStream::new("stream"));
        let track = AudioTrack::from_native(engine.remote_audio_track("a1"));

        assert_eq!(stream.label(), "stream");
        assert!(stream.add_track(&track));
        assert!(!stream.add_track(&track));
        let tracks = stream.audio_tracks();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].id(), "a1");
        assert_eq!(tracks[0].kind(), "audio");
    }
}
