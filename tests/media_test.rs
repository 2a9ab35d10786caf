//! Audio tracks over the loopback engine
//!
//! Covers:
//! - Local track: host source -> 16-bit PCM -> host sink
//! - Sink detach reaching the host source
//! - Source release when the engine drops the track
//! - Sinks left attached are released with the track
//! - Ended notification

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use webrtc_bridge::engine::loopback::LoopbackEngine;
use webrtc_bridge::{AudioSink, AudioSinkId, AudioSource, AudioTrack, Configuration, PeerConnection};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Source that pushes whatever the test hands it to every attached sink.
#[derive(Default)]
struct ToneSource {
    sinks: Mutex<HashMap<AudioSinkId, Arc<dyn AudioSink>>>,
}

impl ToneSource {
    fn push(&self, data: &[Vec<f64>], sample_rate: u32) {
        let sinks: Vec<_> = self.sinks.lock().values().cloned().collect();
        for sink in sinks {
            sink.on_audio_data(data, sample_rate);
        }
    }

    fn sink_count(&self) -> usize {
        self.sinks.lock().len()
    }
}

impl AudioSource for ToneSource {
    fn add_audio_sink(&self, id: AudioSinkId, sink: Arc<dyn AudioSink>) {
        self.sinks.lock().insert(id, sink);
    }

    fn remove_audio_sink(&self, id: AudioSinkId) {
        self.sinks.lock().remove(&id);
    }
}

#[derive(Default)]
struct Recorder {
    chunks: Mutex<Vec<(Vec<Vec<f64>>, u32)>>,
}

impl AudioSink for Recorder {
    fn on_audio_data(&self, data: &[Vec<f64>], sample_rate: u32) {
        self.chunks.lock().push((data.to_vec(), sample_rate));
    }
}

#[test]
fn test_local_track_round_trip_through_pcm() {
    init_logging();
    let engine = LoopbackEngine::new();
    let source = Arc::new(ToneSource::default());
    let track = AudioTrack::new(&engine, "mic", source.clone()).expect("audio track");
    assert_eq!(track.id(), "mic");
    assert_eq!(track.kind(), "audio");
    assert!(track.enabled());

    let recorder = Arc::new(Recorder::default());
    let id = track.add_sink(recorder.clone());
    assert_eq!(source.sink_count(), 1);

    let left = vec![0.0, 0.5, -0.5, 1.0];
    let right = vec![0.25, -0.25, 0.75, -1.0];
    source.push(&[left.clone(), right.clone()], 48000);

    let chunks = recorder.chunks.lock();
    assert_eq!(chunks.len(), 1);
    let (data, rate) = &chunks[0];
    assert_eq!(*rate, 48000);
    assert_eq!(data.len(), 2);
    // Quantization to 16 bits loses at most one step
    let tolerance = 1.0 / 32768.0;
    for (got, want) in data[0].iter().zip(&left) {
        assert!((got - want).abs() <= tolerance, "left {} vs {}", got, want);
    }
    for (got, want) in data[1].iter().zip(&right) {
        assert!((got - want).abs() <= tolerance, "right {} vs {}", got, want);
    }
    drop(chunks);

    assert!(track.remove_sink(id));
    assert_eq!(source.sink_count(), 0);
    source.push(&[left, right], 48000);
    assert_eq!(recorder.chunks.lock().len(), 1);
}

#[test]
fn test_source_released_with_track() {
    init_logging();
    let engine = LoopbackEngine::new();
    let source = Arc::new(ToneSource::default());
    let track = AudioTrack::new(&engine, "mic", source.clone()).unwrap();
    assert_eq!(Arc::strong_count(&source), 2);

    drop(track);
    assert_eq!(Arc::strong_count(&source), 1);
}

#[test]
fn test_dropped_track_lets_go_of_sinks() {
    init_logging();
    let engine = LoopbackEngine::new();
    let source = Arc::new(ToneSource::default());
    let track = AudioTrack::new(&engine, "mic", source.clone()).unwrap();
    let recorder = Arc::new(Recorder::default());
    track.add_sink(recorder.clone());
    assert_eq!(source.sink_count(), 1);
    assert!(Arc::strong_count(&recorder) > 1);

    drop(track);
    assert_eq!(source.sink_count(), 0);
    assert_eq!(Arc::strong_count(&recorder), 1);
    assert_eq!(Arc::strong_count(&source), 1);
}

#[test]
fn test_empty_frames_are_not_forwarded() {
    init_logging();
    let engine = LoopbackEngine::new();
    let source = Arc::new(ToneSource::default());
    let track = AudioTrack::new(&engine, "mic", source.clone()).unwrap();
    let recorder = Arc::new(Recorder::default());
    track.add_sink(recorder.clone());

    source.push(&[Vec::new(), Vec::new()], 48000);
    assert!(recorder.chunks.lock().is_empty());
}

#[test]
fn test_remote_track_ended_and_stream_membership() {
    init_logging();
    let engine = LoopbackEngine::new();
    let pc = PeerConnection::new(&engine, Configuration::new()).unwrap();
    let stream = pc.new_media_stream("remote").unwrap();
    let native = engine.remote_audio_track("remote-audio");
    let track = AudioTrack::from_native(native.clone());
    assert!(stream.add_track(&track));

    let ended = Arc::new(AtomicUsize::new(0));
    let e = ended.clone();
    let listener = track.on_ended(move || {
        e.fetch_add(1, Ordering::SeqCst);
    });
    let changes = Arc::new(AtomicUsize::new(0));
    let c = changes.clone();
    let watcher = track.on_changed(move || {
        c.fetch_add(1, Ordering::SeqCst);
    });

    track.set_enabled(false);
    assert_eq!(changes.load(Ordering::SeqCst), 1);
    assert_eq!(ended.load(Ordering::SeqCst), 0);

    native.end();
    assert!(track.ended());
    assert_eq!(ended.load(Ordering::SeqCst), 1);
    assert!(listener.is_cancelled());
    assert_eq!(changes.load(Ordering::SeqCst), 2);

    watcher.cancel();
    assert_eq!(native.loopback_notifier().observer_count(), 0);
    assert_eq!(stream.audio_tracks()[0].id(), "remote-audio");
}
