//! In-process audio tracks and media streams.
//!
//! A local track wires each attached host sink straight to its host source:
//! samples the source pushes are converted to 16-bit PCM, handed to the
//! engine side, and delivered back to the sink.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};

use crate::bridge::{deliver_notification, Notifier, ObserverId};
use crate::codec::WIRE_BITS_PER_SAMPLE;
use crate::engine::{EngineAudioSink, EngineAudioTrack, EngineMediaStream, SinkId};
use crate::media::{deliver_sink_data, source_add_sink, source_destruct, source_remove_sink};
use crate::registry::Handle;

/// Observer list that may be changed from inside its own notifications.
///
/// The reentrant lock is held for the whole delivery pass, so an observer
/// removed from another thread is never notified after removal returns.
#[derive(Default)]
pub struct LoopbackNotifier {
    next: AtomicU64,
    observers: ReentrantMutex<RefCell<HashMap<ObserverId, Handle>>>,
}

impl LoopbackNotifier {
    pub fn notify(&self) {
        let observers = self.observers.lock();
        let targets: Vec<(ObserverId, Handle)> =
            observers.borrow().iter().map(|(id, h)| (*id, *h)).collect();
        for (id, callback) in targets {
            let live = observers.borrow().contains_key(&id);
            if live {
                deliver_notification(callback);
            }
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().borrow().len()
    }
}

impl Notifier for LoopbackNotifier {
    fn register_observer(&self, callback: Handle) -> ObserverId {
        let id = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        self.observers.lock().borrow_mut().insert(id, callback);
        id
    }

    fn unregister_observer(&self, observer: ObserverId) {
        self.observers.lock().borrow_mut().remove(&observer);
    }
}

/// Engine end of a local source: forwards PCM to the host sink it serves.
struct LoopbackWire {
    sink: Handle,
}

impl EngineAudioSink for LoopbackWire {
    fn on_data(&self, pcm: &[i16], bits_per_sample: u32, sample_rate: u32, channels: usize, frames: usize) {
        deliver_sink_data(self.sink, pcm, bits_per_sample, sample_rate, channels, frames);
    }
}

pub struct LoopbackAudioTrack {
    id: String,
    enabled: AtomicBool,
    ended: AtomicBool,
    source: Option<Handle>,
    sinks: Mutex<HashMap<SinkId, Handle>>,
    next_sink: AtomicU64,
    notifier: Arc<LoopbackNotifier>,
}

impl LoopbackAudioTrack {
    /// Track fed by the host source registered as `source`.
    pub fn local(id: &str, source: Handle) -> Arc<Self> {
        Arc::new(Self::build(id, Some(source)))
    }

    /// Track as if received from the remote peer.
    pub fn remote(id: &str) -> Arc<Self> {
        Arc::new(Self::build(id, None))
    }

    fn build(id: &str, source: Option<Handle>) -> Self {
        Self {
            id: id.to_string(),
            enabled: AtomicBool::new(true),
            ended: AtomicBool::new(false),
            source,
            sinks: Mutex::new(HashMap::new()),
            next_sink: AtomicU64::new(0),
            notifier: Arc::new(LoopbackNotifier::default()),
        }
    }

    /// Mark the track ended and notify observers once.
    pub fn end(&self) {
        if !self.ended.swap(true, Ordering::AcqRel) {
            self.notifier.notify();
        }
    }

    /// Push 16-bit PCM to every attached sink, as if it arrived from the network.
    pub fn deliver_remote_audio(&self, pcm: &[i16], sample_rate: u32, channels: usize, frames: usize) {
        let sinks: Vec<Handle> = self.sinks.lock().values().copied().collect();
        for sink in sinks {
            deliver_sink_data(sink, pcm, WIRE_BITS_PER_SAMPLE, sample_rate, channels, frames);
        }
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.lock().len()
    }

    pub fn loopback_notifier(&self) -> &LoopbackNotifier {
        &self.notifier
    }
}

impl EngineAudioTrack for LoopbackAudioTrack {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn set_enabled(&self, enabled: bool) {
        if self.enabled.swap(enabled, Ordering::AcqRel) != enabled {
            self.notifier.notify();
        }
    }

    fn ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    fn notifier(&self) -> Arc<dyn Notifier> {
        self.notifier.clone()
    }

    fn add_sink(&self, sink: Handle) -> SinkId {
        let id = self.next_sink.fetch_add(1, Ordering::Relaxed) + 1;
        self.sinks.lock().insert(id, sink);
        if let Some(source) = self.source {
            source_add_sink(source, id, Arc::new(LoopbackWire { sink }));
        }
        id
    }

    fn remove_sink(&self, sink: SinkId) -> Option<Handle> {
        let handle = self.sinks.lock().remove(&sink)?;
        if let Some(source) = self.source {
            source_remove_sink(source, sink);
        }
        Some(handle)
    }
}

impl Drop for LoopbackAudioTrack {
    fn drop(&mut self) {
        if let Some(source) = self.source {
            source_destruct(source);
        }
    }
}

pub struct LoopbackMediaStream {
    label: String,
    tracks: Mutex<Vec<Arc<dyn EngineAudioTrack>>>,
}

impl LoopbackMediaStream {
    pub fn new(label: &str) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            tracks: Mutex::new(Vec::new()),
        })
    }
}

impl EngineMediaStream for LoopbackMediaStream {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn audio_tracks(&self) -> Vec<Arc<dyn EngineAudioTrack>> {
        self.tracks.lock().clone()
    }

    fn add_audio_track(&self, track: Arc<dyn EngineAudioTrack>) -> bool {
        let mut tracks = self.tracks.lock();
        let new = Arc::as_ptr(&track) as *const ();
        if tracks.iter().any(|t| Arc::as_ptr(t) as *const () == new) {
            return false;
        }
        tracks.push(track);
        true
    }
}
