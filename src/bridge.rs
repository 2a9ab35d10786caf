//! Event bridge between engine change-notifiers and host callbacks.
//!
//! An [`EventListener`] wires one engine [`Notifier`] to one host callback.
//! The engine only ever sees the callback's registry handle and reports a
//! change through [`deliver_notification`]. The callback runs on whatever
//! thread the engine delivers on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lazy_static::lazy_static;
use parking_lot::Mutex;

use crate::registry::{Handle, HandleRegistry};

/// Engine token for one registered observer.
pub type ObserverId = u64;

/// Engine object that can report "something changed".
pub trait Notifier: Send + Sync {
    /// Start reporting changes to the host callback registered as `callback`.
    fn register_observer(&self, callback: Handle) -> ObserverId;

    /// Stop reporting. No notification for `observer` may start after this
    /// returns.
    fn unregister_observer(&self, observer: ObserverId);
}

type ListenerCallback = Box<dyn Fn(&EventListener) + Send + Sync>;

struct ListenerInner {
    notifier: Arc<dyn Notifier>,
    callback_handle: Handle,
    observer: Mutex<Option<ObserverId>>,
    ready: AtomicBool,
    callback: ListenerCallback,
}

lazy_static! {
    static ref EVENT_CALLBACKS: HandleRegistry<Arc<ListenerInner>> = HandleRegistry::new();
}

/// Live subscription to an engine notifier.
///
/// Clones refer to the same subscription.
#[derive(Clone)]
pub struct EventListener {
    inner: Arc<ListenerInner>,
}

impl EventListener {
    /// Run `callback` every time `notifier` reports a change.
    pub fn subscribe<F>(notifier: Arc<dyn Notifier>, callback: F) -> EventListener
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::subscribe_with(notifier, move |_| callback())
    }

    /// Like [`EventListener::subscribe`], but the callback also receives the
    /// listener so it can cancel itself.
    ///
    /// A change reported before this returns is lost. Callers that care must
    /// re-check the current state after subscribing.
    pub fn subscribe_with<F>(notifier: Arc<dyn Notifier>, callback: F) -> EventListener
    where
        F: Fn(&EventListener) + Send + Sync + 'static,
    {
        let (_, inner) = EVENT_CALLBACKS.set_with(|callback_handle| {
            Arc::new(ListenerInner {
                notifier: notifier.clone(),
                callback_handle,
                observer: Mutex::new(None),
                ready: AtomicBool::new(false),
                callback: Box::new(callback),
            })
        });

        let observer = notifier.register_observer(inner.callback_handle);
        *inner.observer.lock() = Some(observer);
        inner.ready.store(true, Ordering::Release);

        EventListener { inner }
    }

    /// Detach from the notifier and release the callback handle.
    ///
    /// Only the first call does anything. Safe to call from inside the
    /// callback itself.
    pub fn cancel(&self) {
        let observer = self.inner.observer.lock().take();
        if let Some(observer) = observer {
            self.inner.notifier.unregister_observer(observer);
            EVENT_CALLBACKS.delete(self.inner.callback_handle);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.ready.load(Ordering::Acquire) && self.inner.observer.lock().is_none()
    }

    /// Handle the engine holds for this listener.
    pub fn callback_handle(&self) -> Handle {
        self.inner.callback_handle
    }
}

/// Engine entry point: the observer registered with `callback` saw a change.
pub fn deliver_notification(callback: Handle) {
    let inner = EVENT_CALLBACKS.get(callback);
    if !inner.ready.load(Ordering::Acquire) {
        log::debug!("Notification for listener {} dropped before subscribe completed", callback);
        return;
    }
    let listener = EventListener { inner };
    (listener.inner.callback)(&listener);
}

#[cfg(test)]
pub(crate) fn is_listener_registered(callback: Handle) -> bool {
    EVENT_CALLBACKS.contains(callback)
}

/// One optional host handler for one event kind.
///
/// The handler is cloned out before it runs, so it may replace itself (or
/// any other slot) without deadlocking.
pub(crate) struct HandlerSlot<A> {
    handler: Mutex<Option<Arc<dyn Fn(A) + Send + Sync>>>,
}

impl<A> HandlerSlot<A> {
    pub fn new() -> Self {
        Self {
            handler: Mutex::new(None),
        }
    }

    pub fn set<F>(&self, handler: F)
    where
        F: Fn(A) + Send + Sync + 'static,
    {
        *self.handler.lock() = Some(Arc::new(handler));
    }

    pub fn clear(&self) {
        *self.handler.lock() = None;
    }

    /// Run the handler if one is set. Returns whether it ran.
    pub fn fire(&self, arg: A) -> bool {
        let handler = self.handler.lock().clone();
        match handler {
            Some(handler) => {
                handler(arg);
                true
            }
            None => false,
        }
    }
}

impl<A> Default for HandlerSlot<A> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, AtomicUsize};

    #[derive(Default)]
    struct TestNotifier {
        next: AtomicU64,
        observers: Mutex<HashMap<ObserverId, Handle>>,
    }

    impl TestNotifier {
        fn fire(&self) {
            let targets: Vec<Handle> = self.observers.lock().values().copied().collect();
            for callback in targets {
                deliver_notification(callback);
            }
        }

        fn observer_count(&self) -> usize {
            self.observers.lock().len()
        }
    }

    impl Notifier for TestNotifier {
        fn register_observer(&self, callback: Handle) -> ObserverId {
            let id = self.next.fetch_add(1, Ordering::SeqCst) + 1;
            self.observers.lock().insert(id, callback);
            id
        }

        fn unregister_observer(&self, observer: ObserverId) {
            self.observers.lock().remove(&observer);
        }
    }

    #[test]
    fn test_callback_fires_per_notification() {
        let notifier = Arc::new(TestNotifier::default());
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let listener = EventListener::subscribe(notifier.clone(), move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        notifier.fire();
        notifier.fire();
        assert_eq!(count.load(Ordering::SeqCst), 2);
        listener.cancel();
    }

    #[test]
    fn test_cancel_detaches_and_releases_handle() {
        let notifier = Arc::new(TestNotifier::default());
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let listener = EventListener::subscribe(notifier.clone(), move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        let handle = listener.callback_handle();
        assert!(is_listener_registered(handle));

        listener.cancel();
        listener.cancel();

        assert!(listener.is_cancelled());
        assert!(!is_listener_registered(handle));
        assert_eq!(notifier.observer_count(), 0);
        notifier.fire();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_self_cancelling_listener_fires_once() {
        let notifier = Arc::new(TestNotifier::default());
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let listener = EventListener::subscribe_with(notifier.clone(), move |me| {
            c.fetch_add(1, Ordering::SeqCst);
            me.cancel();
        });

        notifier.fire();
        notifier.fire();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(listener.is_cancelled());
    }

    #[test]
    fn test_handler_slot_can_replace_itself() {
        let slot = Arc::new(HandlerSlot::<u32>::new());
        assert!(!slot.fire(1));

        let inner = slot.clone();
        slot.set(move |_| inner.clear());
        assert!(slot.fire(2));
        assert!(!slot.fire(3));
    }
}
