//! Handle registry for host objects referenced by the negotiation engine.
//!
//! The engine is never given a Rust reference. It holds a small integer
//! instead, which is resolved back to the live object on every callback.
//! Handles come from a counter that only ever grows, so a handle released by
//! [`HandleRegistry::delete`] can never alias a later object.

use std::collections::HashMap;

use parking_lot::Mutex;

/// Opaque handle passed across the engine boundary. Never zero.
pub type Handle = u64;

struct Slots<T> {
    last: Handle,
    entries: HashMap<Handle, T>,
}

/// Thread-safe handle to object table.
///
/// The single mutex protects the table only; the objects stored in it are
/// responsible for their own consistency.
pub struct HandleRegistry<T> {
    slots: Mutex<Slots<T>>,
}

impl<T: Clone> HandleRegistry<T> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Slots {
                last: 0,
                entries: HashMap::new(),
            }),
        }
    }

    /// Register `obj` and return its new handle.
    pub fn set(&self, obj: T) -> Handle {
        let mut slots = self.slots.lock();
        slots.last += 1;
        let handle = slots.last;
        slots.entries.insert(handle, obj);
        handle
    }

    /// Register an object that needs to know its own handle.
    ///
    /// `build` runs with the registry locked and must not touch this registry.
    pub fn set_with<F>(&self, build: F) -> (Handle, T)
    where
        F: FnOnce(Handle) -> T,
    {
        let mut slots = self.slots.lock();
        slots.last += 1;
        let handle = slots.last;
        let obj = build(handle);
        slots.entries.insert(handle, obj.clone());
        (handle, obj)
    }

    /// Resolve a handle.
    ///
    /// # Panics
    ///
    /// Panics if the handle is not registered. An unknown handle coming back
    /// from the engine means an object was released while the engine still
    /// referenced it.
    pub fn get(&self, handle: Handle) -> T {
        let found = self.slots.lock().entries.get(&handle).cloned();
        match found {
            Some(obj) => obj,
            None => panic!("handle {} is not registered", handle),
        }
    }

    /// Resolve a handle without the lifetime check.
    pub fn try_get(&self, handle: Handle) -> Option<T> {
        self.slots.lock().entries.get(&handle).cloned()
    }

    /// Release a handle. Releasing twice is harmless.
    pub fn delete(&self, handle: Handle) -> Option<T> {
        self.slots.lock().entries.remove(&handle)
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.slots.lock().entries.contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.slots.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> Default for HandleRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
