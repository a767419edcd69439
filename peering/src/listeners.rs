use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

pub type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Removes exactly one registered callback when cancelled. Cancelling more than once is a no-op, as is cancelling
/// after the owning registry has been dropped.
#[must_use = "the callback stays registered until the handle is cancelled"]
pub struct CancelHandle {
    cancel: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl CancelHandle {
    pub(crate) fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self { cancel: Mutex::new(Some(Box::new(cancel))) }
    }

    pub fn cancel(&self) {
        // Take the closure first so it runs without holding our own lock.
        let cancel = self.cancel.lock().take();
        if let Some(cancel) = cancel {
            cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.lock().is_none()
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CancelHandle(cancelled: {})", self.is_cancelled())
    }
}

struct Slots<T> {
    next_id: u64,
    callbacks: BTreeMap<u64, Callback<T>>,
}

/// A set of callbacks, each addressable by a unique id that is never reused.
pub(crate) struct Listeners<T> {
    slots: Arc<Mutex<Slots<T>>>,
}

impl<T: 'static> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Listeners<T> {
    pub fn new() -> Self {
        Self { slots: Arc::new(Mutex::new(Slots { next_id: 0, callbacks: BTreeMap::new() })) }
    }

    pub fn add(&self, callback: Callback<T>) -> CancelHandle {
        let id = {
            let mut slots = self.slots.lock();
            let id = slots.next_id;
            slots.next_id += 1;
            slots.callbacks.insert(id, callback);
            id
        };
        let weak: Weak<Mutex<Slots<T>>> = Arc::downgrade(&self.slots);
        CancelHandle::new(move || {
            if let Some(slots) = weak.upgrade() {
                slots.lock().callbacks.remove(&id);
            }
        })
    }

    /// Invokes every registered callback and returns how many there were. The callbacks run outside the registry
    /// lock, so they may add or cancel listeners themselves.
    pub fn notify(&self, value: &T) -> usize {
        let callbacks: Vec<Callback<T>> = self.slots.lock().callbacks.values().cloned().collect();
        for callback in &callbacks {
            callback(value);
        }
        callbacks.len()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().callbacks.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn cancel_removes_only_its_callback() {
        let listeners = Listeners::<u32>::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h1 = hits.clone();
        let first = listeners.add(Arc::new(move |v: &u32| {
            h1.fetch_add(*v as usize, Ordering::SeqCst);
        }));
        let h2 = hits.clone();
        let _second = listeners.add(Arc::new(move |v: &u32| {
            h2.fetch_add(*v as usize * 10, Ordering::SeqCst);
        }));
        assert_eq!(listeners.notify(&1), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 11);
        first.cancel();
        first.cancel();
        assert!(first.is_cancelled());
        listeners.notify(&1);
        assert_eq!(hits.load(Ordering::SeqCst), 21);
        assert_eq!(listeners.len(), 1);
    }

    #[test]
    fn cancel_after_registry_dropped() {
        let listeners = Listeners::<u32>::new();
        let handle = listeners.add(Arc::new(|_: &u32| {}));
        drop(listeners);
        handle.cancel();
        assert!(handle.is_cancelled());
    }
}
