//! Minimal single-value observable.
//!
//! A [`Signal`] stores a value and an ordered list of listeners. Storing a value never
//! notifies on its own: whoever calls [`Signal::set`] decides whether and when to call
//! [`Signal::notify_listeners`]. The [crate::manager::MetadataManager] relies on this to
//! hydrate a consumer's signal on subscribe without echoing, and to control fan-out order.

use crate::error::MetaBindError;
use parking_lot::Mutex;
use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

pub type ListenerFn<T> = dyn Fn(&T) -> Result<(), MetaBindError> + Send + Sync;

/// Handle returned by [`Signal::register_listener`], used to unregister it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

struct Listener<T> {
    id: ListenerId,
    callback: Arc<ListenerFn<T>>,
}

impl<T> Clone for Listener<T> {
    fn clone(&self) -> Self {
        Listener {
            id: self.id,
            callback: self.callback.clone(),
        }
    }
}

struct SignalInner<T> {
    value: Mutex<T>,
    listeners: Mutex<Vec<Listener<T>>>,
    next_id: AtomicU64,
}

/// Shared handle; clones observe the same value and listeners.
pub struct Signal<T> {
    inner: Arc<SignalInner<T>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Signal {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Default> Default for Signal<T> {
    fn default() -> Self {
        Signal::new(T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("value", &*self.inner.value.lock())
            .field("listeners", &self.inner.listeners.lock().len())
            .finish()
    }
}

impl<T> Signal<T> {
    pub fn new(value: T) -> Self {
        Signal {
            inner: Arc::new(SignalInner {
                value: Mutex::new(value),
                listeners: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Store a new value. Does not notify.
    pub fn set(&self, value: T) {
        *self.inner.value.lock() = value;
    }

    /// Store `value` unless it equals the current one. Returns whether it was stored.
    pub fn set_if_changed(&self, value: T) -> bool
    where
        T: PartialEq,
    {
        let mut current = self.inner.value.lock();
        if *current == value {
            return false;
        }
        *current = value;
        true
    }

    pub fn register_listener<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&T) -> Result<(), MetaBindError> + Send + Sync + 'static,
    {
        let id = ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.listeners.lock().push(Listener {
            id,
            callback: Arc::new(callback),
        });
        id
    }

    /// Returns false if the listener was not registered.
    pub fn unregister_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.lock();
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        listeners.len() != before
    }

    pub fn unregister_all(&self) {
        self.inner.listeners.lock().clear();
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }
}

impl<T: Clone> Signal<T> {
    pub fn get(&self) -> T {
        self.inner.value.lock().clone()
    }

    /// Run every listener, in registration order, with the current value.
    ///
    /// Listeners run on a snapshot of the list with no lock held, so a listener may
    /// register, unregister or set this signal. A failing listener is logged and the
    /// remaining listeners still run.
    pub fn notify_listeners(&self) {
        let value = self.get();
        let listeners: Vec<Listener<T>> = self.inner.listeners.lock().clone();
        for listener in listeners.iter() {
            if let Err(e) = (listener.callback)(&value) {
                tracing::warn!("Signal listener {:?} failed: {e}", listener.id);
            }
        }
    }
}
