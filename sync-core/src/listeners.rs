//! Listener lists for status and error notifications.
//!
//! A [`ListenerSet`] is shared between the component that emits and the
//! callers that register. Emission snapshots the current listeners and calls
//! them outside the lock, so a listener may register or unregister others
//! (including itself) while being called. A panicking listener is logged and
//! skipped; the remaining listeners still run.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Inner<E> {
    next_id: u64,
    listeners: BTreeMap<u64, Listener<E>>,
}

/// A set of callbacks receiving values of type `E`.
pub struct ListenerSet<E> {
    inner: Arc<Mutex<Inner<E>>>,
}

impl<E> ListenerSet<E> {
    /// Create an empty set.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                next_id: 0,
                listeners: BTreeMap::new(),
            })),
        }
    }

    /// Register a listener. It stays registered until the handle is used to
    /// unsubscribe; dropping the handle does not remove it.
    pub fn add<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&E) + Send + Sync + 'static,
        E: 'static,
    {
        let mut inner = lock(&self.inner);
        let id = inner.next_id;
        inner.next_id += 1;
        inner.listeners.insert(id, Arc::new(listener));

        let weak: Weak<Mutex<Inner<E>>> = Arc::downgrade(&self.inner);
        ListenerHandle {
            remove: Box::new(move || {
                weak.upgrade()
                    .map(|inner| lock(&inner).listeners.remove(&id).is_some())
                    .unwrap_or(false)
            }),
        }
    }

    /// Call every registered listener with `value`, in registration order.
    pub fn emit(&self, value: &E) {
        let snapshot: Vec<Listener<E>> = lock(&self.inner).listeners.values().cloned().collect();
        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(value))).is_err() {
                tracing::warn!("listener panicked; continuing with the rest");
            }
        }
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        lock(&self.inner).listeners.len()
    }

    /// Whether no listeners are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E> Default for ListenerSet<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for ListenerSet<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E> std::fmt::Debug for ListenerSet<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerSet")
            .field("listeners", &self.len())
            .finish()
    }
}

/// Removes a listener from its set.
pub struct ListenerHandle {
    remove: Box<dyn Fn() -> bool + Send + Sync>,
}

impl ListenerHandle {
    /// Remove the listener. Returns `true` the first time; later calls are
    /// no-ops returning `false`.
    pub fn unsubscribe(&self) -> bool {
        (self.remove)()
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ListenerHandle")
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
