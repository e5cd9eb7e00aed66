//! Table subscriptions.
//!
//! Subscribers register a table and an optional equality predicate. Every
//! change event for that table whose record matches the predicate is handed
//! to the subscriber's callback. Optimistic events are only delivered to
//! subscribers that asked for them.
//!
//! Delivery is best-effort and isolated: callbacks run outside the registry
//! lock, and a panicking callback is logged without affecting delivery to
//! anyone else.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use sync_types::{matches_predicate, ChangeEvent, ChangeStatus, Record};

/// Subscriber callback.
pub type ChangeCallback = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Options for [`SubscriptionRegistry::subscribe_with`].
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    /// Only records matching this predicate are delivered.
    pub predicate: Option<Record>,
    /// Deliver optimistic (unconfirmed) changes as well.
    pub include_optimistic: bool,
}

struct Entry {
    table: String,
    predicate: Option<Record>,
    include_optimistic: bool,
    callback: ChangeCallback,
}

impl Entry {
    fn wants(&self, event: &ChangeEvent) -> bool {
        if self.table != event.table {
            return false;
        }
        if event.status == ChangeStatus::Optimistic && !self.include_optimistic {
            return false;
        }
        self.predicate
            .as_ref()
            .map_or(true, |p| matches_predicate(p, &event.record))
    }
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    entries: BTreeMap<u64, Entry>,
}

/// Registry of table subscriptions. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to confirmed and reverted changes on `table`.
    pub fn subscribe<F>(
        &self,
        table: impl Into<String>,
        predicate: Option<Record>,
        callback: F,
    ) -> Subscription
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.subscribe_with(
            table,
            SubscribeOptions {
                predicate,
                include_optimistic: false,
            },
            callback,
        )
    }

    /// Subscribe with explicit options.
    pub fn subscribe_with<F>(
        &self,
        table: impl Into<String>,
        options: SubscribeOptions,
        callback: F,
    ) -> Subscription
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        let table = table.into();
        let mut inner = lock(&self.inner);
        let id = inner.next_id;
        inner.next_id += 1;
        tracing::debug!(id, table = %table, "subscription added");
        inner.entries.insert(
            id,
            Entry {
                table,
                predicate: options.predicate,
                include_optimistic: options.include_optimistic,
                callback: Arc::new(callback),
            },
        );

        Subscription {
            id,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver `event` to every matching subscriber.
    ///
    /// Returns the number of callbacks invoked (including ones that
    /// panicked).
    pub fn notify(&self, event: &ChangeEvent) -> usize {
        let targets: Vec<ChangeCallback> = lock(&self.inner)
            .entries
            .values()
            .filter(|entry| entry.wants(event))
            .map(|entry| Arc::clone(&entry.callback))
            .collect();

        for callback in &targets {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                tracing::warn!(table = %event.table, "subscriber callback panicked");
            }
        }
        targets.len()
    }

    /// Number of active subscriptions.
    pub fn len(&self) -> usize {
        lock(&self.inner).entries.len()
    }

    /// Whether there are no active subscriptions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of active subscriptions on `table`.
    pub fn count_for(&self, table: &str) -> usize {
        lock(&self.inner)
            .entries
            .values()
            .filter(|e| e.table == table)
            .count()
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("subscriptions", &self.len())
            .finish()
    }
}

/// Handle for one subscription.
///
/// Dropping the handle does not unsubscribe; call [`Subscription::unsubscribe`].
#[derive(Debug, Clone)]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Inner>>,
}

impl Subscription {
    /// Stop receiving events. Idempotent: only the first call has an effect.
    pub fn unsubscribe(&self) -> bool {
        let Some(inner) = self.registry.upgrade() else {
            return false;
        };
        let removed = lock(&inner).entries.remove(&self.id).is_some();
        if removed {
            tracing::debug!(id = self.id, "subscription removed");
        }
        removed
    }

    /// Whether the subscription is still registered.
    pub fn is_active(&self) -> bool {
        self.registry
            .upgrade()
            .map(|inner| lock(&inner).entries.contains_key(&self.id))
            .unwrap_or(false)
    }
}

fn lock(mutex: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
