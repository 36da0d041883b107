//! Listener registry shared by the connectivity, auth and sync notifications.

use dashmap::DashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

pub type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// A set of listeners for events of type `T`.
///
/// Thread-safe and can be shared via `Arc`.
pub struct Observers<T> {
    listeners: DashMap<SubscriptionId, Listener<T>>,
    next_id: AtomicU64,
}

impl<T> Default for Observers<T> {
    fn default() -> Self {
        Self {
            listeners: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<T> std::fmt::Debug for Observers<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl<T> Observers<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener.
    pub fn subscribe(&self, listener: Listener<T>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.insert(id, listener);
        id
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.listeners.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Call every listener with `event`.
    ///
    /// Listeners run outside the map's locks, so they may subscribe or
    /// unsubscribe. A panicking listener is logged and skipped.
    pub fn notify(&self, event: &T) {
        let mut snapshot: Vec<(SubscriptionId, Listener<T>)> = self
            .listeners
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();
        snapshot.sort_by_key(|(id, _)| *id);

        for (id, listener) in snapshot {
            notify_one(id, &listener, event);
        }
    }
}

/// Call a single listener, containing any panic.
pub(crate) fn notify_one<T>(id: SubscriptionId, listener: &Listener<T>, event: &T) {
    if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
        tracing::error!(subscription = id.0, "listener panicked");
    }
}
