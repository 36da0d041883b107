//! Online/offline state reported by the host platform.

use crate::observers::{notify_one, Listener, Observers, SubscriptionId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Tracks whether the network is reachable.
///
/// The host calls [`set_online`](Self::set_online) from its own
/// online/offline events; nothing here polls.
#[derive(Debug)]
pub struct ConnectivityMonitor {
    online: AtomicBool,
    observers: Observers<bool>,
}

impl ConnectivityMonitor {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
            observers: Observers::new(),
        }
    }

    pub fn new_shared(online: bool) -> Arc<Self> {
        Arc::new(Self::new(online))
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Record the current state. Listeners hear only about transitions.
    pub fn set_online(&self, online: bool) {
        let previous = self.online.swap(online, Ordering::SeqCst);
        if previous != online {
            tracing::debug!(online, "connectivity changed");
            self.observers.notify(&online);
        }
    }

    /// Register a listener; it is called immediately with the current state.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&bool) + Send + Sync + 'static,
    {
        let listener: Listener<bool> = Arc::new(listener);
        let id = self.observers.subscribe(Arc::clone(&listener));
        notify_one(id, &listener, &self.is_online());
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn subscribe_reports_current_state_then_transitions() {
        let monitor = ConnectivityMonitor::new(false);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        monitor.subscribe(move |online| sink.lock().unwrap().push(*online));

        monitor.set_online(true);
        monitor.set_online(true);
        monitor.set_online(false);

        assert_eq!(*seen.lock().unwrap(), vec![false, true, false]);
        assert!(!monitor.is_online());
    }

    #[test]
    fn unsubscribed_listener_hears_nothing() {
        let monitor = ConnectivityMonitor::new(true);
        let seen = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&seen);
        let id = monitor.subscribe(move |_| *sink.lock().unwrap() += 1);

        assert!(monitor.unsubscribe(id));
        monitor.set_online(false);
        assert_eq!(*seen.lock().unwrap(), 1);
    }
}
