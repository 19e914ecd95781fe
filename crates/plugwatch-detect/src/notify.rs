//! Device-change notification types
//!
//! A notification source delivers a [`DeviceChangeKind`] to every subscribed
//! handler. Handlers may run on any thread.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Kind of device-change notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceChangeKind {
    /// A device was attached
    Arrived,
    /// A device was detached
    Removed,
    /// Any other change (configuration, docking, etc.)
    Other,
}

/// Token identifying an active subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Callback invoked for each notification
pub type DeviceChangeHandler = Arc<dyn Fn(DeviceChangeKind) + Send + Sync>;

/// Anything that can deliver device-change notifications
pub trait DeviceChangeSource: Send + Sync {
    /// Register a handler, returning the token needed to unregister it
    fn subscribe(&self, handler: DeviceChangeHandler) -> SubscriptionId;

    /// Remove a handler; unknown tokens are ignored
    fn unsubscribe(&self, id: SubscriptionId);
}

/// Handler registry shared between a source and its dispatch loop
#[derive(Default)]
pub struct Subscribers {
    next_id: AtomicU64,
    handlers: Mutex<HashMap<SubscriptionId, DeviceChangeHandler>>,
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, handler: DeviceChangeHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().insert(id, handler);
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.lock().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver a notification to every handler
    ///
    /// Handlers are called without the registry lock held, so they may
    /// subscribe or unsubscribe from inside the callback.
    pub fn dispatch(&self, kind: DeviceChangeKind) {
        let handlers: Vec<DeviceChangeHandler> = self.lock().values().cloned().collect();
        for handler in handlers {
            handler(kind);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SubscriptionId, DeviceChangeHandler>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DeviceChangeSource for Subscribers {
    fn subscribe(&self, handler: DeviceChangeHandler) -> SubscriptionId {
        Subscribers::subscribe(self, handler)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        Subscribers::unsubscribe(self, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_dispatch_reaches_all_handlers() {
        let subs = Subscribers::new();
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let count = count.clone();
            subs.subscribe(Arc::new(move |kind| {
                if kind == DeviceChangeKind::Arrived {
                    count.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }

        subs.dispatch(DeviceChangeKind::Arrived);
        subs.dispatch(DeviceChangeKind::Removed);

        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let subs = Subscribers::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let id = subs.subscribe(Arc::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        subs.dispatch(DeviceChangeKind::Arrived);
        subs.unsubscribe(id);
        subs.dispatch(DeviceChangeKind::Arrived);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(subs.is_empty());
    }

    #[test]
    fn test_ids_are_unique() {
        let subs = Subscribers::new();
        let a = subs.subscribe(Arc::new(|_| {}));
        let b = subs.subscribe(Arc::new(|_| {}));
        assert_ne!(a, b);
        assert_eq!(subs.len(), 2);
    }
}
