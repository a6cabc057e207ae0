//! Passive bus listeners
//!
//! Defines the listener trait for observers that watch every delivered event
//! instead of registering a pattern, such as UI-binding layers. Listeners
//! must filter by topic themselves.

use parking_lot::RwLock;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::panic_message;
use crate::event::Event;
use crate::subscription::SubscriptionId;

/// Handle for a registered bus listener.
///
/// Uniquely identifies a listener registration. Can be used to detach it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(Uuid);

impl std::fmt::Display for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Listener({})", &self.0.to_string()[..8])
    }
}

/// Listener trait for bus activity
///
/// Implement this trait to observe the bus without subscribing to a pattern
pub trait BusListener: Send + Sync {
    /// Called for every published event that matched at least one subscription
    fn on_event(&self, _event: &Event) {}

    /// Called after a subscription is added
    fn on_subscription_added(&self, _id: SubscriptionId, _pattern: &str) {}

    /// Called once for each removed subscription
    fn on_subscription_removed(&self, _id: SubscriptionId) {}

    /// Called once per change to the set of subscriptions
    fn on_subscriptions_changed(&self) {}
}

impl<F> BusListener for F
where
    F: Fn(&Event) + Send + Sync,
{
    fn on_event(&self, event: &Event) {
        self(event)
    }
}

#[derive(Default)]
pub(crate) struct ListenerList {
    listeners: RwLock<Vec<(ListenerHandle, Arc<dyn BusListener>)>>,
}

impl ListenerList {
    pub(crate) fn add(&self, listener: Arc<dyn BusListener>) -> ListenerHandle {
        let handle = ListenerHandle(Uuid::new_v4());
        self.listeners.write().push((handle, listener));
        tracing::debug!("{} attached", handle);
        handle
    }

    pub(crate) fn remove(&self, handle: ListenerHandle) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(other, _)| *other != handle);
        let removed = listeners.len() != before;
        if removed {
            tracing::debug!("{} detached", handle);
        }
        removed
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<dyn BusListener>> {
        self.listeners
            .read()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.read().len()
    }

    /// Invoke `notify` on every listener outside the lock, containing panics.
    pub(crate) fn notify(&self, notify: impl Fn(&dyn BusListener)) {
        notify_each(&self.snapshot(), notify);
    }
}

/// Invoke `notify` on each listener, logging and skipping any that panics.
pub(crate) fn notify_each(listeners: &[Arc<dyn BusListener>], notify: impl Fn(&dyn BusListener)) {
    for listener in listeners {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| notify(listener.as_ref())));
        if let Err(payload) = outcome {
            tracing::error!("Bus listener panicked: {}", panic_message(payload.as_ref()));
        }
    }
}
