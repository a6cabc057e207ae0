//! Event Bus implementation.
//!
//! [`EventBus`] is the context object that owns the subscription table, the
//! topic statistics, the request registry and the passive listeners. Create
//! one per host (or per test) and share it as `Arc<EventBus>`.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::config::EventBusConfig;
use crate::error::{panic_message, BusError, Result};
use crate::event::{Event, EventData};
use crate::listener::{notify_each, BusListener, ListenerHandle, ListenerList};
use crate::request::RequestRegistry;
use crate::scheduler::{DispatchQueue, InlineScheduler, Scheduler};
use crate::subscription::{
    Subscription, SubscriptionId, SubscriptionOptions, SubscriptionTable, TopicStats,
};
use crate::topic;
use crate::types::{EventHandler, RequestHandler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    /// Hand handlers and the listener broadcast to the scheduler.
    Queued,
    /// Run everything on the publishing thread before returning.
    Inline,
}

/// Central event bus for plugin-to-plugin communication
pub struct EventBus {
    table: SubscriptionTable,
    requests: RequestRegistry,
    listeners: ListenerList,
    /// Broadcast sender mirroring the passive listener notifications
    sender: broadcast::Sender<Event>,
    scheduler: Arc<dyn Scheduler>,
    config: EventBusConfig,
}

impl EventBus {
    /// Create a new event bus with a dedicated dispatch thread
    pub fn new() -> Result<Self> {
        Self::with_config(EventBusConfig::default())
    }

    /// Create a new event bus with custom configuration
    pub fn with_config(config: EventBusConfig) -> Result<Self> {
        config.validate().map_err(BusError::from)?;
        let queue = DispatchQueue::spawn(&config.dispatch_thread_name)?;
        Ok(Self::with_scheduler(Arc::new(queue), config))
    }

    /// Create an event bus whose asynchronous deliveries run on `scheduler`
    pub fn with_scheduler(scheduler: Arc<dyn Scheduler>, config: EventBusConfig) -> Self {
        let (sender, _) = broadcast::channel(config.listener_channel_capacity.max(1));
        Self {
            table: SubscriptionTable::new(),
            requests: RequestRegistry::new(),
            listeners: ListenerList::default(),
            sender,
            scheduler,
            config,
        }
    }

    /// Create an event bus that delivers everything on the publishing thread
    ///
    /// Useful for hosts without an event loop and for deterministic tests.
    pub fn inline() -> Self {
        Self::with_scheduler(Arc::new(InlineScheduler), EventBusConfig::default())
    }

    // ===== Publishing =====

    /// Publish an event without waiting for subscribers
    ///
    /// Handlers run on the scheduler, never on the calling thread (unless the
    /// bus was built with an inline scheduler). Returns the number of
    /// subscriptions notified.
    pub fn publish(&self, topic: &str, data: EventData, sender_id: &str) -> usize {
        self.deliver(Event::new(topic, data, sender_id), Delivery::Queued)
    }

    /// Publish an event and run every matching handler before returning
    ///
    /// A panicking handler is logged and skipped; later handlers still run.
    pub fn publish_sync(&self, topic: &str, data: EventData, sender_id: &str) -> usize {
        self.deliver(Event::new(topic, data, sender_id), Delivery::Inline)
    }

    fn deliver(&self, event: Event, mode: Delivery) -> usize {
        let mut matches = self.table.record_and_match(&event.topic, event.timestamp);
        if matches.is_empty() {
            return 0;
        }

        // Stable: equal priorities keep subscription order
        matches.sort_by(|a, b| b.options().priority.cmp(&a.options().priority));

        let event = Arc::new(event);
        let mut notified = 0;

        for subscription in &matches {
            if subscription.excludes_sender(&event.sender_id) {
                continue;
            }
            notified += 1;

            let Some(handler) = subscription.handler().cloned() else {
                continue;
            };
            if self.config.trace_deliveries {
                tracing::trace!(
                    "Delivering {} to {} ({:?}, priority {})",
                    event.topic,
                    subscription.id(),
                    mode,
                    subscription.options().priority
                );
            }

            match mode {
                Delivery::Inline => invoke_handler(&handler, &event, subscription),
                Delivery::Queued => {
                    let event = Arc::clone(&event);
                    let subscription = Arc::clone(subscription);
                    self.scheduler.schedule(Box::new(move || {
                        invoke_handler(&handler, &event, &subscription)
                    }));
                }
            }
        }

        let listeners = self.listeners.snapshot();
        let sender = self.sender.clone();
        let notify_listeners = move || {
            notify_each(&listeners, |listener| listener.on_event(&event));
            // No receivers is not an error
            let _ = sender.send(Event::clone(&event));
        };
        match mode {
            Delivery::Inline => notify_listeners(),
            Delivery::Queued => self.scheduler.schedule(Box::new(notify_listeners)),
        }

        notified
    }

    // ===== Subscriptions =====

    /// Subscribe to events matching `pattern` with a callback
    pub fn subscribe<F>(
        &self,
        pattern: &str,
        subscriber_id: &str,
        handler: F,
        options: SubscriptionOptions,
    ) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribe_with(pattern, subscriber_id, Some(Arc::new(handler)), options)
    }

    /// Subscribe without a callback
    ///
    /// The subscription counts towards matching and statistics, so passive
    /// listeners are notified for the pattern.
    pub fn subscribe_simple(&self, pattern: &str, subscriber_id: &str) -> SubscriptionId {
        self.subscribe_with(pattern, subscriber_id, None, SubscriptionOptions::default())
    }

    /// Subscribe with an optional callback
    pub fn subscribe_with(
        &self,
        pattern: &str,
        subscriber_id: &str,
        handler: Option<EventHandler>,
        options: SubscriptionOptions,
    ) -> SubscriptionId {
        let id = self.table.subscribe(pattern, subscriber_id, handler, options);
        tracing::debug!("Subscribed {} to {} (id: {})", subscriber_id, pattern, id);

        self.listeners.notify(|listener| {
            listener.on_subscription_added(id, pattern);
            listener.on_subscriptions_changed();
        });
        id
    }

    /// Remove one subscription
    ///
    /// Returns true if the subscription was found and removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        if !self.table.unsubscribe(id) {
            return false;
        }
        tracing::debug!("Unsubscribed {}", id);

        self.listeners.notify(|listener| {
            listener.on_subscription_removed(id);
            listener.on_subscriptions_changed();
        });
        true
    }

    /// Remove every subscription owned by `subscriber_id`
    ///
    /// Returns the removed ids.
    pub fn unsubscribe_all(&self, subscriber_id: &str) -> Vec<SubscriptionId> {
        let ids = self.table.unsubscribe_all(subscriber_id);
        if ids.is_empty() {
            return ids;
        }
        tracing::debug!(
            "Unsubscribed all for {} ({} subscriptions)",
            subscriber_id,
            ids.len()
        );

        self.listeners.notify(|listener| {
            for id in &ids {
                listener.on_subscription_removed(*id);
            }
            listener.on_subscriptions_changed();
        });
        ids
    }

    // ===== Queries =====

    /// Number of subscriptions whose pattern matches `topic`
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.table.subscriber_count(topic)
    }

    /// Distinct patterns currently subscribed
    pub fn active_topics(&self) -> Vec<String> {
        self.table.active_patterns()
    }

    /// Live subscriber count and publish history for an exact topic
    pub fn topic_stats(&self, topic: &str) -> TopicStats {
        self.table.topic_stats(topic)
    }

    /// Subscription ids owned by `subscriber_id`
    pub fn subscriptions_for(&self, subscriber_id: &str) -> Vec<SubscriptionId> {
        self.table.subscriptions_for(subscriber_id)
    }

    /// Look up a live subscription
    pub fn subscription(&self, id: SubscriptionId) -> Option<Arc<Subscription>> {
        self.table.get(id)
    }

    /// Check a topic against a pattern without touching bus state
    pub fn matches_topic(&self, topic: &str, pattern: &str) -> bool {
        topic::matches_topic(topic, pattern)
    }

    /// Total number of live subscriptions
    pub fn total_subscribers(&self) -> usize {
        self.table.len()
    }

    // ===== Request/Response =====

    /// Register the single responder for an exact topic
    ///
    /// Returns false, leaving the existing responder in place, if the topic
    /// is already handled.
    pub fn register_handler<F>(&self, topic: &str, handler_id: &str, handler: F) -> bool
    where
        F: Fn(&Event) -> anyhow::Result<EventData> + Send + Sync + 'static,
    {
        self.register_handler_with(topic, handler_id, Arc::new(handler))
    }

    /// Register a pre-built [`RequestHandler`]
    pub fn register_handler_with(
        &self,
        topic: &str,
        handler_id: &str,
        handler: RequestHandler,
    ) -> bool {
        self.requests.register_handler(topic, handler_id, handler)
    }

    /// Remove the responder for `topic`
    pub fn unregister_handler(&self, topic: &str) -> bool {
        self.requests.unregister_handler(topic)
    }

    /// Remove every responder owned by `handler_id`, returning the count
    pub fn unregister_all_handlers(&self, handler_id: &str) -> usize {
        self.requests.unregister_all_handlers(handler_id)
    }

    /// Whether `topic` has a responder
    pub fn has_handler(&self, topic: &str) -> bool {
        self.requests.has_handler(topic)
    }

    /// Call the responder for `topic` on this thread
    ///
    /// Returns `None` if nobody handles the topic or the responder fails.
    /// The timeout (default from config when `None`) is accepted but not
    /// enforced.
    pub fn request(
        &self,
        topic: &str,
        data: EventData,
        sender_id: &str,
        timeout: Option<Duration>,
    ) -> Option<EventData> {
        let timeout = timeout.unwrap_or_else(|| self.config.default_request_timeout());
        let event = Event::new(topic, data, sender_id);
        self.requests.request(&event, timeout)
    }

    // ===== Listeners =====

    /// Attach a passive listener that sees every delivered event
    pub fn add_listener(&self, listener: Arc<dyn BusListener>) -> ListenerHandle {
        self.listeners.add(listener)
    }

    /// Detach a passive listener
    pub fn remove_listener(&self, handle: ListenerHandle) -> bool {
        self.listeners.remove(handle)
    }

    /// Number of attached passive listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Get a receiver for manual event polling
    ///
    /// Receives the same events as passive listeners, for async consumers
    /// that prefer a channel to a callback.
    pub fn receiver(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Block until every asynchronous delivery queued so far has run
    ///
    /// Returns at once when called from a queued handler. Inside a tokio
    /// runtime it does not wait; await [`DispatchQueue::flushed`] there.
    pub fn flush(&self) {
        self.scheduler.flush();
    }

    /// Get the current configuration
    pub fn config(&self) -> &EventBusConfig {
        &self.config
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriptions", &self.total_subscribers())
            .field("request_handlers", &self.requests.len())
            .field("listeners", &self.listener_count())
            .field("config", &self.config)
            .finish()
    }
}

/// Run one subscriber callback, logging instead of propagating a panic.
fn invoke_handler(handler: &EventHandler, event: &Event, subscription: &Subscription) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
        let err = BusError::HandlerPanicked {
            topic: event.topic.clone(),
            message: panic_message(payload.as_ref()),
        };
        tracing::error!(
            "{} (subscriber {}, subscription {})",
            err,
            subscription.subscriber_id(),
            subscription.id()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::payload;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn order_data() -> EventData {
        payload(json!({"orderId": "abc123"}))
    }

    #[test]
    fn test_event_bus_creation() {
        let bus = EventBus::inline();
        assert_eq!(bus.total_subscribers(), 0);
        assert!(bus.active_topics().is_empty());
    }

    #[test]
    fn test_subscribe_and_unsubscribe() {
        let bus = EventBus::inline();

        let id = bus.subscribe("orders/*", "rules", |_| {}, SubscriptionOptions::default());
        assert_eq!(bus.total_subscribers(), 1);
        assert_eq!(bus.subscriptions_for("rules"), vec![id]);

        assert!(bus.unsubscribe(id));
        assert_eq!(bus.total_subscribers(), 0);

        // Double unsubscribe should return false
        assert!(!bus.unsubscribe(id));
    }

    #[test]
    fn test_publish_sync_delivery() {
        let bus = EventBus::inline();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        bus.subscribe(
            "orders/*",
            "rules",
            move |event| {
                assert_eq!(event.get("orderId"), Some(&json!("abc123")));
                counter_clone.fetch_add(1, Ordering::SeqCst);
            },
            SubscriptionOptions::default(),
        );

        assert_eq!(bus.publish_sync("orders/created", order_data(), "orders"), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_priority_order() {
        let bus = EventBus::inline();
        let order = Arc::new(Mutex::new(Vec::new()));

        for (name, priority) in [("low", 0), ("high", 10), ("mid", 5)] {
            let order = order.clone();
            bus.subscribe(
                "orders/created",
                name,
                move |_| order.lock().push(name),
                SubscriptionOptions::default().with_priority(priority),
            );
        }

        bus.publish_sync("orders/created", EventData::new(), "orders");
        assert_eq!(*order.lock(), vec!["high", "mid", "low"]);
    }

    #[test]
    fn test_no_match_still_counts_event() {
        let bus = EventBus::inline();
        assert_eq!(bus.publish_sync("orders/created", EventData::new(), "orders"), 0);
        assert_eq!(bus.publish("orders/created", EventData::new(), "orders"), 0);

        let stats = bus.topic_stats("orders/created");
        assert_eq!(stats.event_count, 2);
        assert_eq!(stats.subscriber_count, 0);
        assert!(stats.last_event_time.is_some());
    }

    #[test]
    fn test_handlerless_subscription_counts() {
        let bus = EventBus::inline();
        bus.subscribe_simple("orders/**", "ui");
        assert_eq!(bus.publish_sync("orders/items/added", EventData::new(), "orders"), 1);
    }

    #[test]
    fn test_own_events_skipped() {
        let bus = EventBus::inline();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        bus.subscribe(
            "orders/*",
            "orders",
            move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            },
            SubscriptionOptions::default(),
        );

        assert_eq!(bus.publish_sync("orders/created", EventData::new(), "orders"), 0);
        assert_eq!(bus.publish_sync("orders/created", EventData::new(), "other"), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_request_uses_config_timeout() {
        let bus = EventBus::inline();
        bus.register_handler("math/double", "calc", |event| {
            let value = event.get("value").and_then(|v| v.as_i64()).unwrap_or(0);
            Ok(payload(json!({"value": value * 2})))
        });

        let response = bus
            .request("math/double", payload(json!({"value": 21})), "client", None)
            .expect("handler answers");
        assert_eq!(response.get("value"), Some(&json!(42)));
    }

    #[tokio::test]
    async fn test_async_receiver() {
        let bus = EventBus::inline();
        let mut receiver = bus.receiver();
        bus.subscribe_simple("orders/*", "ui");

        bus.publish("orders/created", order_data(), "orders");

        let received = receiver.try_recv().expect("event broadcast");
        assert_eq!(received.topic, "orders/created");
        assert_eq!(received.sender_id, "orders");
    }
}
