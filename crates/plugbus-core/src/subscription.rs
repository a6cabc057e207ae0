//! Subscription table.
//!
//! Owns every live subscription, the index from subscriber identity to its
//! subscription ids, and the per-topic publish statistics. All of it sits
//! behind a single exclusive lock; callers that need to run handlers take a
//! snapshot of the matched subscriptions and release the lock first.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use uuid::Uuid;

use crate::event::EventData;
use crate::topic::TopicMatcher;
use crate::types::EventHandler;

/// Subscription handle for unsubscribing from events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Create a new unique subscription ID
    fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Per-subscription delivery options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionOptions {
    /// Higher values are delivered first.
    pub priority: i32,
    /// Deliver events whose sender is this subscriber.
    pub receive_own_events: bool,
    /// Reserved override of the bus delivery mode. Carried with the
    /// subscription but not consulted by the dispatcher.
    pub async_delivery: bool,
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self {
            priority: 0,
            receive_own_events: false,
            async_delivery: true,
        }
    }
}

impl SubscriptionOptions {
    /// Set the delivery priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Opt in to events published by the subscriber itself.
    pub fn receiving_own_events(mut self) -> Self {
        self.receive_own_events = true;
        self
    }
}

/// A live subscription
pub struct Subscription {
    id: SubscriptionId,
    subscriber_id: String,
    handler: Option<EventHandler>,
    options: SubscriptionOptions,
    matcher: TopicMatcher,
}

impl Subscription {
    /// Unique id assigned at subscribe time.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// The pattern this subscription was created with.
    pub fn pattern(&self) -> &str {
        self.matcher.pattern()
    }

    /// Owning subscriber.
    pub fn subscriber_id(&self) -> &str {
        &self.subscriber_id
    }

    /// Delivery options.
    pub fn options(&self) -> &SubscriptionOptions {
        &self.options
    }

    /// Callback, if one was registered.
    pub fn handler(&self) -> Option<&EventHandler> {
        self.handler.as_ref()
    }

    /// Test a topic against this subscription's pattern.
    pub fn matches(&self, topic: &str) -> bool {
        self.matcher.matches(topic)
    }

    /// Whether an event from `sender_id` should be skipped for this subscriber.
    pub fn excludes_sender(&self, sender_id: &str) -> bool {
        !self.options.receive_own_events && self.subscriber_id == sender_id
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("pattern", &self.pattern())
            .field("subscriber_id", &self.subscriber_id)
            .field("has_handler", &self.handler.is_some())
            .field("options", &self.options)
            .finish()
    }
}

/// Snapshot of one topic's activity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicStats {
    /// Exact topic.
    pub topic: String,
    /// Subscriptions whose pattern currently matches the topic.
    pub subscriber_count: usize,
    /// Number of publishes to the topic since the bus was created.
    pub event_count: u64,
    /// Timestamp of the latest publish, if any.
    pub last_event_time: Option<i64>,
}

impl TopicStats {
    /// Render the stats as an event payload.
    pub fn to_data(&self) -> EventData {
        let mut data = EventData::new();
        data.insert("topic".to_string(), Value::from(self.topic.clone()));
        data.insert(
            "subscriberCount".to_string(),
            Value::from(self.subscriber_count),
        );
        data.insert("eventCount".to_string(), Value::from(self.event_count));
        data.insert(
            "lastEventTime".to_string(),
            self.last_event_time.map(Value::from).unwrap_or(Value::Null),
        );
        data
    }
}

#[derive(Debug, Default)]
struct TopicRecord {
    event_count: u64,
    last_event_time: i64,
}

#[derive(Default)]
struct TableState {
    /// Insertion order is the scan order used for equal-priority ties.
    subscriptions: Vec<Arc<Subscription>>,
    by_subscriber: HashMap<String, Vec<SubscriptionId>>,
    topics: HashMap<String, TopicRecord>,
}

impl TableState {
    fn matching<'a>(&'a self, topic: &'a str) -> impl Iterator<Item = &'a Arc<Subscription>> + 'a {
        self.subscriptions
            .iter()
            .filter(move |sub| sub.matches(topic))
    }
}

/// Thread-safe store of live subscriptions
#[derive(Default)]
pub struct SubscriptionTable {
    state: Mutex<TableState>,
}

impl SubscriptionTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscription and return its fresh id.
    ///
    /// The pattern is compiled before the lock is taken.
    pub fn subscribe(
        &self,
        pattern: &str,
        subscriber_id: &str,
        handler: Option<EventHandler>,
        options: SubscriptionOptions,
    ) -> SubscriptionId {
        let subscription = Subscription {
            id: SubscriptionId::new(),
            subscriber_id: subscriber_id.to_string(),
            handler,
            options,
            matcher: TopicMatcher::compile(pattern),
        };
        let id = subscription.id;

        let mut state = self.state.lock();
        state
            .by_subscriber
            .entry(subscriber_id.to_string())
            .or_default()
            .push(id);
        state.subscriptions.push(Arc::new(subscription));
        id
    }

    /// Remove one subscription.
    ///
    /// Returns true if the subscription was found and removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.state.lock();
        let Some(position) = state.subscriptions.iter().position(|sub| sub.id == id) else {
            return false;
        };
        let removed = state.subscriptions.remove(position);

        if let Some(ids) = state.by_subscriber.get_mut(&removed.subscriber_id) {
            ids.retain(|other| *other != id);
            if ids.is_empty() {
                state.by_subscriber.remove(&removed.subscriber_id);
            }
        }
        true
    }

    /// Remove every subscription owned by `subscriber_id`, returning the
    /// removed ids in subscription order.
    pub fn unsubscribe_all(&self, subscriber_id: &str) -> Vec<SubscriptionId> {
        let mut state = self.state.lock();
        let Some(ids) = state.by_subscriber.remove(subscriber_id) else {
            return Vec::new();
        };
        state.subscriptions.retain(|sub| !ids.contains(&sub.id));
        ids
    }

    /// Snapshot the subscriptions whose pattern matches `topic`.
    ///
    /// Linear in the number of live subscriptions.
    pub fn find_matches(&self, topic: &str) -> Vec<Arc<Subscription>> {
        self.state.lock().matching(topic).cloned().collect()
    }

    /// Count a publish to `topic` and snapshot its matches in one critical
    /// section.
    pub fn record_and_match(&self, topic: &str, timestamp: i64) -> Vec<Arc<Subscription>> {
        let mut state = self.state.lock();
        let record = state.topics.entry(topic.to_string()).or_default();
        record.event_count += 1;
        record.last_event_time = timestamp;
        state.matching(topic).cloned().collect()
    }

    /// Number of subscriptions matching `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.state.lock().matching(topic).count()
    }

    /// Distinct patterns with at least one live subscription, sorted.
    pub fn active_patterns(&self) -> Vec<String> {
        let state = self.state.lock();
        state
            .subscriptions
            .iter()
            .map(|sub| sub.pattern().to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Live subscriber count plus recorded publish activity for `topic`.
    pub fn topic_stats(&self, topic: &str) -> TopicStats {
        let state = self.state.lock();
        let subscriber_count = state.matching(topic).count();
        let (event_count, last_event_time) = match state.topics.get(topic) {
            Some(record) => (record.event_count, Some(record.last_event_time)),
            None => (0, None),
        };
        TopicStats {
            topic: topic.to_string(),
            subscriber_count,
            event_count,
            last_event_time,
        }
    }

    /// Ids owned by `subscriber_id`, in subscription order.
    pub fn subscriptions_for(&self, subscriber_id: &str) -> Vec<SubscriptionId> {
        self.state
            .lock()
            .by_subscriber
            .get(subscriber_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Look up one subscription.
    pub fn get(&self, id: SubscriptionId) -> Option<Arc<Subscription>> {
        self.state
            .lock()
            .subscriptions
            .iter()
            .find(|sub| sub.id == id)
            .cloned()
    }

    /// Total number of live subscriptions.
    pub fn len(&self) -> usize {
        self.state.lock().subscriptions.len()
    }

    /// Whether there are no live subscriptions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for SubscriptionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SubscriptionTable")
            .field("subscriptions", &state.subscriptions.len())
            .field("subscribers", &state.by_subscriber.len())
            .field("topics", &state.topics.len())
            .finish()
    }
}
