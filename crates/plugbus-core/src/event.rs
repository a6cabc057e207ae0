//! Event payloads carried by the bus.
//!
//! An [`Event`] is built once per publish (or request) and never mutated
//! afterwards; deliveries share it behind an `Arc` or clone it.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicI64, Ordering};

/// Opaque key/value payload attached to an event.
pub type EventData = serde_json::Map<String, Value>;

/// A published event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Exact topic the event was published to.
    pub topic: String,
    /// Identity of the publishing plugin.
    pub sender_id: String,
    /// Payload.
    pub data: EventData,
    /// Wall-clock milliseconds since the Unix epoch, never decreasing.
    pub timestamp: i64,
}

impl Event {
    /// Create an event stamped with the current time.
    pub fn new(topic: impl Into<String>, data: EventData, sender_id: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            sender_id: sender_id.into(),
            data,
            timestamp: now_millis(),
        }
    }

    /// Look up a payload field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} from {} ({} fields)",
            self.topic,
            self.sender_id,
            self.data.len()
        )
    }
}

/// Convert a JSON value into an [`EventData`] payload.
///
/// Objects are used as-is; any other value is stored under the `"value"` key.
pub fn payload(value: Value) -> EventData {
    match value {
        Value::Object(map) => map,
        Value::Null => EventData::new(),
        other => {
            let mut data = EventData::new();
            data.insert("value".to_string(), other);
            data
        }
    }
}

static LAST_TIMESTAMP: AtomicI64 = AtomicI64::new(i64::MIN);

/// Current wall-clock time in milliseconds, clamped so that successive calls
/// within this process never go backwards.
pub fn now_millis() -> i64 {
    let wall = Utc::now().timestamp_millis();
    let previous = LAST_TIMESTAMP.fetch_max(wall, Ordering::AcqRel);
    previous.max(wall)
}
