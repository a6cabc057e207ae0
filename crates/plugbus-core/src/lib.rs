//! # Plugbus Core
//!
//! In-process publish/subscribe bus for plugin hosts.
//! Provides hierarchical topics with `*`/`**` wildcards, priority-ordered
//! delivery, asynchronous and synchronous publishing, and a single-responder
//! request/response channel.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use plugbus_core::{payload, EventBus, SubscriptionOptions};
//! use serde_json::json;
//!
//! let bus = EventBus::new()?;
//!
//! bus.subscribe(
//!     "orders/**",
//!     "com.example.rules",
//!     |event| println!("rules saw {}", event.topic),
//!     SubscriptionOptions::default().with_priority(10),
//! );
//!
//! let notified = bus.publish(
//!     "orders/created",
//!     payload(json!({"orderId": "abc123"})),
//!     "com.example.orders",
//! );
//!
//! bus.unsubscribe_all("com.example.rules");
//! ```

pub mod bus;
pub mod config;
pub mod error;
pub mod event;
pub mod listener;
pub mod request;
pub mod scheduler;
pub mod subscription;
pub mod topic;
pub mod types;

pub use bus::EventBus;
pub use config::EventBusConfig;
pub use error::{BusError, ConfigError, ConfigResult, Result};
pub use event::{now_millis, payload, Event, EventData};
pub use listener::{BusListener, ListenerHandle};
pub use request::{RequestHandlerEntry, RequestRegistry};
pub use scheduler::{DispatchQueue, InlineScheduler, Scheduler};
pub use subscription::{
    Subscription, SubscriptionId, SubscriptionOptions, SubscriptionTable, TopicStats,
};
pub use topic::{matches_topic, TopicMatcher};
pub use types::{event_handler, request_handler, EventHandler, RequestHandler, Task};
