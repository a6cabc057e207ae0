//! Type aliases for the callback types that cross the bus boundary.
//!
//! Handlers are stored behind `Arc` so the dispatcher can clone them out of
//! the subscription table and invoke them after the table lock is released.

use std::sync::Arc;

use crate::event::{Event, EventData};

// =============================================================================
// HANDLER TYPES
// =============================================================================

/// A subscriber callback invoked once per delivered event.
///
/// Thread-safe: asynchronous deliveries run on the dispatch queue, synchronous
/// ones on the publishing thread.
pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

/// A request/response callback bound to one exact topic.
///
/// Returning `Err` is reported to the caller of `request` as "no value".
pub type RequestHandler = Arc<dyn Fn(&Event) -> anyhow::Result<EventData> + Send + Sync>;

// =============================================================================
// SCHEDULING TYPES
// =============================================================================

/// A unit of deferred work handed to a [`crate::Scheduler`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Wrap a closure as an [`EventHandler`].
pub fn event_handler<F>(handler: F) -> EventHandler
where
    F: Fn(&Event) + Send + Sync + 'static,
{
    Arc::new(handler)
}

/// Wrap a closure as a [`RequestHandler`].
pub fn request_handler<F>(handler: F) -> RequestHandler
where
    F: Fn(&Event) -> anyhow::Result<EventData> + Send + Sync + 'static,
{
    Arc::new(handler)
}
