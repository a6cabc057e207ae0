//! Request/response registry.
//!
//! Maps an exact topic to the single handler that answers requests on it.
//! Unlike subscriptions there is no pattern matching and no fan-out: a
//! request reaches at most one responder and is answered inline on the
//! caller's thread.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use crate::error::{panic_message, BusError};
use crate::event::{Event, EventData};
use crate::types::RequestHandler;

/// A registered responder
#[derive(Clone)]
pub struct RequestHandlerEntry {
    /// Exact topic, no wildcards.
    pub topic: String,
    /// Owner of the registration.
    pub handler_id: String,
    /// Responder callback.
    pub handler: RequestHandler,
}

impl std::fmt::Debug for RequestHandlerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestHandlerEntry")
            .field("topic", &self.topic)
            .field("handler_id", &self.handler_id)
            .finish()
    }
}

/// Thread-safe topic-to-responder map
#[derive(Default)]
pub struct RequestRegistry {
    handlers: Mutex<HashMap<String, RequestHandlerEntry>>,
}

impl RequestRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the responder for `topic`.
    ///
    /// Returns false and leaves the existing registration in place if the
    /// topic already has a handler.
    pub fn register_handler(&self, topic: &str, handler_id: &str, handler: RequestHandler) -> bool {
        let mut handlers = self.handlers.lock();
        if let Some(existing) = handlers.get(topic) {
            tracing::warn!(
                "Handler already registered for topic '{}' by '{}'; rejecting '{}'",
                topic,
                existing.handler_id,
                handler_id
            );
            return false;
        }

        handlers.insert(
            topic.to_string(),
            RequestHandlerEntry {
                topic: topic.to_string(),
                handler_id: handler_id.to_string(),
                handler,
            },
        );
        tracing::debug!("Registered request handler for '{}' by '{}'", topic, handler_id);
        true
    }

    /// Remove the responder for `topic`.
    pub fn unregister_handler(&self, topic: &str) -> bool {
        let removed = self.handlers.lock().remove(topic).is_some();
        if removed {
            tracing::debug!("Unregistered request handler for '{}'", topic);
        }
        removed
    }

    /// Remove every responder owned by `handler_id`, returning how many were
    /// removed.
    pub fn unregister_all_handlers(&self, handler_id: &str) -> usize {
        let mut handlers = self.handlers.lock();
        let before = handlers.len();
        handlers.retain(|_, entry| entry.handler_id != handler_id);
        let removed = before - handlers.len();
        if removed > 0 {
            tracing::debug!(
                "Unregistered all handlers for '{}' ({} handlers)",
                handler_id,
                removed
            );
        }
        removed
    }

    /// Whether `topic` currently has a responder.
    pub fn has_handler(&self, topic: &str) -> bool {
        self.handlers.lock().contains_key(topic)
    }

    /// Topics that currently have a responder, sorted.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<_> = self.handlers.lock().keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Number of registered responders.
    pub fn len(&self) -> usize {
        self.handlers.lock().len()
    }

    /// Whether no responders are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Answer `event` with the responder for its topic.
    ///
    /// Returns `None` when no responder is registered, or when the responder
    /// fails or panics. The lock is released before the responder runs.
    /// `timeout` is not enforced: the responder runs to completion on the
    /// calling thread.
    pub fn request(&self, event: &Event, timeout: Duration) -> Option<EventData> {
        let handler = {
            let handlers = self.handlers.lock();
            match handlers.get(&event.topic) {
                Some(entry) => entry.handler.clone(),
                None => {
                    tracing::debug!("No handler for request topic '{}'", event.topic);
                    return None;
                }
            }
        };

        tracing::trace!(
            "Request '{}' from '{}' (timeout {:?} not enforced)",
            event.topic,
            event.sender_id,
            timeout
        );

        match panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
            Ok(Ok(response)) => Some(response),
            Ok(Err(err)) => {
                let err = BusError::HandlerFailed {
                    topic: event.topic.clone(),
                    reason: format!("{:#}", err),
                };
                tracing::warn!("{}", err);
                None
            }
            Err(payload) => {
                let err = BusError::HandlerPanicked {
                    topic: event.topic.clone(),
                    message: panic_message(payload.as_ref()),
                };
                tracing::warn!("{}", err);
                None
            }
        }
    }
}

impl std::fmt::Debug for RequestRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestRegistry")
            .field("handlers", &self.len())
            .finish()
    }
}
