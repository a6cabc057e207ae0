//! Error handling for plugbus
//!
//! The bus itself never fails a publish or a subscribe: missing handlers and
//! unknown ids are reported through `bool`/`Option` returns. The types here
//! describe the faults that are caught at the dispatch boundary and logged,
//! plus configuration and setup failures.
//!
//! All error types use `thiserror` for ergonomic error handling.

use std::any::Any;
use thiserror::Error;

/// Bus error type
///
/// Represents faults raised while compiling patterns, invoking handlers, or
/// setting up the dispatch context.
#[derive(Error, Debug)]
pub enum BusError {
    /// A topic pattern could not be compiled into a matcher
    #[error("Invalid topic pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The pattern as supplied by the subscriber.
        pattern: String,
        /// Why compilation failed.
        reason: String,
    },

    /// A request handler returned an error
    #[error("Handler for '{topic}' failed: {reason}")]
    HandlerFailed {
        /// The topic being handled.
        topic: String,
        /// The error reported by the handler.
        reason: String,
    },

    /// A subscriber, listener or request handler panicked
    #[error("Handler for '{topic}' panicked: {message}")]
    HandlerPanicked {
        /// The topic being delivered.
        topic: String,
        /// The panic payload, when it was a string.
        message: String,
    },

    /// The dispatch queue no longer accepts work
    #[error("Dispatch queue is closed")]
    QueueClosed,

    /// The dispatch thread could not be started
    #[error("Failed to start dispatch thread: {0}")]
    DispatchThread(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors related to loading and validating [`crate::EventBusConfig`].
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid TOML for this schema.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A configuration value is out of its valid range.
    #[error("Invalid value for '{key}': {reason}")]
    InvalidValue {
        /// The offending key.
        key: String,
        /// What is wrong with it.
        reason: String,
    },
}

/// Result type alias for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Extract a readable message from a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
