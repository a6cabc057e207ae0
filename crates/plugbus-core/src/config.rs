//! Event bus configuration
//!
//! Loaded from TOML; every key is optional and falls back to its default.
//!
//! ```toml
//! dispatch_thread_name = "plugbus-dispatch"
//! default_request_timeout_ms = 5000
//! listener_channel_capacity = 1024
//! trace_deliveries = false
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};

/// Configuration for the event bus
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBusConfig {
    /// Name of the dedicated dispatch thread.
    pub dispatch_thread_name: String,
    /// Timeout used by `request` calls that do not pass one. Not enforced;
    /// recorded in diagnostics only.
    pub default_request_timeout_ms: u64,
    /// Capacity of the broadcast channel returned by `EventBus::receiver`.
    pub listener_channel_capacity: usize,
    /// Log every individual delivery at trace level.
    pub trace_deliveries: bool,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            dispatch_thread_name: "plugbus-dispatch".to_string(),
            default_request_timeout_ms: 5000,
            listener_channel_capacity: 1024,
            trace_deliveries: false,
        }
    }
}

impl EventBusConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(source: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let source = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml_str(&source)?;
        tracing::debug!("Loaded bus configuration from {}", path.as_ref().display());
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.dispatch_thread_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "dispatch_thread_name".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if self.listener_channel_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "listener_channel_capacity".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// The default request timeout as a [`Duration`].
    pub fn default_request_timeout(&self) -> Duration {
        Duration::from_millis(self.default_request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EventBusConfig::default();
        assert_eq!(config.dispatch_thread_name, "plugbus-dispatch");
        assert_eq!(config.default_request_timeout(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = EventBusConfig::from_toml_str("trace_deliveries = true\n").expect("valid toml");
        assert!(config.trace_deliveries);
        assert_eq!(config.listener_channel_capacity, 1024);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = EventBusConfig::from_toml_str("dispatch_thread_name = \"  \"\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "dispatch_thread_name"));

        let err = EventBusConfig::from_toml_str("listener_channel_capacity = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err = EventBusConfig::from_toml_str("trace_deliveries = \"yes\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        writeln!(file, "dispatch_thread_name = \"host-events\"").expect("write config");
        writeln!(file, "default_request_timeout_ms = 250").expect("write config");

        let config = EventBusConfig::load(file.path()).expect("load config");
        assert_eq!(config.dispatch_thread_name, "host-events");
        assert_eq!(config.default_request_timeout(), Duration::from_millis(250));

        let missing = EventBusConfig::load("/nonexistent/plugbus.toml").unwrap_err();
        assert!(matches!(missing, ConfigError::Io(_)));
    }
}
