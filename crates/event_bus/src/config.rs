//! # Bus Configuration and Builder
//!
//! [`EventBusConfig`] carries the tunables of a bus and is serde-friendly so a
//! host can embed it in its own TOML configuration. [`EventBusBuilder`] adds the
//! collaborators that cannot be serialized: the main-thread hook, the error
//! sink and an optional external tokio runtime.

use crate::delivery::MainThreadSupport;
use crate::events::EventBusError;
use crate::sink::ErrorSink;
use crate::system::EventBus;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

fn default_true() -> bool {
    true
}
fn default_async_max_threads() -> usize {
    64
}
fn default_async_keep_alive_ms() -> u64 {
    10_000
}
fn default_thread_name_prefix() -> String {
    "event-bus".to_string()
}
fn default_shutdown_timeout_ms() -> u64 {
    5_000
}

/// Tunables of an [`EventBus`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBusConfig {
    /// Match subscriptions through declared supertypes and marker interfaces.
    /// When false only the exact event type matches.
    #[serde(default = "default_true")]
    pub event_inheritance: bool,
    /// Log (at debug level) posts that found no subscriber
    #[serde(default = "default_true")]
    pub log_no_subscriber_messages: bool,
    /// Post a `NoSubscriberEvent` for events that found no subscriber
    #[serde(default = "default_true")]
    pub send_no_subscriber_event: bool,
    /// Post a `SubscriberExceptionEvent` after every isolated failure
    #[serde(default = "default_true")]
    pub send_subscriber_exception_event: bool,
    /// Upper bound of concurrently running async deliveries
    #[serde(default = "default_async_max_threads")]
    pub async_max_threads: usize,
    /// How long an idle pooled worker is kept for reuse, in milliseconds
    #[serde(default = "default_async_keep_alive_ms")]
    pub async_keep_alive_ms: u64,
    /// Prefix for the names of threads owned by the bus
    #[serde(default = "default_thread_name_prefix")]
    pub thread_name_prefix: String,
    /// How long `shutdown` waits for background and async work, in milliseconds
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            event_inheritance: true,
            log_no_subscriber_messages: true,
            send_no_subscriber_event: true,
            send_subscriber_exception_event: true,
            async_max_threads: default_async_max_threads(),
            async_keep_alive_ms: default_async_keep_alive_ms(),
            thread_name_prefix: default_thread_name_prefix(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl EventBusConfig {
    /// Validates the configuration for consistency.
    pub fn validate(&self) -> Result<(), EventBusError> {
        if self.async_max_threads == 0 {
            return Err(EventBusError::InvalidConfig(
                "async_max_threads must be greater than 0".to_string(),
            ));
        }
        if self.thread_name_prefix.trim().is_empty() {
            return Err(EventBusError::InvalidConfig(
                "thread_name_prefix cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn async_keep_alive(&self) -> Duration {
        Duration::from_millis(self.async_keep_alive_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Fluent construction of an [`EventBus`].
///
/// ```rust
/// use event_bus::EventBus;
///
/// let bus = EventBus::builder()
///     .event_inheritance(false)
///     .send_no_subscriber_event(false)
///     .build()?;
/// bus.shutdown();
/// # Ok::<(), event_bus::EventBusError>(())
/// ```
#[derive(Default)]
pub struct EventBusBuilder {
    pub(crate) config: EventBusConfig,
    pub(crate) main_thread: Option<Arc<dyn MainThreadSupport>>,
    pub(crate) error_sink: Option<Arc<dyn ErrorSink>>,
    pub(crate) runtime: Option<tokio::runtime::Handle>,
}

impl EventBusBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: EventBusConfig) -> Self {
        self.config = config;
        self
    }

    pub fn event_inheritance(mut self, enabled: bool) -> Self {
        self.config.event_inheritance = enabled;
        self
    }

    pub fn log_no_subscriber_messages(mut self, enabled: bool) -> Self {
        self.config.log_no_subscriber_messages = enabled;
        self
    }

    pub fn send_no_subscriber_event(mut self, enabled: bool) -> Self {
        self.config.send_no_subscriber_event = enabled;
        self
    }

    pub fn send_subscriber_exception_event(mut self, enabled: bool) -> Self {
        self.config.send_subscriber_exception_event = enabled;
        self
    }

    pub fn async_max_threads(mut self, threads: usize) -> Self {
        self.config.async_max_threads = threads;
        self
    }

    /// Installs the host hook that owns the main execution context.
    ///
    /// Without one, main-thread deliveries run inline on the posting thread.
    pub fn main_thread(mut self, support: Arc<dyn MainThreadSupport>) -> Self {
        self.main_thread = Some(support);
        self
    }

    /// Replaces the default [`TracingErrorSink`](crate::TracingErrorSink).
    pub fn error_sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.error_sink = Some(sink);
        self
    }

    /// Runs async deliveries on an existing tokio runtime instead of one owned
    /// by the bus. `async_max_threads` still caps them. Background deliveries
    /// keep their own worker thread.
    pub fn runtime_handle(mut self, handle: tokio::runtime::Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn build(self) -> Result<EventBus, EventBusError> {
        EventBus::from_builder(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EventBusConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.event_inheritance);
        assert_eq!(config.async_max_threads, 64);
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_validation_rejects_empty_pool() {
        let config = EventBusConfig {
            async_max_threads: 0,
            ..EventBusConfig::default()
        };
        assert!(matches!(config.validate(), Err(EventBusError::InvalidConfig(_))));

        let config = EventBusConfig {
            thread_name_prefix: "  ".to_string(),
            ..EventBusConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: EventBusConfig =
            serde_json::from_str(r#"{ "event_inheritance": false, "async_max_threads": 4 }"#).unwrap();
        assert!(!config.event_inheritance);
        assert_eq!(config.async_max_threads, 4);
        assert!(config.send_no_subscriber_event);
        assert_eq!(config.thread_name_prefix, "event-bus");
    }

    #[test]
    fn test_builder_overrides_config_fields() {
        let builder = EventBusBuilder::new()
            .event_inheritance(false)
            .send_subscriber_exception_event(false)
            .async_max_threads(2);
        assert!(!builder.config.event_inheritance);
        assert!(!builder.config.send_subscriber_exception_event);
        assert_eq!(builder.config.async_max_threads, 2);
        assert!(builder.main_thread.is_none());
    }
}
