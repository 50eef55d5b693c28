//! Configuration management for the event bus demo.
//!
//! The demo reads a TOML file holding the bus tunables, logging settings and
//! the scenario parameters. A missing file is created with defaults.

use event_bus::EventBusConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

fn default_rounds() -> u32 {
    3
}
fn default_step_delay_ms() -> u64 {
    40
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Event bus tunables
    #[serde(default)]
    pub bus: EventBusConfig,
    /// Logging configuration settings
    #[serde(default)]
    pub logging: LoggingSettings,
    /// Scenario parameters
    #[serde(default)]
    pub demo: DemoSettings,
}

/// Logging system configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Parameters of the scripted scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemoSettings {
    /// Number of simulated downloads
    #[serde(default = "default_rounds")]
    pub rounds: u32,
    /// Pause between two progress posts, in milliseconds
    #[serde(default = "default_step_delay_ms")]
    pub step_delay_ms: u64,
    /// Keep the main loop running after the scenario until Ctrl+C
    #[serde(default)]
    pub linger: bool,
}

impl Default for DemoSettings {
    fn default() -> Self {
        Self {
            rounds: default_rounds(),
            step_delay_ms: default_step_delay_ms(),
            linger: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, creates a default configuration file at the
    /// specified path and returns the default configuration.
    pub async fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("📝 Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Validates the configuration settings.
    pub fn validate(&self) -> Result<(), String> {
        self.bus.validate().map_err(|e| e.to_string())?;

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        if self.demo.rounds == 0 {
            return Err("demo.rounds must be greater than 0".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{NamedTempFile, TempDir};
    use tokio::fs;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();
        assert_eq!(config.bus, EventBusConfig::default());
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json_format);
        assert_eq!(config.demo.rounds, 3);
        assert_eq!(config.demo.step_delay_ms, 40);
        assert!(!config.demo.linger);
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_from_nonexistent_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("demo.toml");

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config, AppConfig::default());

        // The defaults were written and read back identically
        assert!(path.exists());
        let reloaded = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(reloaded, config);
    }

    #[tokio::test]
    async fn test_load_from_existing_file() {
        let toml_content = r#"
[bus]
event_inheritance = false
async_max_threads = 8
thread_name_prefix = "demo-bus"

[logging]
level = "debug"
json_format = true

[demo]
rounds = 5
linger = true
"#;

        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), toml_content).await.unwrap();

        let config = AppConfig::load_from_file(temp_file.path()).await.unwrap();

        assert!(!config.bus.event_inheritance);
        assert_eq!(config.bus.async_max_threads, 8);
        assert_eq!(config.bus.thread_name_prefix, "demo-bus");
        // Omitted keys fall back to their defaults
        assert!(config.bus.send_no_subscriber_event);
        assert_eq!(config.bus.shutdown_timeout_ms, 5_000);

        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json_format);

        assert_eq!(config.demo.rounds, 5);
        assert_eq!(config.demo.step_delay_ms, 40);
        assert!(config.demo.linger);
    }

    #[tokio::test]
    async fn test_load_rejects_malformed_toml() {
        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), "[demo\nrounds = ").await.unwrap();
        assert!(AppConfig::load_from_file(temp_file.path()).await.is_err());
    }

    #[test]
    fn test_validation_invalid_log_level() {
        let mut config = AppConfig::default();
        config.logging.level = "loud".to_string();
        let error = config.validate().unwrap_err();
        assert!(error.contains("Invalid log level: loud"));
    }

    #[test]
    fn test_validation_zero_rounds() {
        let mut config = AppConfig::default();
        config.demo.rounds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_propagates_bus_errors() {
        let mut config = AppConfig::default();
        config.bus.async_max_threads = 0;
        let error = config.validate().unwrap_err();
        assert!(error.starts_with("invalid event bus configuration"));
    }
}
