//! # Event Bus Demo
//!
//! Host application for the event bus. It owns the main thread, loads its
//! configuration, sets up logging and drives a scripted scenario through every
//! delivery mode.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run with default configuration
//! event_bus_demo
//!
//! # Specify custom configuration
//! event_bus_demo --config demo.toml
//!
//! # More downloads, debug logs, keep running until Ctrl+C
//! event_bus_demo --rounds 10 --log-level debug --linger
//!
//! # JSON logging
//! event_bus_demo --json-logs
//! ```
//!
//! ## Configuration
//!
//! The demo loads configuration from a TOML file (default:
//! `event_bus_demo.toml`). If the file doesn't exist, a default configuration
//! will be created. Its `[bus]` table maps onto `EventBusConfig`.
//!
//! ## Signal Handling
//!
//! SIGINT (Ctrl+C) and SIGTERM stop the scenario and the main loop, then the
//! bus is shut down gracefully. A second signal exits immediately.

use anyhow::Context;
use tracing::info;

mod app;
mod cli;
mod config;
mod logging;
pub mod scenario;
mod signals;

pub use app::Application;
pub use cli::CliArgs;
pub use config::{AppConfig, DemoSettings, LoggingSettings};
pub use scenario::ScenarioReport;

/// Runs the demo: CLI, configuration, logging, scenario, shutdown.
///
/// The calling thread becomes the bus's main thread; call it from `main`.
pub fn init() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    // Async file IO only; the bus owns its own runtime
    let io_runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let loaded = io_runtime.block_on(AppConfig::load_from_file(&args.config_path));

    let mut logging_settings = loaded
        .as_ref()
        .map(|config| config.logging.clone())
        .unwrap_or_default();
    if let Some(level) = &args.log_level {
        logging_settings.level = level.clone();
    }
    logging::setup_logging(&logging_settings, args.json_logs)?;

    let config = loaded.with_context(|| {
        format!("failed to load configuration from {}", args.config_path.display())
    })?;
    info!("🔧 Configuration loaded from: {}", args.config_path.display());

    let report = Application::new(args, config)?.run()?;
    info!("🏁 Scenario report: {}", serde_json::to_string(&report)?);
    Ok(())
}
