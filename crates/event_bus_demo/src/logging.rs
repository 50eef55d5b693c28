//! Logging system setup and configuration.
//!
//! Thread names are always included: they show which delivery mode ran a
//! subscriber (`main`, the background worker, or a pooled async worker).

use crate::config::LoggingSettings;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes the logging system with the specified configuration.
///
/// `RUST_LOG` takes precedence over the configured level. `json_format`
/// forces JSON output regardless of the configuration.
pub fn setup_logging(config: &LoggingSettings, json_format: bool) -> anyhow::Result<()> {
    let log_level = config.level.as_str();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if json_format || config.json_format {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_names(true),
            )
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(false)
                    .with_thread_names(true),
            )
            .try_init()?;
    }

    info!("🔧 Logging initialized with level: {}", log_level);
    Ok(())
}

/// Displays the startup banner.
pub fn display_banner() {
    info!("╔══════════════════════════════════════════╗");
    info!("║            🚌 EVENT BUS DEMO 🚌          ║");
    info!("║   {:<38} ║", event_bus::build_info());
    info!("║                                          ║");
    info!("║  🎯 Typed events + marker interfaces     ║");
    info!("║  🧵 Post / Main / Background / Async     ║");
    info!("║  📌 Sticky events                        ║");
    info!("╚══════════════════════════════════════════╝");
}
