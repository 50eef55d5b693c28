//! Main application logic and lifecycle management.
//!
//! The thread calling [`Application::run`] becomes the bus's main thread and
//! runs the main loop while a producer thread drives the scenario.

use crate::{
    cli::CliArgs,
    config::AppConfig,
    logging::display_banner,
    scenario::{Scenario, ScenarioReport},
    signals::spawn_signal_watcher,
};
use anyhow::{anyhow, Context};
use event_bus::{ChannelMainThread, EventBus, ShutdownState};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};

/// Drives one demo run from configuration to shutdown.
pub struct Application {
    /// Loaded application configuration, CLI overrides applied
    config: AppConfig,
}

impl Application {
    /// Applies the CLI overrides to `config` and validates the result.
    pub fn new(args: CliArgs, mut config: AppConfig) -> anyhow::Result<Self> {
        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }
        if args.json_logs {
            config.logging.json_format = true;
        }
        if let Some(rounds) = args.rounds {
            config.demo.rounds = rounds;
        }
        if args.linger {
            config.demo.linger = true;
        }
        if args.no_inheritance {
            config.bus.event_inheritance = false;
        }

        config
            .validate()
            .map_err(|e| anyhow!("Configuration validation failed: {e}"))?;
        info!("✅ Configuration loaded and validated successfully");

        display_banner();
        Ok(Self { config })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Runs the scenario and shuts the bus down. Returns what the subscribers
    /// observed.
    pub fn run(self) -> anyhow::Result<ScenarioReport> {
        self.log_configuration_summary();

        let (main_thread, main_loop) = ChannelMainThread::channel();
        main_loop.bind_current_thread();

        let bus = EventBus::builder()
            .config(self.config.bus.clone())
            .main_thread(main_thread.clone())
            .build()
            .context("failed to build the event bus")?;

        let shutdown_state = Arc::new(ShutdownState::new());
        // The watcher is never joined; it dies with the process
        let _watcher = spawn_signal_watcher(Arc::clone(&shutdown_state), Arc::clone(&main_thread))
            .context("failed to start the signal watcher")?;

        let scenario = Scenario::register(&bus)?;
        let counters = Arc::clone(scenario.counters());
        let idle_timeout = self.config.bus.shutdown_timeout();

        let producer = {
            let bus = bus.clone();
            let shutdown_state = Arc::clone(&shutdown_state);
            let main_thread = Arc::clone(&main_thread);
            let demo = self.config.demo.clone();
            let mut scenario = scenario;

            thread::Builder::new()
                .name("producer".to_string())
                .spawn(move || {
                    let result = scenario.run(
                        demo.rounds,
                        Duration::from_millis(demo.step_delay_ms),
                        &shutdown_state,
                    );
                    if let Err(e) = &result {
                        error!("❌ Scenario failed: {e}");
                    }
                    if !bus.wait_until_idle(idle_timeout) {
                        warn!("⏰ Background and async work still running after {:?}", idle_timeout);
                    }
                    log_stats("📊 Scenario finished", &bus);

                    if !demo.linger && !shutdown_state.is_shutdown_initiated() {
                        main_thread.request_stop();
                    } else if demo.linger {
                        info!("🛑 Press Ctrl+C to gracefully shutdown");
                    }
                    (scenario, result)
                })
                .context("failed to spawn the producer thread")?
        };

        info!("🧵 Main loop running");
        let ran = main_loop.run();
        info!("🧵 Main loop stopped after {} task(s)", ran);

        let (mut scenario, result) = producer
            .join()
            .map_err(|_| anyhow!("producer thread panicked"))?;

        info!("🛑 Beginning graceful shutdown...");

        // Phase 1: stop accepting events and drain background and async work
        info!("📡 Phase 1: Stopping the bus...");
        shutdown_state.initiate_shutdown();
        bus.shutdown();

        // Phase 2: main-thread deliveries queued before the loop stopped
        info!("⏳ Phase 2: Draining main-thread deliveries...");
        let drained = main_loop.run_pending();
        if drained > 0 {
            info!("✅ Drained {} main-thread task(s)", drained);
        }

        // Phase 3: subscribers hold bus handles; unregistering releases them
        info!("🧹 Phase 3: Unregistering subscribers...");
        let removed = scenario.unregister_all();
        info!("🗑️ Removed {} subscription(s)", removed);

        log_stats("📊 Final Statistics", &bus);
        result?;

        info!("✅ Event bus demo shutdown complete");
        Ok(counters.report())
    }

    /// Logs the configuration summary at startup.
    fn log_configuration_summary(&self) {
        let bus = &self.config.bus;
        info!("📋 Configuration Summary:");
        info!("  🧬 Event inheritance: {}", bus.event_inheritance);
        info!("  🧵 Async pool: up to {} threads", bus.async_max_threads);
        info!("  🏷️ Thread name prefix: {}", bus.thread_name_prefix);
        info!("  ⏱️ Shutdown timeout: {}ms", bus.shutdown_timeout_ms);
        info!(
            "  ⬇️ Downloads: {} ({}ms per step)",
            self.config.demo.rounds, self.config.demo.step_delay_ms
        );
    }
}

fn log_stats(title: &str, bus: &EventBus) {
    match serde_json::to_string(&bus.stats()) {
        Ok(json) => info!("{}: {}", title, json),
        Err(e) => warn!("⚠️ Failed to serialize bus stats: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn args(extra: &[&str]) -> CliArgs {
        let mut argv = vec!["event_bus_demo"];
        argv.extend_from_slice(extra);
        CliArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_cli_overrides_config() {
        let app = Application::new(
            args(&["-l", "debug", "--rounds", "9", "--no-inheritance", "--json-logs"]),
            AppConfig::default(),
        )
        .unwrap();

        assert_eq!(app.config().logging.level, "debug");
        assert!(app.config().logging.json_format);
        assert_eq!(app.config().demo.rounds, 9);
        assert!(!app.config().bus.event_inheritance);
        assert!(!app.config().demo.linger);
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let result = Application::new(args(&["--log-level", "chatty"]), AppConfig::default());
        let error = result.err().unwrap().to_string();
        assert!(error.starts_with("Configuration validation failed"));
    }

    #[test]
    fn test_run_end_to_end() {
        let mut config = AppConfig::default();
        config.demo.rounds = 2;
        config.demo.step_delay_ms = 0;
        let cli = CliArgs {
            config_path: PathBuf::from("unused.toml"),
            log_level: None,
            json_logs: false,
            rounds: None,
            linger: false,
            no_inheritance: false,
        };

        let report = Application::new(cli, config).unwrap().run().unwrap();

        assert_eq!(report.progress_renders, 10);
        assert_eq!(report.failures, 2);
        assert_eq!(report.toasts, 1);
        assert_eq!(report.canceled, 1);
        assert_eq!(report.archived, 1);
        assert_eq!(report.thumbnails, 1);
        assert_eq!(report.sticky_replays, 1);
    }
}
