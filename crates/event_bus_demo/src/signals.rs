//! Signal handling for graceful shutdown.
//!
//! The main thread is busy running the main loop, so signals are awaited on a
//! dedicated watcher thread driving a small current-thread tokio runtime. The
//! first signal marks the shared [`ShutdownState`] and stops the main loop; a
//! second one exits the process.

use event_bus::{ChannelMainThread, ShutdownState};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

/// Spawns the watcher thread.
pub fn spawn_signal_watcher(
    shutdown_state: Arc<ShutdownState>,
    main_thread: Arc<ChannelMainThread>,
) -> std::io::Result<std::thread::JoinHandle<()>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    std::thread::Builder::new()
        .name("signal-watcher".to_string())
        .spawn(move || {
            runtime.block_on(async move {
                if let Err(e) = wait_for_signal().await {
                    error!("❌ Failed to listen for shutdown signals: {e}");
                    return;
                }
                info!("📡 Received shutdown signal - initiating graceful shutdown");
                shutdown_state.initiate_shutdown();
                main_thread.request_stop();

                // merciless shutdown
                if wait_for_signal().await.is_ok() {
                    warn!("Shutdown signal received again! Exiting immediately.");
                    std::process::exit(1);
                }
            })
        })
}

async fn wait_for_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => (),
            _ = sigterm.recv() => ()
        }
    }

    #[cfg(not(unix))]
    signal::ctrl_c().await?;

    Ok(())
}
