//! Shutdown coordination for an event bus.
//!
//! Shutdown happens in two phases: first the bus stops accepting posts and
//! registrations, then, once background and async work has drained (or the
//! timeout expired), the delivery runtime is torn down.

use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// Shutdown flags of one bus.
#[derive(Debug, Default)]
pub struct ShutdownState {
    /// Set once shutdown starts - no new posts or registrations are accepted
    shutdown_initiated: AtomicBool,
    /// Set once queued work has been drained and the runtime released
    shutdown_complete: AtomicBool,
}

impl ShutdownState {
    /// Creates a new shutdown state with both flags set to false.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if shutdown has been initiated.
    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Acquire)
    }

    /// Returns true if shutdown is complete.
    pub fn is_shutdown_complete(&self) -> bool {
        self.shutdown_complete.load(Ordering::Acquire)
    }

    /// Initiates shutdown. Returns false if it was already initiated.
    pub fn initiate_shutdown(&self) -> bool {
        let first = !self.shutdown_initiated.swap(true, Ordering::AcqRel);
        if first {
            info!("🛑 Shutdown initiated - no new events will be posted");
        }
        first
    }

    /// Marks shutdown as complete.
    pub fn complete_shutdown(&self) {
        self.shutdown_complete.store(true, Ordering::Release);
        info!("✅ Event bus shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initiate_only_once() {
        let state = ShutdownState::new();
        assert!(!state.is_shutdown_initiated());
        assert!(state.initiate_shutdown());
        assert!(!state.initiate_shutdown());
        assert!(state.is_shutdown_initiated());
        assert!(!state.is_shutdown_complete());

        state.complete_shutdown();
        assert!(state.is_shutdown_complete());
    }
}
