//! # Utility Functions
//!
//! Helpers shared across the bus plus the optional process-wide default
//! instance.
//!
//! ## Key Functions
//!
//! - [`current_timestamp()`] - Consistent timestamp generation
//! - [`install_default_bus()`] / [`default_bus()`] - Process-wide bus handle
//!
//! Tests and libraries should construct their own [`EventBus`]; the default
//! instance exists for applications that want one shared bus without passing
//! it around.

use crate::events::EventBusError;
use crate::system::EventBus;
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

// ============================================================================
// Utility Functions
// ============================================================================

/// Returns the current Unix timestamp in seconds.
///
/// A clock set before the Unix epoch yields 0.
pub fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Locks a mutex, recovering the data if a previous holder panicked.
///
/// Subscriber code never runs while a bus lock is held, so a poisoned lock
/// only means a panic in bus bookkeeping and the guarded state is still
/// consistent.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Process-wide Default Bus
// ============================================================================

static DEFAULT_BUS: OnceLock<EventBus> = OnceLock::new();

/// Installs `bus` as the process-wide default.
///
/// Returns the rejected bus back if a default was already installed.
pub fn install_default_bus(bus: EventBus) -> Result<(), EventBus> {
    DEFAULT_BUS.set(bus)
}

/// Returns the process-wide default bus, creating one with the default
/// configuration on first use.
pub fn default_bus() -> Result<EventBus, EventBusError> {
    if let Some(bus) = DEFAULT_BUS.get() {
        return Ok(bus.clone());
    }
    let bus = EventBus::new()?;
    // Another thread may have won the race; its instance is the default
    match DEFAULT_BUS.set(bus) {
        Ok(()) => {}
        Err(unused) => unused.shutdown(),
    }
    DEFAULT_BUS
        .get()
        .cloned()
        .ok_or(EventBusError::ShutDown)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_timestamp_is_recent() {
        // 2020-01-01T00:00:00Z
        assert!(current_timestamp() > 1_577_836_800);
    }

    #[test]
    fn test_lock_recovers_from_poison() {
        let mutex = std::sync::Arc::new(Mutex::new(1));
        let poisoner = std::sync::Arc::clone(&mutex);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison");
        })
        .join();

        assert!(mutex.is_poisoned());
        *lock(&mutex) += 1;
        assert_eq!(*lock(&mutex), 2);
    }

    #[test]
    fn test_default_bus_is_shared() {
        let first = default_bus().unwrap();
        let second = default_bus().unwrap();
        assert!(first.same_bus(&second));
    }
}
