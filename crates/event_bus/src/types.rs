//! # Core Type Definitions
//!
//! Identity and policy types shared by every part of the bus.
//!
//! ## Key Types
//!
//! - [`SubscriberId`] - Identity of an owning subscriber object
//! - [`ThreadMode`] - Delivery channel policy of a subscriber method

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Subscriber Identity
// ============================================================================

/// Unique identifier for a subscriber (the object owning subscriber methods).
///
/// All subscriptions registered under the same id are removed together by
/// [`EventBus::unregister`](crate::EventBus::unregister).
///
/// # Examples
///
/// ```rust
/// use event_bus::SubscriberId;
///
/// let subscriber = SubscriberId::new();
/// let parsed = SubscriberId::from_str(&subscriber.to_string())?;
/// assert_eq!(subscriber, parsed);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriberId(pub Uuid);

impl SubscriberId {
    /// Creates a new random subscriber ID using UUID v4.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses a subscriber ID from its string representation.
    pub fn from_str(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Thread Modes
// ============================================================================

/// Determines on which thread a subscriber method is invoked.
///
/// The bus takes care of threading independently from the posting thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ThreadMode {
    /// Invoked synchronously on the posting thread, before `post` returns.
    ///
    /// Lowest overhead: no thread switch. Handlers must return quickly because
    /// the posting thread may be the main thread.
    #[default]
    PostThread,
    /// Invoked on the host's main execution context.
    ///
    /// When the posting thread already is the main context the handler runs
    /// immediately; otherwise the delivery is queued and drained by the host.
    MainThread,
    /// Invoked on the single background worker thread shared by all
    /// background deliveries, one at a time, in global FIFO order. Async load
    /// never delays it.
    BackgroundThread,
    /// Invoked on a pooled worker, independently of the posting thread, the main
    /// context and every other delivery. No ordering guarantee.
    Async,
}

impl fmt::Display for ThreadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ThreadMode::PostThread => "post-thread",
            ThreadMode::MainThread => "main-thread",
            ThreadMode::BackgroundThread => "background-thread",
            ThreadMode::Async => "async",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscriber_id_round_trips_through_string() {
        let id = SubscriberId::new();
        assert_eq!(SubscriberId::from_str(&id.to_string()).unwrap(), id);
        assert!(SubscriberId::from_str("not-a-uuid").is_err());
    }

    #[test]
    fn test_thread_mode_defaults_to_post_thread() {
        assert_eq!(ThreadMode::default(), ThreadMode::PostThread);
    }

    #[test]
    fn test_thread_mode_serializes_by_variant_name() {
        let json = serde_json::to_string(&ThreadMode::BackgroundThread).unwrap();
        assert_eq!(json, "\"BackgroundThread\"");
        let mode: ThreadMode = serde_json::from_str("\"Async\"").unwrap();
        assert_eq!(mode, ThreadMode::Async);
    }
}
