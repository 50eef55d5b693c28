//! # Event Bus
//!
//! A typed, in-process publish/subscribe event bus with per-subscriber thread
//! delivery modes, priorities, supertype matching and sticky events.
//!
//! ## Core Features
//!
//! - **Type Matching**: Events are matched by runtime type, including declared
//!   supertypes and marker interfaces
//! - **Thread Modes**: Each subscription runs on the posting thread, the host's
//!   main thread, a shared sequential background worker or a pooled async worker
//! - **Priorities**: Higher priority subscriptions are delivered first
//! - **Sticky Events**: The last posted value of a type is replayed to
//!   subscribers registering later
//! - **Failure Isolation**: Subscriber errors and panics never reach the poster
//!
//! ## Architecture Overview
//!
//! - **SubscriberIndex**: event type to priority-ordered subscriptions
//! - **StickyCache**: latest sticky value per event type
//! - **PostingContext**: per-thread queue that flattens re-entrant posts
//! - **Deliverers**: main-thread, background and async delivery channels
//!
//! Index and sticky cache share one lock. Subscribers never run while it is
//! held: a post resolves a snapshot of subscriptions and delivers outside the
//! lock.
//!
//! ## Quick Start Example
//!
//! ```rust
//! use event_bus::{event_marker, impl_event, EventBus, SubscriberId, SubscriberMethod, ThreadMode};
//! use event_bus::EventType;
//!
//! pub trait Alert {}
//! event_marker!(dyn Alert);
//!
//! #[derive(Debug)]
//! struct DiskFull { volume: String }
//! impl Alert for DiskFull {}
//! impl_event!(DiskFull => dyn Alert);
//!
//! let bus = EventBus::new()?;
//! let owner = SubscriberId::new();
//!
//! bus.register(owner, vec![
//!     // Exact type, highest priority, on the posting thread
//!     SubscriberMethod::new("on_disk_full", |e: &DiskFull| {
//!         println!("{} is full", e.volume);
//!         Ok(())
//!     })
//!     .with_priority(10),
//!     // Any alert, on the shared background worker
//!     SubscriberMethod::dynamic("on_alert", EventType::of::<dyn Alert>(), |e| {
//!         println!("alert: {:?}", e);
//!         Ok(())
//!     })
//!     .with_thread_mode(ThreadMode::BackgroundThread),
//! ])?;
//!
//! bus.post(DiskFull { volume: "/var".into() })?;
//! bus.shutdown();
//! # Ok::<(), event_bus::EventBusError>(())
//! ```

// tests
mod test_integration;

// Core modules
pub mod config;
pub mod delivery;
pub mod events;
pub mod macros;
pub mod shutdown;
pub mod sink;
pub mod subscriber;
pub mod system;
pub mod types;
pub mod utils;

// Re-export commonly used items for convenience
pub use config::{EventBusBuilder, EventBusConfig};
pub use delivery::{ChannelMainThread, MainLoop, MainThreadSupport};
pub use events::{
    AsAny, DuplicateSubscription, Event, EventBusError, EventKind, EventType, InvocationFailure,
    NoSubscriberError, NoSubscriberEvent, SubscriberExceptionEvent, SubscriberInvocationError,
    UnviewableEvent,
};
pub use shutdown::ShutdownState;
pub use sink::{ErrorSink, TracingErrorSink};
pub use subscriber::{
    DynEventHandler, EventHandler, Subscriber, SubscriberMethod, Subscription, TypedEventHandler,
};
pub use system::{EventBus, EventBusStats};
pub use types::*;
pub use utils::{current_timestamp, default_bus, install_default_bus};

/// Returns a build info string with the crate version.
pub fn build_info() -> String {
    format!("Event Bus v{}", env!("CARGO_PKG_VERSION"))
}
