//! # Event Traits, Event Types and Bus Errors
//!
//! This module defines the event infrastructure of the bus: the object-safe
//! [`Event`] trait every posted value implements, the [`EventKind`] hierarchy
//! trait and the [`EventType`] identity used for matching, the built-in events
//! posted by the bus itself, and the error types.
//!
//! ## Type Hierarchies
//!
//! Rust has no class inheritance, so "supertypes" are declared explicitly. A
//! concrete event lists its direct supertypes, which may be other concrete
//! event types or marker interfaces (`dyn Trait` types). A subscriber accepting
//! a supertype receives every event whose declared hierarchy reaches it.
//!
//! ```rust
//! use event_bus::{event_marker, impl_event, EventType};
//!
//! pub trait Audited {}
//! event_marker!(dyn Audited);
//!
//! #[derive(Debug)]
//! struct UserLoggedIn { name: String }
//! impl Audited for UserLoggedIn {}
//! impl_event!(UserLoggedIn => dyn Audited);
//!
//! let parents = EventType::of::<UserLoggedIn>().supertypes();
//! assert_eq!(parents, vec![EventType::of::<dyn Audited>()]);
//! ```

use crate::types::{SubscriberId, ThreadMode};
use compact_str::CompactString;
use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// Event Traits and Core Infrastructure
// ============================================================================

/// Upcast helper giving every sized `'static` type a `&dyn Any` view.
pub trait AsAny: Any {
    /// Returns `self` as `&dyn Any` for downcasting.
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Core trait that all posted values implement.
///
/// Events are shared between threads (one allocation is handed to every
/// matching subscriber and possibly kept in the sticky cache), hence the
/// `Send + Sync` bounds. The `Debug` requirement lets failures be reported with
/// the offending event.
///
/// Implement it with [`impl_event!`](crate::impl_event), which also declares the
/// type's supertypes.
pub trait Event: AsAny + Send + Sync + fmt::Debug + 'static {
    /// Returns the runtime event type of this value.
    fn event_type(&self) -> EventType;

    /// Views this event as the concrete supertype identified by `target`, if
    /// the hierarchy declares a projection to it.
    fn project(&self, _target: TypeId) -> Option<&dyn Any> {
        None
    }
}

impl dyn Event {
    /// Returns true if the concrete type of this event is `T`.
    pub fn is<T: Event>(&self) -> bool {
        self.as_any().is::<T>()
    }

    /// Downcasts to the concrete event type `T`.
    pub fn downcast_ref<T: Event>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Views this event as `T`: either its concrete type, or a supertype
    /// reachable through declared projections.
    pub fn view_as<T: Event>(&self) -> Option<&T> {
        self.downcast_ref::<T>().or_else(|| {
            self.project(TypeId::of::<T>())
                .and_then(|any| any.downcast_ref::<T>())
        })
    }

    /// Human-readable name of the concrete event type.
    pub fn type_name(&self) -> &'static str {
        self.event_type().name()
    }
}

/// Static description of a type's place in the event hierarchy.
///
/// Implemented for concrete events (by [`impl_event!`](crate::impl_event)) and
/// for marker interfaces such as `dyn Audited` (by
/// [`event_marker!`](crate::event_marker)).
pub trait EventKind: 'static {
    /// Direct supertypes of this type, most relevant first.
    fn supertypes() -> Vec<EventType>;
}

/// Runtime identity of an event type, including its declared hierarchy.
///
/// Equality and hashing use the underlying [`TypeId`] only.
#[derive(Clone, Copy)]
pub struct EventType {
    id: TypeId,
    name: &'static str,
    parents: fn() -> Vec<EventType>,
}

impl EventType {
    /// Returns the event type of `T`.
    pub fn of<T: EventKind + ?Sized>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
            parents: <T as EventKind>::supertypes,
        }
    }

    /// The [`TypeId`] this event type is keyed by.
    #[inline]
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// The fully qualified type name, for diagnostics.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Direct supertypes as declared by the type's [`EventKind`] impl.
    pub fn supertypes(&self) -> Vec<EventType> {
        (self.parents)()
    }
}

impl PartialEq for EventType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for EventType {}

impl Hash for EventType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EventType").field(&self.name).finish()
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

// ============================================================================
// Built-in Events
// ============================================================================

/// Posted by the bus when an event matched no subscription.
///
/// Subscribe to it to observe events nobody listens to. It is never itself
/// wrapped into another `NoSubscriberEvent`.
#[derive(Debug, Clone)]
pub struct NoSubscriberEvent {
    /// The event that found no subscriber
    pub original_event: Arc<dyn Event>,
}

/// Posted by the bus after a subscriber method failed or panicked.
///
/// A failure while delivering a `SubscriberExceptionEvent` does not produce
/// another one.
#[derive(Debug, Clone)]
pub struct SubscriberExceptionEvent {
    /// Owner of the failing subscriber method
    pub subscriber: SubscriberId,
    /// Name of the failing subscriber method
    pub method: CompactString,
    /// The event whose delivery failed
    pub causing_event: Arc<dyn Event>,
    /// Rendered failure message
    pub message: String,
}

crate::impl_event!(NoSubscriberEvent);
crate::impl_event!(SubscriberExceptionEvent);

// ============================================================================
// Error Types
// ============================================================================

/// A descriptor rejected because its `(subscriber, method, event type)` triple
/// is already registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateSubscription {
    pub subscriber: SubscriberId,
    pub method: CompactString,
    pub event_type: EventType,
}

impl fmt::Display for DuplicateSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "subscriber {} already registered '{}' for event type {}",
            self.subscriber, self.method, self.event_type
        )
    }
}

fn join_duplicates(duplicates: &[DuplicateSubscription]) -> String {
    duplicates
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors returned synchronously by bus operations.
///
/// Delivery-time failures never appear here: they are isolated and reported
/// through the [`ErrorSink`](crate::ErrorSink) as [`SubscriberInvocationError`].
#[derive(Debug, Error)]
pub enum EventBusError {
    /// One or more descriptors of a registration batch were duplicates; every
    /// other descriptor of the batch was registered.
    #[error("{} subscriber method(s) rejected: {}", .0.len(), join_duplicates(.0))]
    DuplicateSubscriptions(Vec<DuplicateSubscription>),
    /// The bus no longer accepts posts or registrations.
    #[error("event bus has been shut down")]
    ShutDown,
    /// The delivery runtime could not be started.
    #[error("failed to start delivery runtime: {0}")]
    Runtime(#[from] std::io::Error),
    /// Configuration rejected by validation.
    #[error("invalid event bus configuration: {0}")]
    InvalidConfig(String),
    /// `cancel_event_delivery` was called outside of a subscriber invocation.
    #[error("event delivery can only be canceled by a subscriber while it handles the event")]
    CancelOutsideDelivery,
    /// `cancel_event_delivery` was called with an event other than the one
    /// currently being delivered.
    #[error("only the event currently being delivered may be canceled")]
    CancelForeignEvent,
    /// `cancel_event_delivery` was called from a subscriber not running in
    /// [`ThreadMode::PostThread`].
    #[error("event delivery can only be canceled from PostThread subscribers, not {0}")]
    CancelFromThreadMode(ThreadMode),
}

/// Informational: a post found no matching subscription.
#[derive(Debug, Clone, Error)]
#[error("no subscribers registered for event type {event_type}")]
pub struct NoSubscriberError {
    pub event_type: EventType,
}

/// Why a subscriber invocation failed.
#[derive(Debug, Error)]
pub enum InvocationFailure {
    /// The subscriber method returned an error.
    #[error("{0:#}")]
    Failed(anyhow::Error),
    /// The subscriber method panicked.
    #[error("panicked: {0}")]
    Panicked(String),
}

/// A typed handler received an event it cannot view as its declared type.
///
/// Happens when a concrete supertype is declared without a projection. Reported
/// like any other handler error.
#[derive(Debug, Clone, Error)]
#[error("handler '{handler}' expects {expected} but {actual} declares no projection to it")]
pub struct UnviewableEvent {
    pub handler: CompactString,
    pub expected: &'static str,
    pub actual: &'static str,
}

/// A failure raised by a subscriber method, isolated at the delivery boundary.
#[derive(Debug, Error)]
#[error("subscriber {subscriber} method '{method}' ({thread_mode}) failed handling {event_type}: {cause}")]
pub struct SubscriberInvocationError {
    pub subscriber: SubscriberId,
    pub method: CompactString,
    pub thread_mode: ThreadMode,
    pub event_type: EventType,
    #[source]
    pub cause: InvocationFailure,
}

// Tests module
mod tests;
