//! # Subscribers, Subscriber Methods and Subscriptions
//!
//! The bus never inspects method signatures. Subscriber discovery is left to
//! the caller, which hands the bus a list of [`SubscriberMethod`] descriptors:
//! each one names a callable target, the accepted [`EventType`], the
//! [`ThreadMode`], a priority and the sticky flag.
//!
//! ```rust
//! use event_bus::{impl_event, SubscriberMethod, ThreadMode};
//!
//! #[derive(Debug)]
//! struct Ping;
//! impl_event!(Ping);
//!
//! let method = SubscriberMethod::new("on_ping", |_ping: &Ping| Ok(()))
//!     .with_thread_mode(ThreadMode::BackgroundThread)
//!     .with_priority(10);
//! assert_eq!(method.name(), "on_ping");
//! assert_eq!(method.priority(), 10);
//! ```

use crate::events::{Event, EventKind, EventType, UnviewableEvent};
use crate::types::{SubscriberId, ThreadMode};
use compact_str::CompactString;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// ============================================================================
// Handler Abstractions
// ============================================================================

/// Callable target invoked with matching events.
///
/// Most users will not implement this trait directly, but build a
/// [`SubscriberMethod`] from a closure instead.
pub trait EventHandler: Send + Sync + fmt::Debug + 'static {
    /// Handles one event. Errors are isolated and reported by the bus.
    fn handle(&self, event: &dyn Event) -> anyhow::Result<()>;

    /// The event type this handler was declared for.
    fn expected_type(&self) -> EventType;

    /// A human-readable name for this handler for debugging.
    fn handler_name(&self) -> &str;
}

/// Type-safe handler for a concrete event type `T`.
///
/// Events are downcast to `T` before the closure runs. Subtypes are viewed as
/// `T` through the projection declared with
/// [`impl_event!`](crate::impl_event) (`Sub => T as |e| &e.base`). A subtype
/// without one fails the invocation with [`UnviewableEvent`], reported like any
/// handler error; use [`DynEventHandler`] to accept such subtypes as
/// `&dyn Event`.
pub struct TypedEventHandler<T, F>
where
    T: Event + EventKind,
    F: Fn(&T) -> anyhow::Result<()> + Send + Sync,
{
    handler: F,
    name: CompactString,
    _phantom: PhantomData<fn(&T)>,
}

impl<T, F> TypedEventHandler<T, F>
where
    T: Event + EventKind,
    F: Fn(&T) -> anyhow::Result<()> + Send + Sync,
{
    /// Creates a new typed event handler.
    pub fn new(name: impl Into<CompactString>, handler: F) -> Self {
        Self {
            handler,
            name: name.into(),
            _phantom: PhantomData,
        }
    }
}

impl<T, F> fmt::Debug for TypedEventHandler<T, F>
where
    T: Event + EventKind,
    F: Fn(&T) -> anyhow::Result<()> + Send + Sync,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedEventHandler")
            .field("name", &self.name)
            .field("event_type", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T, F> EventHandler for TypedEventHandler<T, F>
where
    T: Event + EventKind,
    F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn handle(&self, event: &dyn Event) -> anyhow::Result<()> {
        match event.view_as::<T>() {
            Some(event) => (self.handler)(event),
            None => Err(UnviewableEvent {
                handler: self.name.clone(),
                expected: std::any::type_name::<T>(),
                actual: event.type_name(),
            }
            .into()),
        }
    }

    fn expected_type(&self) -> EventType {
        EventType::of::<T>()
    }

    fn handler_name(&self) -> &str {
        &self.name
    }
}

/// Handler receiving events as `&dyn Event`.
///
/// Required for subscriptions to marker interfaces and supertypes, where the
/// concrete type of the delivered event varies.
pub struct DynEventHandler<F>
where
    F: Fn(&dyn Event) -> anyhow::Result<()> + Send + Sync,
{
    handler: F,
    name: CompactString,
    event_type: EventType,
}

impl<F> DynEventHandler<F>
where
    F: Fn(&dyn Event) -> anyhow::Result<()> + Send + Sync,
{
    pub fn new(name: impl Into<CompactString>, event_type: EventType, handler: F) -> Self {
        Self {
            handler,
            name: name.into(),
            event_type,
        }
    }
}

impl<F> fmt::Debug for DynEventHandler<F>
where
    F: Fn(&dyn Event) -> anyhow::Result<()> + Send + Sync,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynEventHandler")
            .field("name", &self.name)
            .field("event_type", &self.event_type)
            .finish()
    }
}

impl<F> EventHandler for DynEventHandler<F>
where
    F: Fn(&dyn Event) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn handle(&self, event: &dyn Event) -> anyhow::Result<()> {
        (self.handler)(event)
    }

    fn expected_type(&self) -> EventType {
        self.event_type
    }

    fn handler_name(&self) -> &str {
        &self.name
    }
}

// ============================================================================
// Subscriber Method Descriptors
// ============================================================================

/// Registration descriptor bound to a callable target.
///
/// The `name` identifies the callable within its subscriber; registering the
/// same subscriber, name and event type twice is rejected.
#[derive(Clone)]
pub struct SubscriberMethod {
    name: CompactString,
    event_type: EventType,
    thread_mode: ThreadMode,
    priority: i32,
    sticky: bool,
    handler: Arc<dyn EventHandler>,
}

impl SubscriberMethod {
    /// Creates a [`ThreadMode::PostThread`], priority 0, non-sticky method
    /// accepting events of the concrete type `T`.
    pub fn new<T, F>(name: impl Into<CompactString>, handler: F) -> Self
    where
        T: Event + EventKind,
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let name = name.into();
        let handler = TypedEventHandler::new(name.clone(), handler);
        Self::from_handler(name, Arc::new(handler))
    }

    /// Creates a method accepting `event_type` (typically a marker interface or
    /// a supertype) whose handler sees the event as `&dyn Event`.
    pub fn dynamic<F>(name: impl Into<CompactString>, event_type: EventType, handler: F) -> Self
    where
        F: Fn(&dyn Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let name = name.into();
        let handler = DynEventHandler::new(name.clone(), event_type, handler);
        Self::from_handler(name, Arc::new(handler))
    }

    /// Creates a method from an existing handler; the accepted type is the
    /// handler's [`EventHandler::expected_type`].
    pub fn from_handler(name: impl Into<CompactString>, handler: Arc<dyn EventHandler>) -> Self {
        Self {
            name: name.into(),
            event_type: handler.expected_type(),
            thread_mode: ThreadMode::default(),
            priority: 0,
            sticky: false,
            handler,
        }
    }

    /// Sets the delivery thread mode.
    pub fn with_thread_mode(mut self, thread_mode: ThreadMode) -> Self {
        self.thread_mode = thread_mode;
        self
    }

    /// Sets the priority; higher priorities are delivered first.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Opts into receiving the cached sticky event at registration time.
    pub fn sticky(mut self) -> Self {
        self.sticky = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn thread_mode(&self) -> ThreadMode {
        self.thread_mode
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn is_sticky(&self) -> bool {
        self.sticky
    }

    pub(crate) fn handler(&self) -> &Arc<dyn EventHandler> {
        &self.handler
    }
}

impl fmt::Debug for SubscriberMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberMethod")
            .field("name", &self.name)
            .field("event_type", &self.event_type)
            .field("thread_mode", &self.thread_mode)
            .field("priority", &self.priority)
            .field("sticky", &self.sticky)
            .finish()
    }
}

/// Descriptor provider for an owning object.
///
/// Implement it to register a whole object at once with
/// [`EventBus::register_subscriber`](crate::EventBus::register_subscriber).
pub trait Subscriber: Send + Sync + 'static {
    /// Identity under which this object's methods are registered.
    fn subscriber_id(&self) -> SubscriberId;

    /// The subscriber methods of this object, typically closures capturing
    /// the `Arc`.
    fn subscriber_methods(self: Arc<Self>) -> Vec<SubscriberMethod>;
}

// ============================================================================
// Subscriptions
// ============================================================================

/// A registered subscriber method.
///
/// Subscriptions are shared (`Arc`) between the index and queued deliveries;
/// unregistering deactivates them so queued deliveries are dropped.
#[derive(Debug)]
pub struct Subscription {
    subscriber: SubscriberId,
    method: SubscriberMethod,
    sequence: u64,
    active: AtomicBool,
}

impl Subscription {
    pub(crate) fn new(subscriber: SubscriberId, method: SubscriberMethod, sequence: u64) -> Self {
        Self {
            subscriber,
            method,
            sequence,
            active: AtomicBool::new(true),
        }
    }

    pub fn subscriber(&self) -> SubscriberId {
        self.subscriber
    }

    pub fn method(&self) -> &SubscriberMethod {
        &self.method
    }

    pub fn method_name(&self) -> &str {
        self.method.name()
    }

    pub fn event_type(&self) -> EventType {
        self.method.event_type
    }

    pub fn thread_mode(&self) -> ThreadMode {
        self.method.thread_mode
    }

    pub fn priority(&self) -> i32 {
        self.method.priority
    }

    pub fn is_sticky(&self) -> bool {
        self.method.sticky
    }

    /// Registration order across the whole bus; breaks priority ties.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// False once the subscription has been unregistered.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}::{}({})",
            self.subscriber, self.method.name, self.method.event_type
        )
    }
}
