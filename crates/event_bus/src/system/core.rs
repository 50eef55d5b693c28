/// Core EventBus implementation
use super::cache::TypeClosureCache;
use super::index::SubscriberIndex;
use super::stats::{EventBusStats, StatsCounters};
use super::sticky::StickyCache;
use crate::config::{EventBusBuilder, EventBusConfig};
use crate::delivery::{
    AsyncDeliverer, BackgroundDeliverer, DeliveryUnit, MainThreadDeliverer, UnitInvoker,
    WorkerRuntime,
};
use crate::events::{
    Event, EventBusError, InvocationFailure, SubscriberExceptionEvent, SubscriberInvocationError,
};
use crate::shutdown::ShutdownState;
use crate::sink::{ErrorSink, TracingErrorSink};
use crate::types::ThreadMode;
use crate::utils::lock;
use std::any::Any;
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

static NEXT_BUS_ID: AtomicU64 = AtomicU64::new(1);

/// Index and sticky cache, guarded together by one lock.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    pub index: SubscriberIndex,
    pub sticky: StickyCache,
}

/// Shared state of one bus, referenced by every [`EventBus`] handle and by
/// in-flight deliveries.
pub(crate) struct BusInner {
    pub id: u64,
    pub config: EventBusConfig,
    pub registry: Mutex<Registry>,
    pub type_cache: TypeClosureCache,
    pub main: Arc<MainThreadDeliverer>,
    pub background: Arc<BackgroundDeliverer>,
    pub async_pool: Arc<AsyncDeliverer>,
    pub error_sink: Arc<dyn ErrorSink>,
    pub stats: StatsCounters,
    pub shutdown: ShutdownState,
    pub runtime: WorkerRuntime,
    post_sequence: AtomicU64,
}

/// The event bus: a typed publish/subscribe dispatcher.
///
/// Events posted with [`post`](EventBus::post) are delivered to every
/// subscription accepting their type (exactly or through a declared
/// supertype), highest priority first. Each subscription picks where it runs
/// through its [`ThreadMode`]:
///
/// - `PostThread` - synchronously on the posting thread, before `post` returns
/// - `MainThread` - on the host's main context (see
///   [`MainThreadSupport`](crate::MainThreadSupport))
/// - `BackgroundThread` - on a single sequential worker shared by the bus
/// - `Async` - on a pooled worker, unordered
///
/// Subscriber failures (errors and panics) never reach the poster; they go to
/// the [`ErrorSink`] and are re-posted as [`SubscriberExceptionEvent`]s.
///
/// `EventBus` is a cheap handle; clones share the same bus. Construct isolated
/// instances in tests rather than relying on
/// [`default_bus`](crate::default_bus).
///
/// ```rust
/// use event_bus::{impl_event, EventBus, SubscriberId, SubscriberMethod};
/// use std::sync::{Arc, Mutex};
///
/// #[derive(Debug)]
/// struct Ping(u32);
/// impl_event!(Ping);
///
/// let bus = EventBus::new()?;
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let recorder = Arc::clone(&seen);
///
/// bus.register(
///     SubscriberId::new(),
///     vec![SubscriberMethod::new("on_ping", move |ping: &Ping| {
///         recorder.lock().unwrap().push(ping.0);
///         Ok(())
///     })],
/// )?;
///
/// bus.post(Ping(7))?;
/// assert_eq!(*seen.lock().unwrap(), vec![7]);
/// bus.shutdown();
/// # Ok::<(), event_bus::EventBusError>(())
/// ```
#[derive(Clone)]
pub struct EventBus {
    pub(super) inner: Arc<BusInner>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("id", &self.inner.id)
            .field("config", &self.inner.config)
            .field("shut_down", &self.inner.shutdown.is_shutdown_initiated())
            .finish()
    }
}

impl EventBus {
    /// Creates a bus with the default configuration, no main-thread hook and
    /// the default error sink.
    pub fn new() -> Result<Self, EventBusError> {
        Self::builder().build()
    }

    pub fn builder() -> EventBusBuilder {
        EventBusBuilder::new()
    }

    pub(crate) fn from_builder(builder: EventBusBuilder) -> Result<Self, EventBusError> {
        let EventBusBuilder {
            config,
            main_thread,
            error_sink,
            runtime,
        } = builder;
        config.validate()?;

        let runtime = match runtime {
            Some(handle) => WorkerRuntime::external(handle),
            None => WorkerRuntime::owned(&config)?,
        };
        let has_main_thread = main_thread.is_some();

        let inner = BusInner {
            id: NEXT_BUS_ID.fetch_add(1, Ordering::Relaxed),
            registry: Mutex::new(Registry::default()),
            type_cache: TypeClosureCache::new(),
            main: Arc::new(MainThreadDeliverer::new(main_thread)),
            background: Arc::new(BackgroundDeliverer::new(format!(
                "{}-background",
                config.thread_name_prefix
            ))),
            async_pool: Arc::new(AsyncDeliverer::new(config.async_max_threads)),
            error_sink: error_sink.unwrap_or_else(|| Arc::new(TracingErrorSink)),
            stats: StatsCounters::default(),
            shutdown: ShutdownState::new(),
            runtime,
            post_sequence: AtomicU64::new(0),
            config,
        };

        info!(
            "🚀 Event bus {} created (inheritance: {}, main thread hook: {})",
            inner.id, inner.config.event_inheritance, has_main_thread
        );
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// The configuration this bus was built with.
    pub fn config(&self) -> &EventBusConfig {
        &self.inner.config
    }

    /// True if both handles refer to the same bus.
    pub fn same_bus(&self, other: &EventBus) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Gets a snapshot of the bus statistics.
    pub fn stats(&self) -> EventBusStats {
        let mut stats = EventBusStats::default();
        {
            let registry = lock(&self.inner.registry);
            stats.subscriptions = registry.index.len();
            stats.subscribers = registry.index.subscriber_count();
            stats.sticky_events = registry.sticky.len();
        }
        self.inner.stats.fill(&mut stats);
        stats.background_pending = self.inner.background.pending();
        stats.main_thread_pending = self.inner.main.pending();
        stats.async_in_flight = self.inner.async_pool.in_flight();
        stats
    }

    /// Blocks until the background worker is idle with an empty queue and no
    /// async delivery is in flight, or `timeout` elapses. Returns true when
    /// idle.
    ///
    /// Main-thread deliveries are not awaited: they run when the host drains
    /// them. Calling this from a background or async subscriber waits for the
    /// full timeout.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        // Async tasks may post background units and vice versa, so settle both
        loop {
            let background_idle = self.inner.background.wait_idle(deadline);
            let async_idle = self.inner.async_pool.wait_idle(deadline);
            if !(background_idle && async_idle) {
                return false;
            }
            if self.inner.background.is_idle() && self.inner.async_pool.in_flight() == 0 {
                return true;
            }
        }
    }

    /// Stops accepting posts and registrations, waits up to the configured
    /// timeout for background and async work, then stops the delivery runtime.
    ///
    /// Idempotent. Main-thread units already queued still run when the host
    /// drains them.
    pub fn shutdown(&self) {
        let inner = &self.inner;
        if !inner.shutdown.initiate_shutdown() {
            return;
        }

        let timeout = inner.config.shutdown_timeout();
        if !self.wait_until_idle(timeout) {
            warn!(
                "⚠️ Shutdown timeout of {:?} elapsed; abandoning {} background unit(s) and {} async task(s)",
                timeout,
                inner.background.pending(),
                inner.async_pool.in_flight()
            );
        }
        inner.runtime.shutdown();

        let stats = self.stats();
        info!(
            "📊 Final stats: {} events posted, {} deliveries, {} failures",
            stats.events_posted, stats.deliveries, stats.failures
        );
        inner.shutdown.complete_shutdown();
    }

    /// True once [`shutdown`](Self::shutdown) has been called.
    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_shutdown_initiated()
    }
}

// ============================================================================
// Invocation
// ============================================================================

/// The delivery currently running on this thread, innermost last.
#[derive(Debug)]
pub(super) struct CurrentDelivery {
    pub bus_id: u64,
    pub post_id: u64,
    pub event: Arc<dyn Event>,
    pub thread_mode: ThreadMode,
}

thread_local! {
    pub(super) static CURRENT_DELIVERY: RefCell<Vec<CurrentDelivery>> = const { RefCell::new(Vec::new()) };
}

/// Pops this invocation's [`CurrentDelivery`] on every exit path.
struct CurrentDeliveryGuard;

impl Drop for CurrentDeliveryGuard {
    fn drop(&mut self) {
        let _ = CURRENT_DELIVERY.try_with(|stack| stack.borrow_mut().pop());
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl BusInner {
    pub(super) fn next_post_id(&self) -> u64 {
        self.post_sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// Routes one unit according to its subscription's thread mode.
    pub(super) fn route(self: &Arc<Self>, unit: DeliveryUnit) {
        match unit.subscription.thread_mode() {
            ThreadMode::PostThread => self.invoke(&unit),
            ThreadMode::MainThread => self.main.deliver(unit, self),
            ThreadMode::BackgroundThread => self.background.enqueue(unit, self),
            ThreadMode::Async => self.async_pool.spawn(unit, self, &self.runtime),
        }
    }

    fn report_failure(self: &Arc<Self>, unit: &DeliveryUnit, cause: InvocationFailure) {
        let subscription = &unit.subscription;
        StatsCounters::increment(&self.stats.failures);

        let error = SubscriberInvocationError {
            subscriber: subscription.subscriber(),
            method: subscription.method_name().into(),
            thread_mode: subscription.thread_mode(),
            event_type: unit.event.event_type(),
            cause,
        };

        let reported = panic::catch_unwind(AssertUnwindSafe(|| {
            self.error_sink
                .on_delivery_failure(subscription, unit.event.as_ref(), &error)
        }));
        if reported.is_err() {
            error!("❌ Error sink panicked while reporting: {}", error);
        }

        if !self.config.send_subscriber_exception_event
            || unit.event.is::<SubscriberExceptionEvent>()
        {
            return;
        }

        let exception = SubscriberExceptionEvent {
            subscriber: error.subscriber,
            method: error.method.clone(),
            causing_event: Arc::clone(&unit.event),
            message: error.cause.to_string(),
        };
        if let Err(e) = self.post_arc(Arc::new(exception)) {
            debug!("SubscriberExceptionEvent not posted: {}", e);
        }
    }
}

impl UnitInvoker for BusInner {
    fn invoke(self: &Arc<Self>, unit: &DeliveryUnit) {
        let subscription = &unit.subscription;
        if !subscription.is_active() {
            trace!("Skipping delivery to unregistered {}", subscription);
            return;
        }

        CURRENT_DELIVERY.with(|stack| {
            stack.borrow_mut().push(CurrentDelivery {
                bus_id: self.id,
                post_id: unit.post_id,
                event: Arc::clone(&unit.event),
                thread_mode: subscription.thread_mode(),
            })
        });
        let guard = CurrentDeliveryGuard;

        let handler = subscription.method().handler();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(unit.event.as_ref())));
        drop(guard);
        StatsCounters::increment(&self.stats.deliveries);

        let cause = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(error)) => InvocationFailure::Failed(error),
            Err(payload) => InvocationFailure::Panicked(panic_message(&*payload)),
        };
        self.report_failure(unit, cause);
    }
}
