/// Event posting, per-thread draining and cancellation
use super::core::{BusInner, EventBus, CURRENT_DELIVERY};
use super::stats::StatsCounters;
use crate::delivery::DeliveryUnit;
use crate::events::{
    Event, EventBusError, NoSubscriberError, NoSubscriberEvent, SubscriberExceptionEvent,
};
use crate::types::ThreadMode;
use crate::utils::lock;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, trace};

// ============================================================================
// Posting Context
// ============================================================================

/// Per-thread, per-bus work queue.
///
/// Only the outermost `post` on a thread drains; posts made while draining
/// (from inline subscribers) append to the same queue and return, which keeps
/// the stack flat and makes nested posts breadth-first.
#[derive(Default)]
struct PostingContext {
    queue: VecDeque<DeliveryUnit>,
    is_draining: bool,
    /// Posts folded into the running drain
    nested_posts: usize,
    /// Posts whose remaining units must be skipped
    canceled: HashSet<u64>,
}

thread_local! {
    static POSTING_CONTEXTS: RefCell<HashMap<u64, PostingContext>> = RefCell::new(HashMap::new());
}

/// Discards this thread's context for a bus when its drain ends, whichever
/// way it ends.
struct DrainGuard {
    bus_id: u64,
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        let _ = POSTING_CONTEXTS.try_with(|contexts| {
            if let Some(context) = contexts.borrow_mut().remove(&self.bus_id) {
                if context.nested_posts > 0 {
                    trace!("Drain finished after {} nested post(s)", context.nested_posts);
                }
            }
        });
    }
}

impl BusInner {
    /// Posts an already shared event.
    pub(crate) fn post_arc(self: &Arc<Self>, event: Arc<dyn Event>) -> Result<(), EventBusError> {
        self.dispatch(event, false)
    }

    fn dispatch(self: &Arc<Self>, event: Arc<dyn Event>, sticky: bool) -> Result<(), EventBusError> {
        if self.shutdown.is_shutdown_initiated() {
            return Err(EventBusError::ShutDown);
        }
        StatsCounters::increment(&self.stats.events_posted);

        let event_type = event.event_type();
        let types = self
            .type_cache
            .compatible_types(event_type, self.config.event_inheritance);

        // The sticky write and the resolution share one critical section, so a
        // concurrent sticky registration sees the event exactly once
        let subscriptions = {
            let mut registry = lock(&self.registry);
            if sticky {
                registry.sticky.insert(Arc::clone(&event));
            }
            registry.index.resolve(&types)
        };

        if subscriptions.is_empty() {
            self.no_subscriber(event);
            return Ok(());
        }

        let post_id = self.next_post_id();
        let units = subscriptions.into_iter().map(|subscription| DeliveryUnit {
            event: Arc::clone(&event),
            subscription,
            post_id,
        });
        self.enqueue_and_drain(units);
        Ok(())
    }

    fn no_subscriber(self: &Arc<Self>, event: Arc<dyn Event>) {
        StatsCounters::increment(&self.stats.no_subscriber_events);

        if self.config.log_no_subscriber_messages {
            debug!(
                "{}",
                NoSubscriberError {
                    event_type: event.event_type()
                }
            );
        }

        if self.config.send_no_subscriber_event
            && !event.is::<NoSubscriberEvent>()
            && !event.is::<SubscriberExceptionEvent>()
        {
            let wrapped = NoSubscriberEvent {
                original_event: event,
            };
            if let Err(e) = self.post_arc(Arc::new(wrapped)) {
                debug!("NoSubscriberEvent not posted: {}", e);
            }
        }
    }

    /// Appends `units` to this thread's queue and, unless a drain is already
    /// running on this thread, drains it.
    pub(super) fn enqueue_and_drain(
        self: &Arc<Self>,
        units: impl IntoIterator<Item = DeliveryUnit>,
    ) {
        let start_drain = POSTING_CONTEXTS.with(|contexts| {
            let mut contexts = contexts.borrow_mut();
            let context = contexts.entry(self.id).or_default();
            context.queue.extend(units);
            if context.is_draining {
                context.nested_posts += 1;
                false
            } else {
                context.is_draining = true;
                true
            }
        });
        if !start_drain {
            return;
        }

        let _guard = DrainGuard { bus_id: self.id };
        while let Some(unit) = self.next_unit() {
            self.route(unit);
        }
    }

    /// Pops the next unit of this thread's queue, skipping canceled posts.
    fn next_unit(&self) -> Option<DeliveryUnit> {
        POSTING_CONTEXTS.with(|contexts| {
            let mut contexts = contexts.borrow_mut();
            let context = contexts.get_mut(&self.id)?;
            while let Some(unit) = context.queue.pop_front() {
                if context.canceled.contains(&unit.post_id) {
                    StatsCounters::increment(&self.stats.canceled_deliveries);
                    continue;
                }
                return Some(unit);
            }
            None
        })
    }

    fn cancel_current(&self, event: &dyn Event) -> Result<(), EventBusError> {
        let (post_id, thread_mode) = CURRENT_DELIVERY.with(|stack| {
            let stack = stack.borrow();
            let current = stack
                .iter()
                .rev()
                .find(|current| current.bus_id == self.id)
                .ok_or(EventBusError::CancelOutsideDelivery)?;
            if !std::ptr::addr_eq(Arc::as_ptr(&current.event), event as *const dyn Event) {
                return Err(EventBusError::CancelForeignEvent);
            }
            Ok((current.post_id, current.thread_mode))
        })?;

        if thread_mode != ThreadMode::PostThread {
            return Err(EventBusError::CancelFromThreadMode(thread_mode));
        }

        POSTING_CONTEXTS.with(|contexts| {
            if let Some(context) = contexts.borrow_mut().get_mut(&self.id) {
                context.canceled.insert(post_id);
            }
        });
        debug!("🚫 Delivery of {} canceled", event.type_name());
        Ok(())
    }
}

// ============================================================================
// Public Posting API
// ============================================================================

impl EventBus {
    /// Posts `event` to every subscription accepting its type.
    ///
    /// `PostThread` subscribers (and `MainThread` subscribers when called on
    /// the main context) have run by the time this returns, unless this call
    /// is made from inside such a subscriber: the new event is then delivered
    /// right after the current subscriber returns.
    ///
    /// Subscriber failures never surface here. The only error is
    /// [`EventBusError::ShutDown`].
    pub fn post<E: Event>(&self, event: E) -> Result<(), EventBusError> {
        self.inner.post_arc(Arc::new(event))
    }

    /// Posts an event that is already shared.
    pub fn post_arc(&self, event: Arc<dyn Event>) -> Result<(), EventBusError> {
        self.inner.post_arc(event)
    }

    /// Stores `event` as the sticky value of its concrete type, replacing any
    /// previous one, then posts it.
    ///
    /// Subscriptions registered later with the sticky flag receive it on
    /// registration.
    pub fn post_sticky<E: Event>(&self, event: E) -> Result<(), EventBusError> {
        self.inner.dispatch(Arc::new(event), true)
    }

    /// Sticky variant of [`post_arc`](Self::post_arc).
    pub fn post_sticky_arc(&self, event: Arc<dyn Event>) -> Result<(), EventBusError> {
        self.inner.dispatch(event, true)
    }

    /// Skips the remaining deliveries of the event currently being handled.
    ///
    /// Only valid from a [`ThreadMode::PostThread`] subscriber, for the very
    /// event it was handed. Subscriptions with lower priority (or registered
    /// later with equal priority) then do not receive it.
    pub fn cancel_event_delivery(&self, event: &dyn Event) -> Result<(), EventBusError> {
        self.inner.cancel_current(event)
    }
}
