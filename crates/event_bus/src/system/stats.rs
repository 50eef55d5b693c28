/// Statistics tracking for the event bus
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of event bus statistics for monitoring
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBusStats {
    /// Number of registered subscriptions
    pub subscriptions: usize,
    /// Number of distinct registered subscribers
    pub subscribers: usize,
    /// Events accepted by `post`/`post_sticky`, including bus-generated events
    pub events_posted: u64,
    /// Subscriber invocations that completed, successfully or not
    pub deliveries: u64,
    /// Subscriber invocations that returned an error or panicked
    pub failures: u64,
    /// Posts that matched no subscription
    pub no_subscriber_events: u64,
    /// Deliveries skipped by `cancel_event_delivery`
    pub canceled_deliveries: u64,
    /// Events currently held by the sticky cache
    pub sticky_events: usize,
    /// Units waiting for the background worker
    pub background_pending: usize,
    /// Units waiting for the main thread
    pub main_thread_pending: usize,
    /// Async deliveries queued or running
    pub async_in_flight: usize,
}

/// Live counters behind [`EventBusStats`].
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub events_posted: AtomicU64,
    pub deliveries: AtomicU64,
    pub failures: AtomicU64,
    pub no_subscriber_events: AtomicU64,
    pub canceled_deliveries: AtomicU64,
}

impl StatsCounters {
    #[inline]
    pub fn increment(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Fills the counter fields of `stats`.
    pub fn fill(&self, stats: &mut EventBusStats) {
        stats.events_posted = self.events_posted.load(Ordering::Relaxed);
        stats.deliveries = self.deliveries.load(Ordering::Relaxed);
        stats.failures = self.failures.load(Ordering::Relaxed);
        stats.no_subscriber_events = self.no_subscriber_events.load(Ordering::Relaxed);
        stats.canceled_deliveries = self.canceled_deliveries.load(Ordering::Relaxed);
    }
}
