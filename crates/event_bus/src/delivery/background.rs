//! Single sequential worker shared by all background-mode deliveries.

use super::{DeliveryUnit, UnitInvoker};
use crate::utils::lock;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::Instant;
use tracing::{error, trace};

#[derive(Default)]
struct BackgroundQueue {
    units: VecDeque<DeliveryUnit>,
    worker_active: bool,
}

/// FIFO queue consumed by at most one worker at a time.
///
/// A worker thread is started on the first enqueue into an idle deliverer and
/// exits as soon as the queue is empty. It is a dedicated OS thread, so async
/// deliveries saturating the runtime's pool never hold background work back.
/// Every background delivery of the bus happens in one total order and never
/// concurrently with another.
pub(crate) struct BackgroundDeliverer {
    queue: Mutex<BackgroundQueue>,
    idle: Condvar,
    thread_name: String,
}

/// Marks the worker inactive unless disarmed, so the next enqueue restarts it.
///
/// Created before the thread is spawned: it fires if the worker unwinds and
/// also if the thread never starts.
struct WorkerGuard {
    deliverer: Arc<BackgroundDeliverer>,
    armed: bool,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        if self.armed {
            lock(&self.deliverer.queue).worker_active = false;
            self.deliverer.idle.notify_all();
        }
    }
}

impl BackgroundDeliverer {
    pub fn new(thread_name: impl Into<String>) -> Self {
        Self {
            queue: Mutex::new(BackgroundQueue::default()),
            idle: Condvar::new(),
            thread_name: thread_name.into(),
        }
    }

    pub fn enqueue<I: UnitInvoker>(self: &Arc<Self>, unit: DeliveryUnit, invoker: &Arc<I>) {
        let start_worker = {
            let mut queue = lock(&self.queue);
            queue.units.push_back(unit);
            !std::mem::replace(&mut queue.worker_active, true)
        };
        if !start_worker {
            return;
        }

        let guard = WorkerGuard {
            deliverer: Arc::clone(self),
            armed: true,
        };
        let invoker = Arc::clone(invoker);
        let spawned = thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || Self::run_worker(guard, &invoker));

        // The closure and its guard were dropped, the next enqueue retries
        if let Err(e) = spawned {
            error!(
                "❌ Failed to start background worker ({} unit(s) waiting): {}",
                self.pending(),
                e
            );
        }
    }

    fn run_worker<I: UnitInvoker>(mut guard: WorkerGuard, invoker: &Arc<I>) {
        let this = Arc::clone(&guard.deliverer);
        trace!("🧵 Background worker started");
        loop {
            let unit = {
                let mut queue = lock(&this.queue);
                match queue.units.pop_front() {
                    Some(unit) => unit,
                    None => {
                        queue.worker_active = false;
                        guard.armed = false;
                        break;
                    }
                }
            };
            invoker.invoke(&unit);
        }
        this.idle.notify_all();
        trace!("🧵 Background worker idle");
    }

    /// Blocks until the queue is empty and no worker runs, or `deadline`
    /// passes. Returns true when idle.
    ///
    /// Calling this from a background subscriber waits until the deadline.
    pub fn wait_idle(&self, deadline: Instant) -> bool {
        let queue = lock(&self.queue);
        let timeout = deadline.saturating_duration_since(Instant::now());
        let (queue, _) = self
            .idle
            .wait_timeout_while(queue, timeout, |q| q.worker_active || !q.units.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        !queue.worker_active && queue.units.is_empty()
    }

    pub fn is_idle(&self) -> bool {
        let queue = lock(&self.queue);
        !queue.worker_active && queue.units.is_empty()
    }

    pub fn pending(&self) -> usize {
        lock(&self.queue).units.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::test_support::{unit, Numbered};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Tracks how many invocations overlap.
    #[derive(Default)]
    struct OverlapTracker {
        running: AtomicUsize,
        max_running: AtomicUsize,
        order: Mutex<Vec<u32>>,
    }

    impl UnitInvoker for OverlapTracker {
        fn invoke(self: &Arc<Self>, unit: &DeliveryUnit) {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(1));
            if let Some(numbered) = unit.event.downcast_ref::<Numbered>() {
                lock(&self.order).push(numbered.0);
            }
            self.running.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn deliverer() -> Arc<BackgroundDeliverer> {
        Arc::new(BackgroundDeliverer::new("test-background"))
    }

    #[test]
    fn test_units_run_in_fifo_order_one_at_a_time() {
        let deliverer = deliverer();
        let invoker = Arc::new(OverlapTracker::default());

        for value in 0..20 {
            deliverer.enqueue(unit(value), &invoker);
        }

        assert!(deliverer.wait_idle(Instant::now() + Duration::from_secs(5)));
        assert_eq!(*lock(&invoker.order), (0..20).collect::<Vec<_>>());
        assert_eq!(invoker.max_running.load(Ordering::SeqCst), 1);
        assert_eq!(deliverer.pending(), 0);
    }

    #[test]
    fn test_concurrent_producers_never_overlap() {
        let deliverer = deliverer();
        let invoker = Arc::new(OverlapTracker::default());

        let producers: Vec<_> = (0..4)
            .map(|p| {
                let deliverer = Arc::clone(&deliverer);
                let invoker = Arc::clone(&invoker);
                std::thread::spawn(move || {
                    for i in 0..10 {
                        deliverer.enqueue(unit(p * 100 + i), &invoker);
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        assert!(deliverer.wait_idle(Instant::now() + Duration::from_secs(5)));
        let order = lock(&invoker.order).clone();
        assert_eq!(order.len(), 40);
        assert_eq!(invoker.max_running.load(Ordering::SeqCst), 1);

        // Each producer's own units keep their relative order
        for p in 0..4 {
            let own: Vec<u32> = order.iter().copied().filter(|v| v / 100 == p).collect();
            assert_eq!(own, (0..10).map(|i| p * 100 + i).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_wait_idle_times_out_while_busy() {
        struct Slow;
        impl UnitInvoker for Slow {
            fn invoke(self: &Arc<Self>, _unit: &DeliveryUnit) {
                std::thread::sleep(Duration::from_millis(200));
            }
        }

        let deliverer = deliverer();
        deliverer.enqueue(unit(1), &Arc::new(Slow));

        assert!(!deliverer.wait_idle(Instant::now() + Duration::from_millis(10)));
        assert!(deliverer.wait_idle(Instant::now() + Duration::from_secs(5)));
    }

    #[test]
    fn test_worker_runs_on_named_dedicated_thread() {
        struct ThreadNames(Mutex<Vec<Option<String>>>);
        impl UnitInvoker for ThreadNames {
            fn invoke(self: &Arc<Self>, _unit: &DeliveryUnit) {
                let name = std::thread::current().name().map(str::to_string);
                lock(&self.0).push(name);
            }
        }

        let deliverer = deliverer();
        let invoker = Arc::new(ThreadNames(Mutex::new(Vec::new())));
        deliverer.enqueue(unit(1), &invoker);
        assert!(deliverer.wait_idle(Instant::now() + Duration::from_secs(5)));

        // A later burst starts a fresh worker under the same name
        deliverer.enqueue(unit(2), &invoker);
        assert!(deliverer.wait_idle(Instant::now() + Duration::from_secs(5)));
        assert_eq!(
            *lock(&invoker.0),
            vec![Some("test-background".to_string()); 2]
        );
    }

    #[test]
    fn test_guard_dropped_before_start_leaves_worker_restartable() {
        let deliverer = deliverer();
        let invoker = Arc::new(OverlapTracker::default());

        // A worker slot claimed for a thread that never ran
        lock(&deliverer.queue).worker_active = true;
        drop(WorkerGuard {
            deliverer: Arc::clone(&deliverer),
            armed: true,
        });
        assert!(deliverer.is_idle());

        deliverer.enqueue(unit(5), &invoker);
        assert!(deliverer.wait_idle(Instant::now() + Duration::from_secs(5)));
        assert_eq!(*lock(&invoker.order), vec![5]);
    }
}
