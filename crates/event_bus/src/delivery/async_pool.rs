//! Async-mode deliveries: one pooled task per unit, no ordering.

use super::{DeliveryUnit, UnitInvoker, WorkerRuntime};
use crate::utils::lock;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::warn;

/// Hands each unit to the runtime's blocking pool and counts tasks in flight.
///
/// At most `max_threads` units run at once, whether the runtime is owned by
/// the bus or by the host. Further units wait for a permit in FIFO order.
pub(crate) struct AsyncDeliverer {
    in_flight: Mutex<usize>,
    idle: Condvar,
    permits: Arc<Semaphore>,
}

/// Decrements the in-flight count when the task ends, even if it never ran.
struct InFlightGuard(Arc<AsyncDeliverer>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut in_flight = lock(&self.0.in_flight);
        *in_flight = in_flight.saturating_sub(1);
        if *in_flight == 0 {
            self.0.idle.notify_all();
        }
    }
}

impl AsyncDeliverer {
    pub fn new(max_threads: usize) -> Self {
        Self {
            in_flight: Mutex::new(0),
            idle: Condvar::new(),
            permits: Arc::new(Semaphore::new(max_threads)),
        }
    }

    pub fn spawn<I: UnitInvoker>(
        self: &Arc<Self>,
        unit: DeliveryUnit,
        invoker: &Arc<I>,
        runtime: &WorkerRuntime,
    ) {
        *lock(&self.in_flight) += 1;
        let guard = InFlightGuard(Arc::clone(self));
        let permits = Arc::clone(&self.permits);
        let invoker = Arc::clone(invoker);
        runtime.spawn(async move {
            let permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            let task = tokio::task::spawn_blocking(move || {
                let _guard = guard;
                invoker.invoke(&unit);
            });
            if let Err(e) = task.await {
                warn!("⚠️ Async delivery task did not complete: {}", e);
            }
            drop(permit);
        });
    }

    /// Blocks until no async task is in flight or `deadline` passes.
    pub fn wait_idle(&self, deadline: Instant) -> bool {
        let in_flight = lock(&self.in_flight);
        let timeout = deadline.saturating_duration_since(Instant::now());
        let (in_flight, _) = self
            .idle
            .wait_timeout_while(in_flight, timeout, |count| *count > 0)
            .unwrap_or_else(PoisonError::into_inner);
        *in_flight == 0
    }

    pub fn in_flight(&self) -> usize {
        *lock(&self.in_flight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::test_support::{runtime, unit, RecordingInvoker};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::time::Duration;

    #[test]
    fn test_every_unit_runs_once() {
        let runtime = runtime();
        let deliverer = Arc::new(AsyncDeliverer::new(4));
        let invoker = Arc::new(RecordingInvoker::default());

        for value in 0..50 {
            deliverer.spawn(unit(value), &invoker, &runtime);
        }

        assert!(deliverer.wait_idle(Instant::now() + Duration::from_secs(5)));
        let mut values = invoker.values();
        values.sort_unstable();
        assert_eq!(values, (0..50).collect::<Vec<_>>());
        assert_eq!(deliverer.in_flight(), 0);
    }

    #[test]
    fn test_tasks_run_concurrently_on_pooled_threads() {
        struct Rendezvous(Barrier);
        impl UnitInvoker for Rendezvous {
            fn invoke(self: &Arc<Self>, _unit: &DeliveryUnit) {
                // Deadlocks unless both tasks run at the same time
                self.0.wait();
            }
        }

        let runtime = runtime();
        let deliverer = Arc::new(AsyncDeliverer::new(2));
        let invoker = Arc::new(Rendezvous(Barrier::new(2)));
        deliverer.spawn(unit(1), &invoker, &runtime);
        deliverer.spawn(unit(2), &invoker, &runtime);

        assert!(deliverer.wait_idle(Instant::now() + Duration::from_secs(5)));
    }

    #[test]
    fn test_running_tasks_capped_at_max_threads() {
        #[derive(Default)]
        struct Overlap {
            running: AtomicUsize,
            max_running: AtomicUsize,
        }
        impl UnitInvoker for Overlap {
            fn invoke(self: &Arc<Self>, _unit: &DeliveryUnit) {
                let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_running.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(20));
                self.running.fetch_sub(1, Ordering::SeqCst);
            }
        }

        // The host's runtime has far more blocking threads than the cap
        let host = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(16)
            .build()
            .unwrap();
        let runtime = WorkerRuntime::external(host.handle().clone());
        let deliverer = Arc::new(AsyncDeliverer::new(2));
        let invoker = Arc::new(Overlap::default());

        for value in 0..8 {
            deliverer.spawn(unit(value), &invoker, &runtime);
        }

        assert!(deliverer.wait_idle(Instant::now() + Duration::from_secs(5)));
        let max_running = invoker.max_running.load(Ordering::SeqCst);
        assert!((1..=2).contains(&max_running), "{max_running} tasks overlapped");
    }

    #[test]
    fn test_threads_are_not_the_caller() {
        let runtime = runtime();
        let deliverer = Arc::new(AsyncDeliverer::new(1));
        let invoker = Arc::new(RecordingInvoker::default());
        deliverer.spawn(unit(9), &invoker, &runtime);
        assert!(deliverer.wait_idle(Instant::now() + Duration::from_secs(5)));

        let threads: HashSet<_> = lock(&invoker.seen).iter().map(|(_, id)| *id).collect();
        assert!(!threads.contains(&std::thread::current().id()));
    }
}
