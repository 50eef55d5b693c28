//! # Deliverers
//!
//! One deliverer per non-inline [`ThreadMode`](crate::ThreadMode):
//!
//! - [`MainThreadDeliverer`] - FIFO queue drained on the host's main context
//! - [`BackgroundDeliverer`] - a single sequential worker shared by the bus
//! - [`AsyncDeliverer`] - independent pooled tasks, unordered
//!
//! Deliverers only sequence work. Invoking the subscriber, isolating failures
//! and reporting them is done by the [`UnitInvoker`] handed to them (the bus).
//! Background work runs on a dedicated worker thread. Async work runs on the
//! blocking pool of a tokio runtime wrapped by [`WorkerRuntime`].

mod async_pool;
mod background;
mod main_thread;

pub(crate) use async_pool::AsyncDeliverer;
pub(crate) use background::BackgroundDeliverer;
pub use main_thread::{ChannelMainThread, MainLoop, MainThreadSupport};
pub(crate) use main_thread::MainThreadDeliverer;

use crate::config::EventBusConfig;
use crate::events::{Event, EventBusError};
use crate::subscriber::Subscription;
use crate::utils::lock;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::debug;

/// The atomic item moved between the dispatcher and a deliverer.
#[derive(Debug, Clone)]
pub(crate) struct DeliveryUnit {
    pub event: Arc<dyn Event>,
    pub subscription: Arc<Subscription>,
    /// Identifies the post that produced this unit, for cancellation
    pub post_id: u64,
}

/// Invokes a subscriber for one unit with failure isolation.
pub(crate) trait UnitInvoker: Send + Sync + 'static {
    fn invoke(self: &Arc<Self>, unit: &DeliveryUnit);
}

/// Tokio runtime whose blocking pool runs async deliveries.
///
/// Either owned by the bus (built from the configuration) or borrowed from
/// the host through a [`Handle`].
pub(crate) struct WorkerRuntime {
    handle: Handle,
    owned: Mutex<Option<Runtime>>,
}

impl WorkerRuntime {
    /// Builds a runtime owned by the bus.
    ///
    /// Its blocking pool is capped at `async_max_threads` and idle threads are
    /// reused for `async_keep_alive_ms`.
    pub fn owned(config: &EventBusConfig) -> Result<Self, EventBusError> {
        let prefix = config.thread_name_prefix.clone();
        let counter = Arc::new(AtomicUsize::new(0));
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(config.async_max_threads)
            .thread_keep_alive(config.async_keep_alive())
            .thread_name_fn(move || {
                let id = counter.fetch_add(1, Ordering::Relaxed);
                format!("{prefix}-{id}")
            })
            .enable_all()
            .build()?;

        debug!(
            "🔧 Started delivery runtime (max {} pooled threads)",
            config.async_max_threads
        );
        Ok(Self {
            handle: runtime.handle().clone(),
            owned: Mutex::new(Some(runtime)),
        })
    }

    /// Wraps a runtime owned by the host.
    pub fn external(handle: Handle) -> Self {
        Self {
            handle,
            owned: Mutex::new(None),
        }
    }

    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        // Detached: completion is tracked by the deliverers themselves
        drop(self.handle.spawn(task));
    }

    /// Tears down an owned runtime without waiting; callers wait for idle
    /// deliverers first. Borrowed runtimes are left running.
    pub fn shutdown(&self) {
        if let Some(runtime) = lock(&self.owned).take() {
            runtime.shutdown_background();
            debug!("🔧 Delivery runtime stopped");
        }
    }
}

impl Drop for WorkerRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.owned.get_mut().ok().and_then(Option::take) {
            runtime.shutdown_background();
        }
    }
}

impl std::fmt::Debug for WorkerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRuntime")
            .field("owned", &lock(&self.owned).is_some())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::subscriber::SubscriberMethod;
    use crate::types::SubscriberId;
    use std::thread::ThreadId;

    #[derive(Debug)]
    pub struct Numbered(pub u32);
    crate::impl_event!(Numbered);

    /// Records which unit ran on which thread.
    #[derive(Default)]
    pub struct RecordingInvoker {
        pub seen: Mutex<Vec<(u32, ThreadId)>>,
    }

    impl UnitInvoker for RecordingInvoker {
        fn invoke(self: &Arc<Self>, unit: &DeliveryUnit) {
            if let Some(numbered) = unit.event.downcast_ref::<Numbered>() {
                lock(&self.seen).push((numbered.0, std::thread::current().id()));
            }
        }
    }

    impl RecordingInvoker {
        pub fn values(&self) -> Vec<u32> {
            lock(&self.seen).iter().map(|(v, _)| *v).collect()
        }
    }

    pub fn unit(value: u32) -> DeliveryUnit {
        let method = SubscriberMethod::new("numbered", |_: &Numbered| Ok(()));
        DeliveryUnit {
            event: Arc::new(Numbered(value)),
            subscription: Arc::new(Subscription::new(SubscriberId::new(), method, 0)),
            post_id: u64::from(value),
        }
    }

    pub fn runtime() -> WorkerRuntime {
        WorkerRuntime::owned(&EventBusConfig::default()).unwrap()
    }
}
