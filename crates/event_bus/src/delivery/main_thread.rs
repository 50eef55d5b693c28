//! # Main-Thread Delivery
//!
//! The bus does not own a main thread. The host supplies one through
//! [`MainThreadSupport`]: a way to tell whether the caller is on it, and a way
//! to schedule a callback onto it. [`ChannelMainThread`] and [`MainLoop`] are a
//! ready-made host for applications without an event loop of their own.
//!
//! ```rust
//! use event_bus::{ChannelMainThread, EventBus};
//!
//! let (support, main_loop) = ChannelMainThread::channel();
//! let bus = EventBus::builder().main_thread(support.clone()).build()?;
//!
//! // Run queued main-thread deliveries on this thread
//! main_loop.run_pending();
//! bus.shutdown();
//! # Ok::<(), event_bus::EventBusError>(())
//! ```

use super::{DeliveryUnit, UnitInvoker};
use crate::utils::lock;
use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Host hook owning the main execution context.
pub trait MainThreadSupport: Send + Sync + 'static {
    /// True if the calling thread is the main execution context.
    fn is_main_thread(&self) -> bool;

    /// Runs `task` later on the main execution context. Must be callable from
    /// any thread.
    fn schedule(&self, task: Box<dyn FnOnce() + Send + 'static>);
}

// ============================================================================
// Deliverer
// ============================================================================

#[derive(Default)]
struct MainQueue {
    units: VecDeque<DeliveryUnit>,
    drain_scheduled: bool,
}

/// Serializes main-thread-mode deliveries onto the host's main context.
///
/// Without a [`MainThreadSupport`] hook every thread counts as main and units
/// run inline.
pub(crate) struct MainThreadDeliverer {
    support: Option<Arc<dyn MainThreadSupport>>,
    queue: Mutex<MainQueue>,
}

impl MainThreadDeliverer {
    pub fn new(support: Option<Arc<dyn MainThreadSupport>>) -> Self {
        Self {
            support,
            queue: Mutex::new(MainQueue::default()),
        }
    }

    pub fn is_main_thread(&self) -> bool {
        self.support.as_ref().map_or(true, |s| s.is_main_thread())
    }

    /// Delivers `unit` inline when called on the main context, otherwise
    /// queues it and requests a drain if none is pending.
    pub fn deliver<I: UnitInvoker>(self: &Arc<Self>, unit: DeliveryUnit, invoker: &Arc<I>) {
        let support = match &self.support {
            Some(support) if !support.is_main_thread() => support,
            _ => {
                invoker.invoke(&unit);
                return;
            }
        };

        let needs_drain = {
            let mut queue = lock(&self.queue);
            queue.units.push_back(unit);
            !std::mem::replace(&mut queue.drain_scheduled, true)
        };

        if needs_drain {
            let this = Arc::clone(self);
            let invoker = Arc::clone(invoker);
            support.schedule(Box::new(move || this.drain(&invoker)));
        }
    }

    /// Runs every queued unit in FIFO order, including units queued while
    /// draining.
    fn drain<I: UnitInvoker>(&self, invoker: &Arc<I>) {
        let mut delivered = 0usize;
        loop {
            let unit = {
                let mut queue = lock(&self.queue);
                match queue.units.pop_front() {
                    Some(unit) => unit,
                    None => {
                        queue.drain_scheduled = false;
                        break;
                    }
                }
            };
            invoker.invoke(&unit);
            delivered += 1;
        }
        debug!("🧵 Main-thread drain delivered {} unit(s)", delivered);
    }

    pub fn pending(&self) -> usize {
        lock(&self.queue).units.len()
    }
}

// ============================================================================
// Channel-based Host
// ============================================================================

enum MainMessage {
    Run(Box<dyn FnOnce() + Send + 'static>),
    Stop,
}

/// [`MainThreadSupport`] backed by a channel that a [`MainLoop`] consumes.
///
/// The thread that runs the loop becomes the main thread.
pub struct ChannelMainThread {
    sender: Sender<MainMessage>,
    main_thread: Arc<Mutex<Option<ThreadId>>>,
}

impl ChannelMainThread {
    /// Creates the hook and the loop that serves it.
    pub fn channel() -> (Arc<Self>, MainLoop) {
        let (sender, receiver) = mpsc::channel();
        let main_thread = Arc::new(Mutex::new(None));
        let support = Arc::new(Self {
            sender,
            main_thread: Arc::clone(&main_thread),
        });
        (
            support,
            MainLoop {
                receiver,
                main_thread,
            },
        )
    }

    /// Asks a running [`MainLoop::run`] to return after the tasks queued
    /// before this call.
    pub fn request_stop(&self) {
        if self.sender.send(MainMessage::Stop).is_err() {
            debug!("🧵 Main loop already gone; stop request ignored");
        }
    }
}

impl MainThreadSupport for ChannelMainThread {
    fn is_main_thread(&self) -> bool {
        *lock(&self.main_thread) == Some(std::thread::current().id())
    }

    fn schedule(&self, task: Box<dyn FnOnce() + Send + 'static>) {
        if self.sender.send(MainMessage::Run(task)).is_err() {
            warn!("🟡 Main loop has been dropped; main-thread task discarded");
        }
    }
}

impl std::fmt::Debug for ChannelMainThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelMainThread")
            .field("main_thread", &*lock(&self.main_thread))
            .finish()
    }
}

/// The consuming side of a [`ChannelMainThread`].
pub struct MainLoop {
    receiver: Receiver<MainMessage>,
    main_thread: Arc<Mutex<Option<ThreadId>>>,
}

impl MainLoop {
    /// Makes the calling thread the main thread.
    pub fn bind_current_thread(&self) {
        *lock(&self.main_thread) = Some(std::thread::current().id());
    }

    /// Runs scheduled tasks until [`ChannelMainThread::request_stop`] is
    /// called or the hook is dropped. Returns the number of tasks run.
    pub fn run(&self) -> usize {
        self.bind_current_thread();
        let mut ran = 0;
        while let Ok(message) = self.receiver.recv() {
            match message {
                MainMessage::Run(task) => {
                    task();
                    ran += 1;
                }
                MainMessage::Stop => break,
            }
        }
        ran
    }

    /// Runs the tasks already queued without blocking.
    pub fn run_pending(&self) -> usize {
        self.bind_current_thread();
        let mut ran = 0;
        while let Ok(message) = self.receiver.try_recv() {
            match message {
                MainMessage::Run(task) => {
                    task();
                    ran += 1;
                }
                MainMessage::Stop => break,
            }
        }
        ran
    }

    /// Runs tasks for up to `timeout`, returning early on a stop request.
    pub fn run_for(&self, timeout: Duration) -> usize {
        self.bind_current_thread();
        let deadline = Instant::now() + timeout;
        let mut ran = 0;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.receiver.recv_timeout(remaining) {
                Ok(MainMessage::Run(task)) => {
                    task();
                    ran += 1;
                }
                Ok(MainMessage::Stop) => break,
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        ran
    }
}

impl std::fmt::Debug for MainLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MainLoop").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::test_support::{unit, RecordingInvoker};

    #[test]
    fn test_without_support_delivers_inline() {
        let deliverer = Arc::new(MainThreadDeliverer::new(None));
        let invoker = Arc::new(RecordingInvoker::default());

        assert!(deliverer.is_main_thread());
        deliverer.deliver(unit(1), &invoker);
        assert_eq!(invoker.values(), vec![1]);
        assert_eq!(deliverer.pending(), 0);
    }

    #[test]
    fn test_off_main_units_queue_with_single_drain_request() {
        let (support, main_loop) = ChannelMainThread::channel();
        let deliverer = Arc::new(MainThreadDeliverer::new(Some(support.clone() as Arc<dyn MainThreadSupport>)));
        let invoker = Arc::new(RecordingInvoker::default());

        // The loop is not bound yet, so this thread is not main
        for value in 1..=3 {
            deliverer.deliver(unit(value), &invoker);
        }
        assert!(invoker.values().is_empty());
        assert_eq!(deliverer.pending(), 3);

        // Three units, one scheduled drain
        assert_eq!(main_loop.run_pending(), 1);
        assert_eq!(invoker.values(), vec![1, 2, 3]);
        assert_eq!(deliverer.pending(), 0);
    }

    #[test]
    fn test_main_thread_delivers_immediately() {
        let (support, main_loop) = ChannelMainThread::channel();
        main_loop.bind_current_thread();
        let deliverer = Arc::new(MainThreadDeliverer::new(Some(support as Arc<dyn MainThreadSupport>)));
        let invoker = Arc::new(RecordingInvoker::default());

        deliverer.deliver(unit(7), &invoker);
        assert_eq!(invoker.values(), vec![7]);
        assert_eq!(main_loop.run_pending(), 0);
    }

    #[test]
    fn test_drain_runs_on_loop_thread() {
        let (support, main_loop) = ChannelMainThread::channel();
        let deliverer = Arc::new(MainThreadDeliverer::new(Some(support.clone() as Arc<dyn MainThreadSupport>)));
        let invoker = Arc::new(RecordingInvoker::default());

        let loop_thread = std::thread::spawn(move || {
            let id = std::thread::current().id();
            main_loop.run();
            id
        });

        // Wait until the loop has bound its thread
        while !support.main_thread_bound() {
            std::thread::yield_now();
        }
        deliverer.deliver(unit(4), &invoker);
        support.request_stop();
        let loop_id = loop_thread.join().unwrap();

        let seen = lock(&invoker.seen).clone();
        assert_eq!(seen, vec![(4, loop_id)]);
    }
}

#[cfg(test)]
impl ChannelMainThread {
    fn main_thread_bound(&self) -> bool {
        lock(&self.main_thread).is_some()
    }
}
