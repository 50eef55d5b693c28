//! The scripted download scenario.
//!
//! A producer thread simulates downloads while subscribers listen in every
//! thread mode:
//!
//! * `DownloadScreen` renders progress and toasts on the main thread
//! * `ArchiveWorker` stores finished downloads on the background worker
//! * `ThumbnailPool` renders previews on pooled async workers
//! * `AuditTrail` sees every download event through the `DownloadEvent`
//!   supertype and cancels the delivery of quiet notices
//! * `FlakyPlugin` fails halfway through each download
//! * `Diagnostics` collects failures and unmatched events
//! * `StatusBar` registers late and receives the sticky network state

use event_bus::{
    event_marker, impl_event, Event, EventBus, EventBusError, EventType, NoSubscriberEvent,
    ShutdownState, Subscriber, SubscriberExceptionEvent, SubscriberId, SubscriberMethod,
    ThreadMode,
};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

// ============================================================================
// Events
// ============================================================================

/// Anything the user should be told about.
pub trait UserNotice {}
event_marker!(dyn UserNotice);

/// Common supertype of every download event.
#[derive(Debug, Clone)]
pub struct DownloadEvent {
    pub id: u32,
}
impl_event!(DownloadEvent);

#[derive(Debug, Clone)]
pub struct DownloadProgress {
    pub id: u32,
    pub percent: u8,
}
impl_event!(DownloadProgress => DownloadEvent);

#[derive(Debug, Clone)]
pub struct DownloadFinished {
    pub id: u32,
    pub bytes: u64,
    /// Quiet downloads are audited but never shown, archived or previewed
    pub quiet: bool,
}
impl UserNotice for DownloadFinished {}
impl_event!(DownloadFinished => DownloadEvent, dyn UserNotice);

/// Posted sticky: late subscribers still learn the current state.
#[derive(Debug, Clone)]
pub struct NetworkState {
    pub online: bool,
    pub kind: String,
}
impl_event!(NetworkState);

/// Nobody listens to this one.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    pub round: u32,
}
impl_event!(Heartbeat);

// ============================================================================
// Counters
// ============================================================================

/// What the subscribers observed.
#[derive(Debug, Default)]
pub struct Counters {
    progress_renders: AtomicU64,
    toasts: AtomicU64,
    archived: AtomicU64,
    thumbnails: AtomicU64,
    audited: AtomicU64,
    canceled: AtomicU64,
    failures: AtomicU64,
    unmatched: AtomicU64,
    sticky_replays: AtomicU64,
}

/// Serializable snapshot of [`Counters`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScenarioReport {
    pub progress_renders: u64,
    pub toasts: u64,
    pub archived: u64,
    pub thumbnails: u64,
    pub audited: u64,
    pub canceled: u64,
    pub failures: u64,
    pub unmatched: u64,
    pub sticky_replays: u64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn report(&self) -> ScenarioReport {
        ScenarioReport {
            progress_renders: self.progress_renders.load(Ordering::Relaxed),
            toasts: self.toasts.load(Ordering::Relaxed),
            archived: self.archived.load(Ordering::Relaxed),
            thumbnails: self.thumbnails.load(Ordering::Relaxed),
            audited: self.audited.load(Ordering::Relaxed),
            canceled: self.canceled.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            unmatched: self.unmatched.load(Ordering::Relaxed),
            sticky_replays: self.sticky_replays.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Subscribers
// ============================================================================

pub struct DownloadScreen {
    id: SubscriberId,
    counters: Arc<Counters>,
}

impl Subscriber for DownloadScreen {
    fn subscriber_id(&self) -> SubscriberId {
        self.id
    }

    fn subscriber_methods(self: Arc<Self>) -> Vec<SubscriberMethod> {
        let render = Arc::clone(&self);
        let toast = self;
        vec![
            SubscriberMethod::new("render_progress", move |e: &DownloadProgress| {
                Counters::bump(&render.counters.progress_renders);
                info!("🖥️ Download #{} at {}%", e.id, e.percent);
                Ok(())
            })
            .with_thread_mode(ThreadMode::MainThread),
            SubscriberMethod::dynamic(
                "toast",
                EventType::of::<dyn UserNotice>(),
                move |e: &dyn Event| {
                    Counters::bump(&toast.counters.toasts);
                    info!("🔔 {:?}", e);
                    Ok(())
                },
            )
            .with_thread_mode(ThreadMode::MainThread),
        ]
    }
}

pub struct ArchiveWorker {
    id: SubscriberId,
    counters: Arc<Counters>,
}

impl Subscriber for ArchiveWorker {
    fn subscriber_id(&self) -> SubscriberId {
        self.id
    }

    fn subscriber_methods(self: Arc<Self>) -> Vec<SubscriberMethod> {
        vec![SubscriberMethod::new("archive", move |e: &DownloadFinished| {
            // Slow enough to show that background deliveries queue up
            std::thread::sleep(Duration::from_millis(15));
            Counters::bump(&self.counters.archived);
            info!("🗄️ Archived download #{} ({} bytes)", e.id, e.bytes);
            Ok(())
        })
        .with_thread_mode(ThreadMode::BackgroundThread)]
    }
}

pub struct ThumbnailPool {
    id: SubscriberId,
    counters: Arc<Counters>,
}

impl Subscriber for ThumbnailPool {
    fn subscriber_id(&self) -> SubscriberId {
        self.id
    }

    fn subscriber_methods(self: Arc<Self>) -> Vec<SubscriberMethod> {
        vec![SubscriberMethod::new("thumbnail", move |e: &DownloadFinished| {
            std::thread::sleep(Duration::from_millis(10));
            Counters::bump(&self.counters.thumbnails);
            info!("🖼️ Rendered preview for download #{}", e.id);
            Ok(())
        })
        .with_thread_mode(ThreadMode::Async)]
    }
}

pub struct AuditTrail {
    id: SubscriberId,
    counters: Arc<Counters>,
    bus: EventBus,
}

impl Subscriber for AuditTrail {
    fn subscriber_id(&self) -> SubscriberId {
        self.id
    }

    fn subscriber_methods(self: Arc<Self>) -> Vec<SubscriberMethod> {
        vec![SubscriberMethod::dynamic(
            "audit",
            EventType::of::<DownloadEvent>(),
            move |e: &dyn Event| {
                Counters::bump(&self.counters.audited);
                debug!("📜 Audit: {:?}", e);
                if e.downcast_ref::<DownloadFinished>().is_some_and(|f| f.quiet) {
                    self.bus.cancel_event_delivery(e)?;
                    Counters::bump(&self.counters.canceled);
                    info!("🤫 Quiet download, remaining deliveries canceled");
                }
                Ok(())
            },
        )
        .with_priority(10)]
    }
}

pub struct FlakyPlugin {
    id: SubscriberId,
}

impl Subscriber for FlakyPlugin {
    fn subscriber_id(&self) -> SubscriberId {
        self.id
    }

    fn subscriber_methods(self: Arc<Self>) -> Vec<SubscriberMethod> {
        vec![SubscriberMethod::new("flaky_progress", |e: &DownloadProgress| {
            if e.percent == 50 {
                anyhow::bail!("flaky plugin choked on download #{}", e.id);
            }
            Ok(())
        })]
    }
}

pub struct Diagnostics {
    id: SubscriberId,
    counters: Arc<Counters>,
}

impl Subscriber for Diagnostics {
    fn subscriber_id(&self) -> SubscriberId {
        self.id
    }

    fn subscriber_methods(self: Arc<Self>) -> Vec<SubscriberMethod> {
        let failures = Arc::clone(&self);
        let unmatched = self;
        vec![
            SubscriberMethod::new("on_failure", move |e: &SubscriberExceptionEvent| {
                Counters::bump(&failures.counters.failures);
                warn!("🩺 Subscriber '{}' failed: {}", e.method, e.message);
                Ok(())
            }),
            SubscriberMethod::new("on_unmatched", move |e: &NoSubscriberEvent| {
                Counters::bump(&unmatched.counters.unmatched);
                info!("🩺 Nobody handled {}", e.original_event.type_name());
                Ok(())
            }),
        ]
    }
}

pub struct StatusBar {
    id: SubscriberId,
    counters: Arc<Counters>,
}

impl Subscriber for StatusBar {
    fn subscriber_id(&self) -> SubscriberId {
        self.id
    }

    fn subscriber_methods(self: Arc<Self>) -> Vec<SubscriberMethod> {
        vec![SubscriberMethod::new("network", move |e: &NetworkState| {
            Counters::bump(&self.counters.sticky_replays);
            info!(
                "📶 Network {} via {}",
                if e.online { "online" } else { "offline" },
                e.kind
            );
            Ok(())
        })
        .with_thread_mode(ThreadMode::MainThread)
        .sticky()]
    }
}

// ============================================================================
// Scenario
// ============================================================================

/// Registered subscribers, kept to unregister them at the end.
pub struct Scenario {
    bus: EventBus,
    counters: Arc<Counters>,
    subscribers: Vec<SubscriberId>,
}

impl Scenario {
    /// Registers every subscriber except the late status bar.
    pub fn register(bus: &EventBus) -> Result<Self, EventBusError> {
        let counters = Arc::new(Counters::default());
        let mut scenario = Self {
            bus: bus.clone(),
            counters: Arc::clone(&counters),
            subscribers: Vec::new(),
        };

        scenario.add(Arc::new(DownloadScreen {
            id: SubscriberId::new(),
            counters: Arc::clone(&counters),
        }))?;
        scenario.add(Arc::new(ArchiveWorker {
            id: SubscriberId::new(),
            counters: Arc::clone(&counters),
        }))?;
        scenario.add(Arc::new(ThumbnailPool {
            id: SubscriberId::new(),
            counters: Arc::clone(&counters),
        }))?;
        scenario.add(Arc::new(AuditTrail {
            id: SubscriberId::new(),
            counters: Arc::clone(&counters),
            bus: bus.clone(),
        }))?;
        scenario.add(Arc::new(FlakyPlugin {
            id: SubscriberId::new(),
        }))?;
        scenario.add(Arc::new(Diagnostics {
            id: SubscriberId::new(),
            counters,
        }))?;

        Ok(scenario)
    }

    fn add<S: Subscriber>(&mut self, subscriber: Arc<S>) -> Result<(), EventBusError> {
        let id = self.bus.register_subscriber(subscriber)?;
        self.subscribers.push(id);
        Ok(())
    }

    pub fn counters(&self) -> &Arc<Counters> {
        &self.counters
    }

    /// Posts the downloads. Stops early once `shutdown` is initiated.
    pub fn run(
        &mut self,
        rounds: u32,
        step_delay: Duration,
        shutdown: &ShutdownState,
    ) -> Result<(), EventBusError> {
        self.bus.post_sticky(NetworkState {
            online: true,
            kind: "wifi".to_string(),
        })?;

        for id in 1..=rounds {
            if shutdown.is_shutdown_initiated() {
                info!("🛑 Scenario interrupted before download #{}", id);
                return Ok(());
            }
            info!("⬇️ Starting download #{}", id);
            for percent in [0u8, 25, 50, 75, 100] {
                self.bus.post(DownloadProgress { id, percent })?;
                std::thread::sleep(step_delay);
            }
            self.bus.post(DownloadFinished {
                id,
                bytes: u64::from(id) * 1_048_576,
                quiet: id % 2 == 0,
            })?;
            self.bus.post(Heartbeat { round: id })?;
        }

        // The sticky network state reaches a subscriber registered afterwards
        self.add(Arc::new(StatusBar {
            id: SubscriberId::new(),
            counters: Arc::clone(&self.counters),
        }))?;
        Ok(())
    }

    /// Unregisters every subscriber.
    pub fn unregister_all(&mut self) -> usize {
        self.subscribers
            .drain(..)
            .map(|id| self.bus.unregister(id))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_bus::{ChannelMainThread, EventBusStats};

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn run_scenario(bus: &EventBus, rounds: u32) -> (Scenario, EventBusStats) {
        let mut scenario = Scenario::register(bus).unwrap();
        scenario
            .run(rounds, Duration::ZERO, &ShutdownState::new())
            .unwrap();
        assert!(bus.wait_until_idle(TIMEOUT));
        let stats = bus.stats();
        (scenario, stats)
    }

    #[test]
    fn test_full_scenario_counts() {
        // No main-thread hook: main-thread subscribers run inline
        let bus = EventBus::new().unwrap();
        let (mut scenario, stats) = run_scenario(&bus, 3);

        let report = scenario.counters().report();
        assert_eq!(
            report,
            ScenarioReport {
                progress_renders: 15,
                toasts: 2,
                archived: 2,
                thumbnails: 2,
                audited: 18,
                canceled: 1,
                failures: 3,
                // Three heartbeats plus the first network state
                unmatched: 4,
                sticky_replays: 1,
            }
        );
        assert_eq!(stats.failures, 3);
        assert_eq!(stats.canceled_deliveries, 3);
        assert_eq!(stats.sticky_events, 1);
        assert_eq!(stats.no_subscriber_events, 4);

        assert_eq!(scenario.unregister_all(), 9);
        assert_eq!(bus.stats().subscriptions, 0);
        bus.shutdown();
    }

    #[test]
    fn test_scenario_without_inheritance() {
        let bus = EventBus::builder().event_inheritance(false).build().unwrap();
        let (mut scenario, _) = run_scenario(&bus, 2);

        let report = scenario.counters().report();
        // Supertype and marker subscriptions match nothing, so nothing is canceled
        assert_eq!(report.audited, 0);
        assert_eq!(report.toasts, 0);
        assert_eq!(report.canceled, 0);
        assert_eq!(report.archived, 2);
        assert_eq!(report.thumbnails, 2);
        scenario.unregister_all();
        bus.shutdown();
    }

    #[test]
    fn test_main_thread_subscribers_run_on_main_loop() {
        let (support, main_loop) = ChannelMainThread::channel();
        main_loop.bind_current_thread();
        let bus = EventBus::builder().main_thread(support).build().unwrap();

        let producer_bus = bus.clone();
        let producer = std::thread::spawn(move || {
            let mut scenario = Scenario::register(&producer_bus).unwrap();
            scenario
                .run(1, Duration::ZERO, &ShutdownState::new())
                .unwrap();
            scenario
        });
        let mut scenario = producer.join().unwrap();
        assert!(bus.wait_until_idle(TIMEOUT));

        // Nothing rendered until the main loop runs
        assert_eq!(scenario.counters().report().progress_renders, 0);
        main_loop.run_pending();
        let report = scenario.counters().report();
        assert_eq!(report.progress_renders, 5);
        assert_eq!(report.toasts, 1);
        assert_eq!(report.sticky_replays, 1);

        scenario.unregister_all();
        bus.shutdown();
    }

    #[test]
    fn test_scenario_stops_when_shutdown_initiated() {
        let bus = EventBus::new().unwrap();
        let mut scenario = Scenario::register(&bus).unwrap();
        let shutdown = ShutdownState::new();
        shutdown.initiate_shutdown();

        scenario.run(5, Duration::ZERO, &shutdown).unwrap();
        assert!(bus.wait_until_idle(TIMEOUT));
        assert_eq!(scenario.counters().report().progress_renders, 0);
        // Only the sticky network state went out
        assert_eq!(bus.stats().sticky_events, 1);
        scenario.unregister_all();
        bus.shutdown();
    }
}
