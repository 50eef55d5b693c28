#[cfg(test)]
use super::*;
#[cfg(test)]
use std::sync::atomic::{AtomicUsize, Ordering};
#[cfg(test)]
use std::sync::{mpsc, Arc, Barrier, Mutex, RwLock};
#[cfg(test)]
use std::thread::{self, ThreadId};
#[cfg(test)]
use std::time::Duration;
#[cfg(test)]
use tracing::debug;

#[cfg(test)]
#[derive(Debug)]
struct Ping {
    seq: u32,
}
#[cfg(test)]
impl_event!(Ping);

#[cfg(test)]
#[derive(Debug)]
struct Chain {
    depth: u32,
}
#[cfg(test)]
impl_event!(Chain);

#[cfg(test)]
const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

#[cfg(test)]
fn test_bus() -> EventBus {
    EventBus::builder()
        .send_no_subscriber_event(false)
        .build()
        .unwrap()
}

/// Records (label, thread) for every invocation.
#[cfg(test)]
#[derive(Clone, Default)]
struct Recorder {
    calls: Arc<Mutex<Vec<(String, ThreadId)>>>,
}

#[cfg(test)]
impl Recorder {
    fn record(&self, label: impl Into<String>) {
        self.calls
            .lock()
            .unwrap()
            .push((label.into(), thread::current().id()));
    }

    fn labels(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(l, _)| l.clone()).collect()
    }

    fn threads(&self) -> Vec<ThreadId> {
        self.calls.lock().unwrap().iter().map(|(_, t)| *t).collect()
    }

    fn ping_method(&self, name: &'static str) -> SubscriberMethod {
        let recorder = self.clone();
        SubscriberMethod::new(name, move |_: &Ping| {
            recorder.record(name);
            Ok(())
        })
    }
}

#[test]
fn test_ping_priorities_run_synchronously_on_posting_thread() {
    let bus = test_bus();
    let recorder = Recorder::default();

    bus.register(
        SubscriberId::new(),
        vec![
            recorder.ping_method("B").with_priority(5),
            recorder.ping_method("A").with_priority(10),
        ],
    )
    .unwrap();

    bus.post(Ping { seq: 1 }).unwrap();

    // Both ran before post returned, A first, on this thread
    assert_eq!(recorder.labels(), vec!["A", "B"]);
    let me = thread::current().id();
    assert!(recorder.threads().iter().all(|t| *t == me));
    bus.shutdown();
}

#[test]
fn test_background_subscriber_runs_later_on_shared_worker() {
    let bus = test_bus();
    let recorder = Recorder::default();
    let gate = Arc::new(Barrier::new(2));
    let worker_gate = Arc::clone(&gate);
    let worker_recorder = recorder.clone();

    bus.register(
        SubscriberId::new(),
        vec![SubscriberMethod::new("C", move |_: &Ping| {
            worker_gate.wait();
            worker_recorder.record("C");
            Ok(())
        })
        .with_thread_mode(ThreadMode::BackgroundThread)],
    )
    .unwrap();

    // Returns while C is still blocked on the gate
    bus.post(Ping { seq: 1 }).unwrap();
    assert!(recorder.labels().is_empty());
    gate.wait();

    assert!(bus.wait_until_idle(IDLE_TIMEOUT));
    assert_eq!(recorder.labels(), vec!["C"]);
    assert_ne!(recorder.threads()[0], thread::current().id());
    bus.shutdown();
}

#[test]
fn test_background_never_concurrent_across_posting_threads() {
    let bus = test_bus();
    let running = Arc::new(AtomicUsize::new(0));
    let max_running = Arc::new(AtomicUsize::new(0));
    let order = Arc::new(Mutex::new(Vec::new()));

    let (r, m, o) = (Arc::clone(&running), Arc::clone(&max_running), Arc::clone(&order));
    bus.register(
        SubscriberId::new(),
        vec![SubscriberMethod::new("bg", move |ping: &Ping| {
            let now = r.fetch_add(1, Ordering::SeqCst) + 1;
            m.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_micros(200));
            o.lock().unwrap().push(ping.seq);
            r.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        })
        .with_thread_mode(ThreadMode::BackgroundThread)],
    )
    .unwrap();

    let posters: Vec<_> = (0..2u32)
        .map(|poster| {
            let bus = bus.clone();
            thread::spawn(move || {
                for i in 0..25 {
                    bus.post(Ping { seq: poster * 1000 + i }).unwrap();
                }
            })
        })
        .collect();
    for poster in posters {
        poster.join().unwrap();
    }

    assert!(bus.wait_until_idle(IDLE_TIMEOUT));
    assert_eq!(max_running.load(Ordering::SeqCst), 1);

    let order = order.lock().unwrap().clone();
    assert_eq!(order.len(), 50);
    for poster in 0..2u32 {
        let own: Vec<u32> = order.iter().copied().filter(|s| s / 1000 == poster).collect();
        assert_eq!(own, (0..25).map(|i| poster * 1000 + i).collect::<Vec<_>>());
    }
    bus.shutdown();
}

#[test]
fn test_async_deliveries_are_independent() {
    let bus = test_bus();
    let rendezvous = Arc::new(Barrier::new(3));
    let recorder = Recorder::default();

    let methods = ["x", "y", "z"]
        .into_iter()
        .map(|name| {
            let rendezvous = Arc::clone(&rendezvous);
            let recorder = recorder.clone();
            SubscriberMethod::new(name, move |_: &Ping| {
                // All three must run at once to get past the barrier
                rendezvous.wait();
                recorder.record(name);
                Ok(())
            })
            .with_thread_mode(ThreadMode::Async)
        })
        .collect::<Vec<_>>();
    bus.register(SubscriberId::new(), methods).unwrap();

    bus.post(Ping { seq: 1 }).unwrap();
    assert!(bus.wait_until_idle(IDLE_TIMEOUT));

    let mut labels = recorder.labels();
    labels.sort();
    assert_eq!(labels, vec!["x", "y", "z"]);
    assert!(!recorder.threads().contains(&thread::current().id()));
    bus.shutdown();
}

#[test]
fn test_failing_async_task_does_not_affect_others() {
    let bus = test_bus();
    let recorder = Recorder::default();
    let ok_recorder = recorder.clone();

    bus.register(
        SubscriberId::new(),
        vec![
            SubscriberMethod::new("boom", |_: &Ping| -> anyhow::Result<()> {
                panic!("async failure")
            })
            .with_thread_mode(ThreadMode::Async),
            SubscriberMethod::new("fine", move |_: &Ping| {
                ok_recorder.record("fine");
                Ok(())
            })
            .with_thread_mode(ThreadMode::Async),
        ],
    )
    .unwrap();

    for seq in 0..5 {
        bus.post(Ping { seq }).unwrap();
    }
    assert!(bus.wait_until_idle(IDLE_TIMEOUT));
    assert_eq!(recorder.labels().len(), 5);
    assert_eq!(bus.stats().failures, 5);
    bus.shutdown();
}

#[test]
fn test_background_runs_while_async_pool_is_saturated() {
    let bus = EventBus::builder()
        .async_max_threads(2)
        .send_no_subscriber_event(false)
        .build()
        .unwrap();
    let gate = Arc::new(RwLock::new(()));
    let closed = gate.write().unwrap();
    let started = Arc::new(AtomicUsize::new(0));
    let (background_tx, background_rx) = mpsc::channel();
    let background_tx = Mutex::new(background_tx);

    // One more blocked async subscriber than the pool allows
    let mut methods = (0..3)
        .map(|_| {
            let gate = Arc::clone(&gate);
            let started = Arc::clone(&started);
            SubscriberMethod::new("blocked", move |_: &Ping| {
                started.fetch_add(1, Ordering::SeqCst);
                drop(gate.read().unwrap());
                Ok(())
            })
            .with_thread_mode(ThreadMode::Async)
        })
        .collect::<Vec<_>>();
    methods.push(
        SubscriberMethod::new("archive", move |ping: &Ping| {
            background_tx.lock().unwrap().send(ping.seq)?;
            Ok(())
        })
        .with_thread_mode(ThreadMode::BackgroundThread),
    );
    bus.register(SubscriberId::new(), methods).unwrap();

    bus.post(Ping { seq: 11 }).unwrap();
    assert_eq!(background_rx.recv_timeout(IDLE_TIMEOUT), Ok(11));

    // Only two async deliveries may hold a thread while the gate is closed
    thread::sleep(Duration::from_millis(50));
    assert!(started.load(Ordering::SeqCst) <= 2);
    assert_eq!(bus.stats().async_in_flight, 3);

    drop(closed);
    assert!(bus.wait_until_idle(IDLE_TIMEOUT));
    assert_eq!(started.load(Ordering::SeqCst), 3);
    assert_eq!(bus.stats().failures, 0);
    bus.shutdown();
}

#[test]
fn test_reentrant_posts_are_breadth_first_with_flat_stack() {
    let bus = test_bus();
    let order = Arc::new(Mutex::new(Vec::new()));
    let max_stack_depth = Arc::new(AtomicUsize::new(0));
    let active = Arc::new(AtomicUsize::new(0));

    let handler_bus = bus.clone();
    let (o, m, a) = (Arc::clone(&order), Arc::clone(&max_stack_depth), Arc::clone(&active));
    bus.register(
        SubscriberId::new(),
        vec![SubscriberMethod::new("chain", move |chain: &Chain| {
            let nesting = a.fetch_add(1, Ordering::SeqCst) + 1;
            m.fetch_max(nesting, Ordering::SeqCst);
            o.lock().unwrap().push(format!("start {}", chain.depth));
            if chain.depth < 200 {
                handler_bus.post(Chain {
                    depth: chain.depth + 1,
                })?;
            }
            o.lock().unwrap().push(format!("end {}", chain.depth));
            a.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        })],
    )
    .unwrap();

    bus.post(Chain { depth: 0 }).unwrap();

    // Each nested post ran after its poster returned, never inside it
    assert_eq!(max_stack_depth.load(Ordering::SeqCst), 1);
    let order = order.lock().unwrap().clone();
    assert_eq!(order.len(), 402);
    assert_eq!(order[0], "start 0");
    assert_eq!(order[1], "end 0");
    assert_eq!(order[2], "start 1");
    assert_eq!(order[401], "end 200");
    bus.shutdown();
}

#[test]
fn test_reentrant_fan_out_keeps_priority_per_post() {
    let bus = test_bus();
    let recorder = Recorder::default();
    let handler_bus = bus.clone();
    let first = recorder.clone();

    bus.register(
        SubscriberId::new(),
        vec![
            SubscriberMethod::new("high", move |ping: &Ping| {
                first.record(format!("high {}", ping.seq));
                if ping.seq == 0 {
                    handler_bus.post(Ping { seq: 1 })?;
                }
                Ok(())
            })
            .with_priority(1),
            {
                let low = recorder.clone();
                SubscriberMethod::new("low", move |ping: &Ping| {
                    low.record(format!("low {}", ping.seq));
                    Ok(())
                })
            },
        ],
    )
    .unwrap();

    bus.post(Ping { seq: 0 }).unwrap();
    assert_eq!(
        recorder.labels(),
        vec!["high 0", "low 0", "high 1", "low 1"]
    );
    bus.shutdown();
}

#[test]
fn test_main_thread_deliveries_drain_on_main_loop() {
    let (support, main_loop) = ChannelMainThread::channel();
    let bus = EventBus::builder()
        .main_thread(support.clone())
        .send_no_subscriber_event(false)
        .build()
        .unwrap();
    let recorder = Recorder::default();
    let main_recorder = recorder.clone();

    bus.register(
        SubscriberId::new(),
        vec![SubscriberMethod::new("ui", move |ping: &Ping| {
            main_recorder.record(format!("ui {}", ping.seq));
            Ok(())
        })
        .with_thread_mode(ThreadMode::MainThread)],
    )
    .unwrap();

    let main = thread::spawn(move || {
        let id = thread::current().id();
        main_loop.run();
        id
    });

    // Post from two worker threads; the main loop thread delivers everything
    let posters: Vec<_> = (0..2u32)
        .map(|poster| {
            let bus = bus.clone();
            thread::spawn(move || {
                for i in 0..5 {
                    bus.post(Ping { seq: poster * 10 + i }).unwrap();
                }
            })
        })
        .collect();
    for poster in posters {
        poster.join().unwrap();
    }

    // Wait until every queued unit has been drained, then stop the loop
    let deadline = std::time::Instant::now() + IDLE_TIMEOUT;
    while recorder.labels().len() < 10 && std::time::Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    support.request_stop();
    let main_id = main.join().unwrap();

    assert_eq!(recorder.labels().len(), 10);
    assert!(recorder.threads().iter().all(|t| *t == main_id));
    for poster in 0..2u32 {
        let own: Vec<String> = recorder
            .labels()
            .into_iter()
            .filter(|l| {
                l.trim_start_matches("ui ")
                    .parse::<u32>()
                    .map(|s| s / 10 == poster)
                    .unwrap_or(false)
            })
            .collect();
        let expected: Vec<String> = (0..5).map(|i| format!("ui {}", poster * 10 + i)).collect();
        assert_eq!(own, expected);
    }
    bus.shutdown();
}

#[test]
fn test_main_thread_post_delivers_immediately() {
    let (support, main_loop) = ChannelMainThread::channel();
    main_loop.bind_current_thread();
    let bus = EventBus::builder()
        .main_thread(support)
        .send_no_subscriber_event(false)
        .build()
        .unwrap();
    let recorder = Recorder::default();

    bus.register(
        SubscriberId::new(),
        vec![recorder
            .ping_method("ui")
            .with_thread_mode(ThreadMode::MainThread)],
    )
    .unwrap();

    bus.post(Ping { seq: 1 }).unwrap();
    assert_eq!(recorder.labels(), vec!["ui"]);
    assert_eq!(main_loop.run_pending(), 0);
    bus.shutdown();
}

#[test]
fn test_unregister_drops_queued_background_units() {
    let bus = test_bus();
    let recorder = Recorder::default();
    let gate = Arc::new(Barrier::new(2));
    let worker_gate = Arc::clone(&gate);
    let owner = SubscriberId::new();

    // The blocker holds the worker while units for the victim queue up
    bus.register(
        SubscriberId::new(),
        vec![SubscriberMethod::new("blocker", move |ping: &Ping| {
            if ping.seq == 0 {
                worker_gate.wait();
            }
            Ok(())
        })
        .with_thread_mode(ThreadMode::BackgroundThread)
        .with_priority(1)],
    )
    .unwrap();
    bus.register(
        owner,
        vec![recorder
            .ping_method("victim")
            .with_thread_mode(ThreadMode::BackgroundThread)],
    )
    .unwrap();

    bus.post(Ping { seq: 0 }).unwrap();
    bus.post(Ping { seq: 1 }).unwrap();
    assert_eq!(bus.unregister(owner), 1);
    gate.wait();

    assert!(bus.wait_until_idle(IDLE_TIMEOUT));
    bus.post(Ping { seq: 2 }).unwrap();
    assert!(bus.wait_until_idle(IDLE_TIMEOUT));

    assert!(recorder.labels().is_empty());
    bus.shutdown();
}

#[test]
fn test_concurrent_register_unregister_and_post() {
    let bus = test_bus();
    let delivered = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let bus = bus.clone();
            let delivered = Arc::clone(&delivered);
            thread::spawn(move || {
                for seq in 0..50 {
                    let owner = SubscriberId::new();
                    let counter = Arc::clone(&delivered);
                    bus.register(
                        owner,
                        vec![SubscriberMethod::new("count", move |_: &Ping| {
                            counter.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        })],
                    )
                    .unwrap();
                    bus.post(Ping { seq }).unwrap();
                    bus.unregister(owner);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    // Every post saw at least its own subscription
    assert!(delivered.load(Ordering::SeqCst) >= 200);
    assert_eq!(bus.stats().subscriptions, 0);
    debug!("delivered {} pings", delivered.load(Ordering::SeqCst));
    bus.shutdown();
}

#[test]
fn test_sticky_registration_routes_through_thread_mode() {
    let bus = test_bus();
    let recorder = Recorder::default();
    bus.post_sticky(Ping { seq: 42 }).unwrap();

    bus.register(
        SubscriberId::new(),
        vec![recorder
            .ping_method("late")
            .with_thread_mode(ThreadMode::BackgroundThread)
            .sticky()],
    )
    .unwrap();

    assert!(bus.wait_until_idle(IDLE_TIMEOUT));
    assert_eq!(recorder.labels(), vec!["late"]);
    assert_ne!(recorder.threads()[0], thread::current().id());
    bus.shutdown();
}

#[test]
fn test_sticky_registration_from_inside_a_subscriber() {
    let bus = test_bus();
    let recorder = Recorder::default();
    bus.post_sticky(Chain { depth: 7 }).unwrap();

    let registering_bus = bus.clone();
    let outer = recorder.clone();
    let inner = recorder.clone();
    bus.register(
        SubscriberId::new(),
        vec![SubscriberMethod::new("register_late", move |_: &Ping| {
            let inner = inner.clone();
            registering_bus.register(
                SubscriberId::new(),
                vec![SubscriberMethod::new("sticky_chain", move |chain: &Chain| {
                    inner.record(format!("chain {}", chain.depth));
                    Ok(())
                })
                .sticky()],
            )?;
            outer.record("registered");
            Ok(())
        })],
    )
    .unwrap();

    bus.post(Ping { seq: 0 }).unwrap();
    // The sticky replay is queued behind the running subscriber
    assert_eq!(recorder.labels(), vec!["registered", "chain 7"]);
    bus.shutdown();
}

#[test]
fn test_external_runtime_handle() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .unwrap();
    let bus = EventBus::builder()
        .runtime_handle(runtime.handle().clone())
        .send_no_subscriber_event(false)
        .build()
        .unwrap();
    let recorder = Recorder::default();

    bus.register(
        SubscriberId::new(),
        vec![recorder
            .ping_method("pooled")
            .with_thread_mode(ThreadMode::Async)],
    )
    .unwrap();
    bus.post(Ping { seq: 3 }).unwrap();

    assert!(bus.wait_until_idle(IDLE_TIMEOUT));
    assert_eq!(recorder.labels(), vec!["pooled"]);

    // The host's runtime outlives the bus
    bus.shutdown();
    let still_running = runtime.block_on(async { 1 + 1 });
    assert_eq!(still_running, 2);
}

#[test]
fn test_shutdown_waits_for_background_work() {
    let bus = test_bus();
    let recorder = Recorder::default();
    let slow = recorder.clone();

    bus.register(
        SubscriberId::new(),
        vec![SubscriberMethod::new("slow", move |ping: &Ping| {
            thread::sleep(Duration::from_millis(20));
            slow.record(format!("done {}", ping.seq));
            Ok(())
        })
        .with_thread_mode(ThreadMode::BackgroundThread)],
    )
    .unwrap();

    for seq in 0..3 {
        bus.post(Ping { seq }).unwrap();
    }
    bus.shutdown();

    assert_eq!(recorder.labels(), vec!["done 0", "done 1", "done 2"]);
    assert!(matches!(
        bus.post(Ping { seq: 9 }),
        Err(EventBusError::ShutDown)
    ));
}
