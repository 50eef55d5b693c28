/// Subscriber registration methods
use super::core::EventBus;
use crate::delivery::DeliveryUnit;
use crate::events::EventBusError;
use crate::subscriber::{Subscriber, SubscriberMethod};
use crate::types::SubscriberId;
use crate::utils::lock;
use std::sync::Arc;
use tracing::{debug, info, warn};

impl EventBus {
    /// Registers subscriber methods under `subscriber`.
    ///
    /// Each descriptor whose `(subscriber, name, event type)` triple is
    /// already registered is rejected; every other descriptor of the batch is
    /// still registered, and the rejected ones are reported together in
    /// [`EventBusError::DuplicateSubscriptions`].
    ///
    /// Sticky descriptors immediately receive the cached sticky events their
    /// type accepts, through their normal thread mode. For `PostThread`
    /// descriptors this happens before `register` returns.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use event_bus::{impl_event, EventBus, SubscriberId, SubscriberMethod, ThreadMode};
    ///
    /// #[derive(Debug)]
    /// struct Temperature(f32);
    /// impl_event!(Temperature);
    ///
    /// let bus = EventBus::new()?;
    /// let owner = SubscriberId::new();
    /// bus.register(owner, vec![
    ///     SubscriberMethod::new("log", |t: &Temperature| {
    ///         println!("{}°C", t.0);
    ///         Ok(())
    ///     })
    ///     .with_thread_mode(ThreadMode::BackgroundThread),
    /// ])?;
    ///
    /// assert!(bus.is_registered(owner));
    /// bus.shutdown();
    /// # Ok::<(), event_bus::EventBusError>(())
    /// ```
    pub fn register(
        &self,
        subscriber: SubscriberId,
        methods: impl IntoIterator<Item = SubscriberMethod>,
    ) -> Result<(), EventBusError> {
        let inner = &self.inner;
        if inner.shutdown.is_shutdown_initiated() {
            return Err(EventBusError::ShutDown);
        }

        let mut registered = 0usize;
        let mut duplicates = Vec::new();
        let mut sticky_units = Vec::new();
        {
            let mut registry = lock(&inner.registry);
            for method in methods {
                match registry.index.insert(subscriber, method) {
                    Ok(subscription) => {
                        registered += 1;
                        if !subscription.is_sticky() {
                            continue;
                        }
                        let cached = registry.sticky.matching(
                            subscription.event_type(),
                            inner.config.event_inheritance,
                            &inner.type_cache,
                        );
                        for event in cached {
                            sticky_units.push(DeliveryUnit {
                                event,
                                subscription: Arc::clone(&subscription),
                                post_id: inner.next_post_id(),
                            });
                        }
                    }
                    Err(duplicate) => {
                        warn!("⚠️ Rejected duplicate subscription: {}", duplicate);
                        duplicates.push(duplicate);
                    }
                }
            }
        }

        if registered > 0 {
            info!("📝 Registered {} subscriber method(s) for {}", registered, subscriber);
        }
        if !sticky_units.is_empty() {
            debug!(
                "📌 Delivering {} sticky event(s) to {}",
                sticky_units.len(),
                subscriber
            );
            inner.enqueue_and_drain(sticky_units);
        }

        if duplicates.is_empty() {
            Ok(())
        } else {
            Err(EventBusError::DuplicateSubscriptions(duplicates))
        }
    }

    /// Registers every method an object provides, returning its identity.
    pub fn register_subscriber<S: Subscriber>(
        &self,
        subscriber: Arc<S>,
    ) -> Result<SubscriberId, EventBusError> {
        let id = subscriber.subscriber_id();
        self.register(id, subscriber.subscriber_methods())?;
        Ok(id)
    }

    /// Removes every subscription of `subscriber` and returns how many were
    /// removed.
    ///
    /// Unknown subscribers are a no-op. Once this returns, no new delivery to
    /// the removed subscriptions starts, including units already queued on a
    /// deliverer; an invocation already running is allowed to finish.
    pub fn unregister(&self, subscriber: SubscriberId) -> usize {
        let removed = lock(&self.inner.registry).index.remove_subscriber(subscriber);
        if removed.is_empty() {
            debug!("Subscriber {} was not registered", subscriber);
        } else {
            info!(
                "🗑️ Unregistered {} subscriber method(s) of {}",
                removed.len(),
                subscriber
            );
        }
        removed.len()
    }

    /// Unregisters an object registered with
    /// [`register_subscriber`](Self::register_subscriber).
    pub fn unregister_subscriber<S: Subscriber>(&self, subscriber: &S) -> usize {
        self.unregister(subscriber.subscriber_id())
    }
}
