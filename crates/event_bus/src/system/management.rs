/// Sticky cache management and registry queries
use super::core::EventBus;
use crate::events::{Event, EventKind, EventType};
use crate::types::SubscriberId;
use crate::utils::lock;
use std::sync::Arc;
use tracing::debug;

impl EventBus {
    /// The sticky value of the concrete type `T`, if any.
    ///
    /// ```rust
    /// use event_bus::{impl_event, EventBus};
    ///
    /// #[derive(Debug)]
    /// struct Location { lat: f64, lon: f64 }
    /// impl_event!(Location);
    ///
    /// let bus = EventBus::new()?;
    /// bus.post_sticky(Location { lat: 52.5, lon: 13.4 })?;
    ///
    /// let cached = bus.get_sticky_event::<Location>().unwrap();
    /// assert_eq!(cached.downcast_ref::<Location>().unwrap().lat, 52.5);
    /// bus.shutdown();
    /// # Ok::<(), event_bus::EventBusError>(())
    /// ```
    pub fn get_sticky_event<T: Event + EventKind>(&self) -> Option<Arc<dyn Event>> {
        self.get_sticky(EventType::of::<T>())
    }

    pub fn get_sticky(&self, event_type: EventType) -> Option<Arc<dyn Event>> {
        lock(&self.inner.registry).sticky.get(event_type)
    }

    /// Removes and returns the sticky value of the concrete type `T`.
    pub fn remove_sticky_event<T: Event + EventKind>(&self) -> Option<Arc<dyn Event>> {
        self.remove_sticky(EventType::of::<T>())
    }

    /// Removes and returns the sticky value of `event_type`.
    pub fn remove_sticky(&self, event_type: EventType) -> Option<Arc<dyn Event>> {
        let removed = lock(&self.inner.registry).sticky.remove(event_type);
        if removed.is_some() {
            debug!("📌 Removed sticky {}", event_type);
        }
        removed
    }

    /// Removes `event` from the sticky cache only if it is still the cached
    /// value of its type (it has not been replaced since).
    pub fn remove_sticky_instance(&self, event: &Arc<dyn Event>) -> bool {
        lock(&self.inner.registry).sticky.remove_if_same(event)
    }

    /// Empties the sticky cache, returning how many events were dropped.
    pub fn clear_all_sticky_events(&self) -> usize {
        let cleared = lock(&self.inner.registry).sticky.clear();
        debug!("📌 Cleared {} sticky event(s)", cleared);
        cleared
    }

    /// True if `subscriber` has at least one subscription.
    pub fn is_registered(&self, subscriber: SubscriberId) -> bool {
        lock(&self.inner.registry).index.contains_subscriber(subscriber)
    }

    /// True if posting an event of `event_type` would reach a subscription,
    /// taking supertypes into account when inheritance is enabled.
    pub fn has_subscriber_for_event(&self, event_type: EventType) -> bool {
        let types = self
            .inner
            .type_cache
            .compatible_types(event_type, self.inner.config.event_inheritance);
        lock(&self.inner.registry).index.has_any(&types)
    }
}
