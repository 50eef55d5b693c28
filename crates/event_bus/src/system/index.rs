/// Subscriber index: accepted event type -> priority-ordered subscriptions
use crate::events::{DuplicateSubscription, EventType};
use crate::subscriber::{SubscriberMethod, Subscription};
use crate::types::SubscriberId;
use std::collections::HashMap;
use std::sync::Arc;

/// Registration state of a bus.
///
/// Per accepted event type, subscriptions are kept sorted by descending
/// priority; equal priorities stay in registration order. The reverse map
/// lets unregistration touch only the lists a subscriber appears in.
#[derive(Debug, Default)]
pub(crate) struct SubscriberIndex {
    by_event_type: HashMap<EventType, Vec<Arc<Subscription>>>,
    types_by_subscriber: HashMap<SubscriberId, Vec<EventType>>,
    next_sequence: u64,
}

impl SubscriberIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts one subscription, rejecting an already registered
    /// `(subscriber, method name, event type)` triple.
    pub fn insert(
        &mut self,
        subscriber: SubscriberId,
        method: SubscriberMethod,
    ) -> Result<Arc<Subscription>, DuplicateSubscription> {
        let event_type = method.event_type();
        let list = self.by_event_type.entry(event_type).or_default();

        if list
            .iter()
            .any(|s| s.subscriber() == subscriber && s.method_name() == method.name())
        {
            return Err(DuplicateSubscription {
                subscriber,
                method: method.name().into(),
                event_type,
            });
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let subscription = Arc::new(Subscription::new(subscriber, method, sequence));

        // Insert before the first strictly lower priority so ties keep registration order
        let position = list
            .iter()
            .position(|s| s.priority() < subscription.priority())
            .unwrap_or(list.len());
        list.insert(position, Arc::clone(&subscription));

        let types = self.types_by_subscriber.entry(subscriber).or_default();
        if !types.contains(&event_type) {
            types.push(event_type);
        }

        Ok(subscription)
    }

    /// Removes and deactivates every subscription of `subscriber`.
    pub fn remove_subscriber(&mut self, subscriber: SubscriberId) -> Vec<Arc<Subscription>> {
        let Some(types) = self.types_by_subscriber.remove(&subscriber) else {
            return Vec::new();
        };

        let mut removed = Vec::new();
        for event_type in types {
            if let Some(list) = self.by_event_type.get_mut(&event_type) {
                list.retain(|s| {
                    if s.subscriber() == subscriber {
                        s.deactivate();
                        removed.push(Arc::clone(s));
                        false
                    } else {
                        true
                    }
                });
                if list.is_empty() {
                    self.by_event_type.remove(&event_type);
                }
            }
        }
        removed
    }

    /// Snapshot of the subscriptions accepting any of `event_types`, in
    /// delivery order: priority descending, then registration order.
    pub fn resolve(&self, event_types: &[EventType]) -> Vec<Arc<Subscription>> {
        match event_types {
            [single] => self.by_event_type.get(single).cloned().unwrap_or_default(),
            _ => {
                let mut merged: Vec<Arc<Subscription>> = event_types
                    .iter()
                    .filter_map(|ty| self.by_event_type.get(ty))
                    .flat_map(|list| list.iter().cloned())
                    .collect();
                merged.sort_by(|a, b| {
                    b.priority()
                        .cmp(&a.priority())
                        .then_with(|| a.sequence().cmp(&b.sequence()))
                });
                merged
            }
        }
    }

    pub fn contains_subscriber(&self, subscriber: SubscriberId) -> bool {
        self.types_by_subscriber.contains_key(&subscriber)
    }

    /// True if any of `event_types` has at least one subscription.
    pub fn has_any(&self, event_types: &[EventType]) -> bool {
        event_types.iter().any(|ty| self.by_event_type.contains_key(ty))
    }

    /// Total number of registered subscriptions.
    pub fn len(&self) -> usize {
        self.by_event_type.values().map(Vec::len).sum()
    }

    pub fn subscriber_count(&self) -> usize {
        self.types_by_subscriber.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impl_event;

    #[derive(Debug)]
    struct Tick;
    impl_event!(Tick);

    #[derive(Debug)]
    struct Tock;
    impl_event!(Tock);

    fn method(name: &str, priority: i32) -> SubscriberMethod {
        SubscriberMethod::new(name.to_string(), |_: &Tick| Ok(())).with_priority(priority)
    }

    fn names(subscriptions: &[Arc<Subscription>]) -> Vec<String> {
        subscriptions.iter().map(|s| s.method_name().to_string()).collect()
    }

    #[test]
    fn test_priority_descending_with_stable_ties() {
        let mut index = SubscriberIndex::new();
        let owner = SubscriberId::new();
        index.insert(owner, method("low", 0)).unwrap();
        index.insert(owner, method("high", 5)).unwrap();
        index.insert(owner, method("low_2", 0)).unwrap();
        index.insert(owner, method("mid", 1)).unwrap();

        let resolved = index.resolve(&[EventType::of::<Tick>()]);
        assert_eq!(names(&resolved), vec!["high", "mid", "low", "low_2"]);
    }

    #[test]
    fn test_duplicate_triple_is_rejected() {
        let mut index = SubscriberIndex::new();
        let owner = SubscriberId::new();
        index.insert(owner, method("on_tick", 0)).unwrap();

        let duplicate = index.insert(owner, method("on_tick", 3)).unwrap_err();
        assert_eq!(duplicate.subscriber, owner);
        assert_eq!(duplicate.method, "on_tick");
        assert_eq!(index.len(), 1);

        // Same name under another owner is a different subscription
        index.insert(SubscriberId::new(), method("on_tick", 0)).unwrap();
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_remove_subscriber_deactivates() {
        let mut index = SubscriberIndex::new();
        let owner = SubscriberId::new();
        let other = SubscriberId::new();
        let kept = index.insert(other, method("other", 0)).unwrap();
        index.insert(owner, method("a", 0)).unwrap();
        index
            .insert(owner, SubscriberMethod::new("b", |_: &Tock| Ok(())))
            .unwrap();

        let removed = index.remove_subscriber(owner);
        assert_eq!(removed.len(), 2);
        assert!(removed.iter().all(|s| !s.is_active()));
        assert!(kept.is_active());
        assert!(!index.contains_subscriber(owner));
        assert!(!index.has_any(&[EventType::of::<Tock>()]));
        assert!(index.remove_subscriber(owner).is_empty());
    }

    #[test]
    fn test_resolve_merges_across_types() {
        let mut index = SubscriberIndex::new();
        let owner = SubscriberId::new();
        index
            .insert(owner, SubscriberMethod::new("tock_low", |_: &Tock| Ok(())))
            .unwrap();
        index.insert(owner, method("tick_low", 0)).unwrap();
        index
            .insert(
                owner,
                SubscriberMethod::new("tock_high", |_: &Tock| Ok(())).with_priority(9),
            )
            .unwrap();

        let resolved = index.resolve(&[EventType::of::<Tick>(), EventType::of::<Tock>()]);
        assert_eq!(names(&resolved), vec!["tock_high", "tock_low", "tick_low"]);
        assert_eq!(index.subscriber_count(), 1);
    }
}
