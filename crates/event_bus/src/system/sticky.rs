/// Sticky event cache: latest posted value per concrete event type
use super::cache::TypeClosureCache;
use crate::events::{Event, EventType};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug)]
struct StickyEntry {
    event: Arc<dyn Event>,
    sequence: u64,
}

/// Holds the most recent sticky event of each concrete type.
///
/// The sequence number records insertion order so that a registering sticky
/// subscriber receives matching events oldest first.
#[derive(Debug, Default)]
pub(crate) struct StickyCache {
    entries: HashMap<EventType, StickyEntry>,
    next_sequence: u64,
}

impl StickyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `event`, replacing (and returning) any previous value of the
    /// same concrete type.
    pub fn insert(&mut self, event: Arc<dyn Event>) -> Option<Arc<dyn Event>> {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.entries
            .insert(event.event_type(), StickyEntry { event, sequence })
            .map(|previous| previous.event)
    }

    pub fn get(&self, event_type: EventType) -> Option<Arc<dyn Event>> {
        self.entries.get(&event_type).map(|e| Arc::clone(&e.event))
    }

    pub fn remove(&mut self, event_type: EventType) -> Option<Arc<dyn Event>> {
        self.entries.remove(&event_type).map(|e| e.event)
    }

    /// Removes the cached value of the event's type only if it is this very
    /// event instance.
    pub fn remove_if_same(&mut self, event: &Arc<dyn Event>) -> bool {
        let event_type = event.event_type();
        match self.entries.get(&event_type) {
            Some(entry) if Arc::ptr_eq(&entry.event, event) => {
                self.entries.remove(&event_type);
                true
            }
            _ => false,
        }
    }

    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Cached events a subscription accepting `accepted` would receive, oldest
    /// first.
    pub fn matching(
        &self,
        accepted: EventType,
        inheritance: bool,
        types: &TypeClosureCache,
    ) -> Vec<Arc<dyn Event>> {
        if !inheritance {
            return self.get(accepted).into_iter().collect();
        }

        let mut matches: Vec<&StickyEntry> = self
            .entries
            .iter()
            .filter(|(event_type, _)| types.is_compatible(**event_type, accepted, true))
            .map(|(_, entry)| entry)
            .collect();
        matches.sort_by_key(|entry| entry.sequence);
        matches.into_iter().map(|entry| Arc::clone(&entry.event)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{event_marker, impl_event};

    trait Status {}
    event_marker!(dyn Status);

    #[derive(Debug)]
    struct Battery(u8);
    impl Status for Battery {}
    impl_event!(Battery => dyn Status);

    #[derive(Debug)]
    struct Network(&'static str);
    impl Status for Network {}
    impl_event!(Network => dyn Status);

    #[test]
    fn test_latest_value_replaces_previous() {
        let mut cache = StickyCache::new();
        assert!(cache.insert(Arc::new(Battery(80))).is_none());
        let previous = cache.insert(Arc::new(Battery(75))).unwrap();
        assert_eq!(previous.downcast_ref::<Battery>().unwrap().0, 80);

        let current = cache.get(EventType::of::<Battery>()).unwrap();
        assert_eq!(current.downcast_ref::<Battery>().unwrap().0, 75);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_matching_follows_hierarchy_in_insertion_order() {
        let types = TypeClosureCache::new();
        let mut cache = StickyCache::new();
        cache.insert(Arc::new(Network("wifi")));
        cache.insert(Arc::new(Battery(50)));

        let matched = cache.matching(EventType::of::<dyn Status>(), true, &types);
        assert_eq!(matched.len(), 2);
        assert!(matched[0].is::<Network>());
        assert!(matched[1].is::<Battery>());

        assert!(cache
            .matching(EventType::of::<dyn Status>(), false, &types)
            .is_empty());
        assert_eq!(cache.matching(EventType::of::<Battery>(), false, &types).len(), 1);
    }

    #[test]
    fn test_remove_if_same_checks_identity() {
        let mut cache = StickyCache::new();
        let stored: Arc<dyn Event> = Arc::new(Battery(10));
        cache.insert(Arc::clone(&stored));

        let other: Arc<dyn Event> = Arc::new(Battery(10));
        assert!(!cache.remove_if_same(&other));
        assert!(cache.remove_if_same(&stored));
        assert_eq!(cache.len(), 0);
        assert!(cache.remove(EventType::of::<Battery>()).is_none());
    }
}
