/// Memoized event type closures used for supertype matching
use crate::events::EventType;
use dashmap::DashMap;
use smallvec::SmallVec;
use std::collections::HashSet;
use std::sync::Arc;

/// Caches, per concrete event type, every type a subscriber may accept it as.
///
/// The closure of a type is the type itself followed by its transitive
/// supertypes in breadth-first order, without duplicates. Hierarchies are
/// static, so entries never need invalidation and the cache only grows with
/// the number of distinct posted types.
#[derive(Debug, Default)]
pub(crate) struct TypeClosureCache {
    closures: DashMap<EventType, Arc<[EventType]>>,
}

impl TypeClosureCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the types `event_type` is compatible with, exact type first.
    ///
    /// With `inheritance` disabled only the exact type is returned and nothing
    /// is cached.
    pub fn compatible_types(&self, event_type: EventType, inheritance: bool) -> Arc<[EventType]> {
        if !inheritance {
            return Arc::from(vec![event_type]);
        }
        if let Some(cached) = self.closures.get(&event_type) {
            return Arc::clone(cached.value());
        }

        let closure: Arc<[EventType]> = Arc::from(compute_closure(event_type));
        // Two racing threads compute the same closure; keep whichever landed first
        let entry = self.closures.entry(event_type).or_insert(closure);
        Arc::clone(entry.value())
    }

    /// Returns true if `candidate` appears in the closure of `event_type`.
    pub fn is_compatible(&self, event_type: EventType, candidate: EventType, inheritance: bool) -> bool {
        if event_type == candidate {
            return true;
        }
        inheritance
            && self
                .compatible_types(event_type, true)
                .iter()
                .any(|ty| *ty == candidate)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.closures.len()
    }
}

fn compute_closure(event_type: EventType) -> Vec<EventType> {
    let mut seen: HashSet<EventType> = HashSet::new();
    let mut ordered = Vec::new();
    let mut frontier: SmallVec<[EventType; 8]> = SmallVec::new();

    seen.insert(event_type);
    ordered.push(event_type);
    frontier.push(event_type);

    while !frontier.is_empty() {
        let mut next: SmallVec<[EventType; 8]> = SmallVec::new();
        for ty in frontier.drain(..) {
            for parent in ty.supertypes() {
                if seen.insert(parent) {
                    ordered.push(parent);
                    next.push(parent);
                }
            }
        }
        frontier = next;
    }

    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{event_marker, impl_event};

    trait Shape {}
    trait Named {}
    event_marker!(dyn Named);
    event_marker!(dyn Shape => dyn Named);

    #[derive(Debug)]
    struct Base;
    impl_event!(Base => dyn Named);

    #[derive(Debug)]
    struct Square;
    impl Shape for Square {}
    impl Named for Square {}
    impl_event!(Square => Base, dyn Shape);

    #[test]
    fn test_closure_is_breadth_first_and_deduplicated() {
        let cache = TypeClosureCache::new();
        let closure = cache.compatible_types(EventType::of::<Square>(), true);
        assert_eq!(
            &closure[..],
            &[
                EventType::of::<Square>(),
                EventType::of::<Base>(),
                EventType::of::<dyn Shape>(),
                EventType::of::<dyn Named>(),
            ]
        );
    }

    #[test]
    fn test_closure_is_memoized() {
        let cache = TypeClosureCache::new();
        let first = cache.compatible_types(EventType::of::<Square>(), true);
        let second = cache.compatible_types(EventType::of::<Square>(), true);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_without_inheritance_only_exact_type() {
        let cache = TypeClosureCache::new();
        let closure = cache.compatible_types(EventType::of::<Square>(), false);
        assert_eq!(&closure[..], &[EventType::of::<Square>()]);
        assert_eq!(cache.len(), 0);

        assert!(cache.is_compatible(EventType::of::<Square>(), EventType::of::<Square>(), false));
        assert!(!cache.is_compatible(EventType::of::<Square>(), EventType::of::<Base>(), false));
        assert!(cache.is_compatible(EventType::of::<Square>(), EventType::of::<dyn Named>(), true));
    }
}
