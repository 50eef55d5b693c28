#[cfg(test)]
mod tests {
    use crate::events::{
        DuplicateSubscription, Event, EventBusError, EventType, InvocationFailure,
        NoSubscriberError, NoSubscriberEvent, SubscriberInvocationError,
    };
    use crate::types::{SubscriberId, ThreadMode};
    use crate::{event_marker, impl_event};
    use std::sync::Arc;

    trait Lifecycle {}
    event_marker!(dyn Lifecycle);

    #[derive(Debug, Clone, PartialEq)]
    struct AppEvent {
        name: String,
    }
    impl_event!(AppEvent);

    #[derive(Debug, Clone, PartialEq)]
    struct AppStarted {
        version: u32,
    }
    impl Lifecycle for AppStarted {}
    impl_event!(AppStarted => AppEvent, dyn Lifecycle);

    #[derive(Debug)]
    struct Resumed {
        started: AppStarted,
        paused_ms: u64,
    }
    impl_event!(Resumed => AppStarted as |e| &e.started);

    #[test]
    fn test_projection_chain_views_every_concrete_supertype() {
        let resumed = Resumed {
            started: AppStarted { version: 7 },
            paused_ms: 250,
        };
        let event: &dyn Event = &resumed;

        assert_eq!(event.view_as::<Resumed>().map(|e| e.paused_ms), Some(250));
        assert_eq!(event.view_as::<AppStarted>().map(|e| e.version), Some(7));
        // AppStarted declares AppEvent without a projection
        assert!(event.view_as::<AppEvent>().is_none());
        assert!(event.project(std::any::TypeId::of::<Unrelated>()).is_none());
    }

    #[derive(Debug)]
    struct Unrelated;
    impl_event!(Unrelated);

    #[test]
    fn test_event_type_identity() {
        let started = AppStarted { version: 3 };
        assert_eq!(started.event_type(), EventType::of::<AppStarted>());
        assert_ne!(started.event_type(), EventType::of::<AppEvent>());
        assert!(started.event_type().name().ends_with("AppStarted"));
        assert_eq!(
            started.event_type().to_string(),
            std::any::type_name::<AppStarted>()
        );
    }

    #[test]
    fn test_declared_supertypes() {
        assert_eq!(
            EventType::of::<AppStarted>().supertypes(),
            vec![EventType::of::<AppEvent>(), EventType::of::<dyn Lifecycle>()]
        );
        assert!(EventType::of::<AppEvent>().supertypes().is_empty());
        assert!(EventType::of::<dyn Lifecycle>().supertypes().is_empty());
    }

    #[test]
    fn test_dyn_event_downcast() {
        let event: Arc<dyn Event> = Arc::new(AppStarted { version: 7 });
        assert!(event.is::<AppStarted>());
        assert!(!event.is::<AppEvent>());
        assert_eq!(event.downcast_ref::<AppStarted>(), Some(&AppStarted { version: 7 }));
        assert!(event.downcast_ref::<AppEvent>().is_none());
        assert!(event.type_name().ends_with("AppStarted"));
    }

    #[test]
    fn test_no_subscriber_event_wraps_original() {
        let original: Arc<dyn Event> = Arc::new(AppEvent {
            name: "boot".to_string(),
        });
        let wrapped = NoSubscriberEvent {
            original_event: Arc::clone(&original),
        };
        assert!(Arc::ptr_eq(&wrapped.original_event, &original));
        assert_eq!(wrapped.event_type(), EventType::of::<NoSubscriberEvent>());
    }

    #[test]
    fn test_duplicate_error_lists_every_rejection() {
        let subscriber = SubscriberId::new();
        let error = EventBusError::DuplicateSubscriptions(vec![
            DuplicateSubscription {
                subscriber,
                method: "on_start".into(),
                event_type: EventType::of::<AppStarted>(),
            },
            DuplicateSubscription {
                subscriber,
                method: "on_any".into(),
                event_type: EventType::of::<AppEvent>(),
            },
        ]);

        let message = error.to_string();
        assert!(message.starts_with("2 subscriber method(s) rejected"));
        assert!(message.contains("'on_start'"));
        assert!(message.contains("'on_any'"));
    }

    #[test]
    fn test_invocation_error_carries_context() {
        let error = SubscriberInvocationError {
            subscriber: SubscriberId::new(),
            method: "on_start".into(),
            thread_mode: ThreadMode::BackgroundThread,
            event_type: EventType::of::<AppStarted>(),
            cause: InvocationFailure::Failed(anyhow::anyhow!("disk unavailable")),
        };

        let message = error.to_string();
        assert!(message.contains("'on_start'"));
        assert!(message.contains("background-thread"));
        assert!(message.ends_with("disk unavailable"));
        assert!(std::error::Error::source(&error).is_some());

        let panicked = InvocationFailure::Panicked("index out of bounds".to_string());
        assert_eq!(panicked.to_string(), "panicked: index out of bounds");
    }

    #[test]
    fn test_no_subscriber_error_message() {
        let error = NoSubscriberError {
            event_type: EventType::of::<AppEvent>(),
        };
        assert!(error.to_string().starts_with("no subscribers registered for event type"));
    }

    #[test]
    fn test_cancel_errors_name_thread_mode() {
        let error = EventBusError::CancelFromThreadMode(ThreadMode::Async);
        assert!(error.to_string().ends_with("not async"));
    }
}
