//! Error sink receiving every isolated subscriber failure.

use crate::events::{Event, SubscriberInvocationError};
use crate::subscriber::Subscription;
use tracing::error;

/// Receives subscriber failures caught at the delivery boundary.
///
/// Called on whichever thread ran the failing subscriber. Implementations must
/// not assume the main context and should return quickly.
pub trait ErrorSink: Send + Sync + 'static {
    fn on_delivery_failure(
        &self,
        subscription: &Subscription,
        event: &dyn Event,
        error: &SubscriberInvocationError,
    );
}

/// Default sink: reports failures through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn on_delivery_failure(
        &self,
        subscription: &Subscription,
        event: &dyn Event,
        error: &SubscriberInvocationError,
    ) {
        error!(
            subscription = %subscription,
            thread_mode = %subscription.thread_mode(),
            "❌ Could not dispatch event {:?}: {}",
            event,
            error
        );
    }
}

impl<F> ErrorSink for F
where
    F: Fn(&Subscription, &dyn Event, &SubscriberInvocationError) + Send + Sync + 'static,
{
    fn on_delivery_failure(
        &self,
        subscription: &Subscription,
        event: &dyn Event,
        error: &SubscriberInvocationError,
    ) {
        self(subscription, event, error)
    }
}
