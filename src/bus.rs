use crate::event::Event;
use crate::metrics::Metrics;
use crate::registry::{DispatchReport, Registry, SubscriptionToken};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::trace;

/// Fans normalized events out to subscribers.
///
/// Subscribers never see the connection; they only receive events that
/// arrive after they subscribed. Events with no subscribers are dropped,
/// there is no backlog.
pub struct EventBus {
    registry: Registry<Event>,
    last_event: RwLock<Option<Arc<Event>>>,
    metrics: Arc<Metrics>,
}

impl EventBus {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            registry: Registry::new("BUS"),
            last_event: RwLock::new(None),
            metrics,
        }
    }

    /// Register an event handler; it receives every event dispatched after
    /// this call returns.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionToken
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.registry.subscribe(handler)
    }

    /// Remove a handler. Calling it again is a no-op.
    pub fn unsubscribe(&self, token: &SubscriptionToken) -> bool {
        self.registry.unsubscribe(token)
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.len()
    }

    /// Most recently dispatched event, if any
    pub fn last_event(&self) -> Option<Arc<Event>> {
        self.last_event.read().clone()
    }

    /// Deliver one event to the current subscriber snapshot.
    pub fn dispatch(&self, event: Event) -> DispatchReport {
        let event = Arc::new(event);
        *self.last_event.write() = Some(Arc::clone(&event));

        let report = self.registry.dispatch(&event);
        self.metrics.record_event_dispatched();
        if report.failed > 0 {
            self.metrics.record_handler_failures(report.failed as u64);
        }
        trace!(
            "[BUS] Dispatched {} ({}) to {} subscribers",
            event.id,
            event.kind,
            report.delivered + report.failed
        );
        report
    }
}
