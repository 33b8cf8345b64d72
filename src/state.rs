use crate::registry::{Registry, SubscriptionToken};
use std::fmt;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Lifecycle of the realtime connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not started yet
    Idle,
    /// Handshake in progress
    Connecting,
    /// Events are flowing
    Open,
    /// Disconnected; a retry is scheduled unless the stream was stopped
    Closed,
}

impl ConnectionState {
    /// Collapsed view for consumers that only care about liveness
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    /// Whether `next` may follow `self`
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Connecting, Open)
                | (Connecting, Closed)
                | (Open, Closed)
                | (Closed, Connecting)
                | (Idle, Closed)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Publishes connection state independently of the event bus.
///
/// The current value is readable at any time; every transition is also
/// delivered synchronously to registered listeners, so no change is lost
/// even when async readers of the `watch` channel only see the latest value.
pub struct StatePublisher {
    tx: watch::Sender<ConnectionState>,
    listeners: Registry<ConnectionState>,
}

impl Default for StatePublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl StatePublisher {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectionState::Idle);
        Self {
            tx,
            listeners: Registry::new("STATE"),
        }
    }

    pub fn current(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.current().is_connected()
    }

    /// Receiver for async code (`changed()`, `wait_for()`); intermediate
    /// values may be skipped by slow readers.
    pub fn receiver(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    /// Called synchronously with every transition, in order.
    pub fn on_change<F>(&self, listener: F) -> SubscriptionToken
    where
        F: Fn(&ConnectionState) + Send + Sync + 'static,
    {
        self.listeners.subscribe(listener)
    }

    pub fn remove_listener(&self, token: &SubscriptionToken) -> bool {
        self.listeners.unsubscribe(token)
    }

    /// Record a transition and notify listeners before returning.
    pub(crate) fn transition(&self, next: ConnectionState) {
        let previous = self.tx.send_replace(next);
        if previous == next {
            return;
        }
        if !previous.can_transition_to(next) {
            warn!("[STATE] Unexpected transition {} -> {}", previous, next);
        }
        debug!("[STATE] {} -> {}", previous, next);
        self.listeners.dispatch(&next);
    }
}
