use parking_lot::RwLock;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use tracing::{error, trace};

/// Callback registered with a [`Registry`]
pub type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Stable identity of a registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Removal side of a registry, erased over the listener's argument type so
/// that tokens from different registries share one type.
trait Detach: Send + Sync {
    fn detach(&self, id: SubscriberId) -> bool;
}

struct Entries<T> {
    next_id: u64,
    listeners: BTreeMap<SubscriberId, Listener<T>>,
}

impl<T: 'static> Detach for RwLock<Entries<T>> {
    fn detach(&self, id: SubscriberId) -> bool {
        self.write().listeners.remove(&id).is_some()
    }
}

/// Capability returned by `subscribe`; removes exactly one listener.
///
/// Cloning is cheap, so a listener can hold its own token and unsubscribe
/// from inside its callback. Dropping a token does not unsubscribe.
#[derive(Clone)]
pub struct SubscriptionToken {
    id: SubscriberId,
    registry: Weak<dyn Detach>,
}

impl SubscriptionToken {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Remove the listener. Idempotent: returns `true` only for the call
    /// that actually removed it.
    pub fn unsubscribe(&self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.detach(self.id),
            None => false,
        }
    }
}

impl std::fmt::Debug for SubscriptionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionToken").field("id", &self.id).finish()
    }
}

/// Outcome of one dispatch round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Listeners that returned normally
    pub delivered: usize,
    /// Listeners that panicked
    pub failed: usize,
}

/// Arena of listeners addressed by generated ids.
///
/// Dispatch iterates a snapshot copied at dispatch start, so listeners may
/// subscribe or unsubscribe (themselves or others) from inside a callback.
pub struct Registry<T> {
    entries: Arc<RwLock<Entries<T>>>,
    label: &'static str,
}

impl<T: 'static> Registry<T> {
    /// `label` tags log lines from this registry
    pub fn new(label: &'static str) -> Self {
        Self {
            entries: Arc::new(RwLock::new(Entries {
                next_id: 0,
                listeners: BTreeMap::new(),
            })),
            label,
        }
    }

    /// Register a listener. Takes effect from the next dispatch.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionToken
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = {
            let mut entries = self.entries.write();
            let id = SubscriberId(entries.next_id);
            entries.next_id += 1;
            entries.listeners.insert(id, Arc::new(listener));
            id
        };
        trace!("[{}] Subscribed listener {}", self.label, id.0);

        let entries: Arc<RwLock<Entries<T>>> = Arc::clone(&self.entries);
        let registry: Weak<dyn Detach> = Arc::downgrade(&entries) as Weak<dyn Detach>;
        SubscriptionToken { id, registry }
    }

    /// Remove a listener; no-op if already removed or if the token belongs
    /// to another registry.
    pub fn unsubscribe(&self, token: &SubscriptionToken) -> bool {
        if !std::ptr::addr_eq(token.registry.as_ptr(), Arc::as_ptr(&self.entries)) {
            return false;
        }
        let removed = self.entries.detach(token.id);
        if removed {
            trace!("[{}] Unsubscribed listener {}", self.label, token.id.0);
        }
        removed
    }

    /// Number of registered listeners
    pub fn len(&self) -> usize {
        self.entries.read().listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().listeners.is_empty()
    }

    /// Deliver `value` to every listener registered when the call began.
    ///
    /// A panicking listener is logged and counted; the remaining listeners
    /// still run.
    pub fn dispatch(&self, value: &T) -> DispatchReport {
        // Lock is released before any callback runs
        let snapshot: Vec<(SubscriberId, Listener<T>)> = self
            .entries
            .read()
            .listeners
            .iter()
            .map(|(id, listener)| (*id, Arc::clone(listener)))
            .collect();

        let mut report = DispatchReport::default();
        for (id, listener) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| listener(value))) {
                Ok(()) => report.delivered += 1,
                Err(payload) => {
                    report.failed += 1;
                    error!(
                        "[{}] Listener {} panicked: {}",
                        self.label,
                        id.0,
                        panic_message(payload.as_ref())
                    );
                }
            }
        }
        report
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}
