use crate::client::RealtimeClient;
use crate::event::Event;
use crate::registry::SubscriptionToken;
use crate::transport::Connector;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Items kept by the dashboard's live feed
pub const DEFAULT_FEED_CAPACITY: usize = 10;

/// Bounded, newest-first list of recent events.
///
/// Cloning shares the underlying buffer, so one clone can be attached to a
/// client while another is read from a render loop.
#[derive(Debug, Clone)]
pub struct RecentEvents {
    items: Arc<Mutex<VecDeque<Event>>>,
    capacity: usize,
}

impl Default for RecentEvents {
    fn default() -> Self {
        Self::new(DEFAULT_FEED_CAPACITY)
    }
}

impl RecentEvents {
    /// A capacity of zero is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Subscribe this feed to a client's events
    pub fn attach<C: Connector>(&self, client: &RealtimeClient<C>) -> SubscriptionToken {
        let feed = self.clone();
        client.subscribe(move |event| feed.push(event.clone()))
    }

    /// Insert at the front, evicting the oldest entry when full
    pub fn push(&self, event: Event) {
        let mut items = self.items.lock();
        items.push_front(event);
        items.truncate(self.capacity);
    }

    /// Newest first
    pub fn snapshot(&self) -> Vec<Event> {
        self.items.lock().iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<Event> {
        self.items.lock().front().cloned()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        self.items.lock().clear();
    }
}
