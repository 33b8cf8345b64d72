use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Counters for the realtime stream
///
/// Use `snapshot()` to get a point-in-time view of all metrics, or the
/// individual getters for specific values.
///
/// # Example
/// ```ignore
/// let metrics = client.metrics();
/// println!("Events dispatched: {}", metrics.events_dispatched());
/// let snapshot = metrics.snapshot();
/// ```
#[derive(Debug, Default)]
pub struct Metrics {
    connections_total: AtomicU64,
    connect_attempts_total: AtomicU64,
    connect_failures_total: AtomicU64,
    frames_received_total: AtomicU64,
    frames_dropped_total: AtomicU64,
    events_dispatched_total: AtomicU64,
    handler_failures_total: AtomicU64,
    messages_sent_total: AtomicU64,
    sends_dropped_total: AtomicU64,
    pings_sent_total: AtomicU64,
    pongs_received_total: AtomicU64,
    health_failures_total: AtomicU64,

    uptime: RwLock<Uptime>,
}

#[derive(Debug, Default)]
struct Uptime {
    connected_at: Option<Instant>,
    total: Duration,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    // ========== Getters ==========

    /// Successful handshakes
    pub fn connections(&self) -> u64 {
        self.connections_total.load(Ordering::Relaxed)
    }

    /// Connection attempts, successful or not
    pub fn connect_attempts(&self) -> u64 {
        self.connect_attempts_total.load(Ordering::Relaxed)
    }

    pub fn connect_failures(&self) -> u64 {
        self.connect_failures_total.load(Ordering::Relaxed)
    }

    /// Data frames read from the transport (control frames excluded)
    pub fn frames_received(&self) -> u64 {
        self.frames_received_total.load(Ordering::Relaxed)
    }

    /// Data frames that did not normalize into an event
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped_total.load(Ordering::Relaxed)
    }

    pub fn events_dispatched(&self) -> u64 {
        self.events_dispatched_total.load(Ordering::Relaxed)
    }

    /// Subscriber callbacks that panicked
    pub fn handler_failures(&self) -> u64 {
        self.handler_failures_total.load(Ordering::Relaxed)
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent_total.load(Ordering::Relaxed)
    }

    /// Outbound messages discarded because the stream was not open
    pub fn sends_dropped(&self) -> u64 {
        self.sends_dropped_total.load(Ordering::Relaxed)
    }

    pub fn pings_sent(&self) -> u64 {
        self.pings_sent_total.load(Ordering::Relaxed)
    }

    pub fn pongs_received(&self) -> u64 {
        self.pongs_received_total.load(Ordering::Relaxed)
    }

    pub fn health_failures(&self) -> u64 {
        self.health_failures_total.load(Ordering::Relaxed)
    }

    /// Time spent in the open state, including the current session
    pub fn total_uptime(&self) -> Duration {
        let uptime = self.uptime.read();
        uptime.total + uptime.connected_at.map(|t| t.elapsed()).unwrap_or_default()
    }

    // ========== Recording methods (called internally) ==========

    pub(crate) fn record_connect_attempt(&self) {
        self.connect_attempts_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_connect_failure(&self) {
        self.connect_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_connected(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.uptime.write().connected_at = Some(Instant::now());
    }

    pub(crate) fn record_disconnected(&self) {
        let mut uptime = self.uptime.write();
        if let Some(connected_at) = uptime.connected_at.take() {
            uptime.total += connected_at.elapsed();
        }
    }

    pub(crate) fn record_frame_received(&self) {
        self.frames_received_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_frame_dropped(&self) {
        self.frames_dropped_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_event_dispatched(&self) {
        self.events_dispatched_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_handler_failures(&self, count: u64) {
        self.handler_failures_total.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_message_sent(&self) {
        self.messages_sent_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_send_dropped(&self) {
        self.sends_dropped_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_ping(&self) {
        self.pings_sent_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_pong(&self) {
        self.pongs_received_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_health_failure(&self) {
        self.health_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time snapshot of all metrics for export
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Acquire),
            connect_attempts_total: self.connect_attempts_total.load(Ordering::Acquire),
            connect_failures_total: self.connect_failures_total.load(Ordering::Acquire),
            frames_received_total: self.frames_received_total.load(Ordering::Acquire),
            frames_dropped_total: self.frames_dropped_total.load(Ordering::Acquire),
            events_dispatched_total: self.events_dispatched_total.load(Ordering::Acquire),
            handler_failures_total: self.handler_failures_total.load(Ordering::Acquire),
            messages_sent_total: self.messages_sent_total.load(Ordering::Acquire),
            sends_dropped_total: self.sends_dropped_total.load(Ordering::Acquire),
            pings_sent_total: self.pings_sent_total.load(Ordering::Acquire),
            pongs_received_total: self.pongs_received_total.load(Ordering::Acquire),
            health_failures_total: self.health_failures_total.load(Ordering::Acquire),
            total_uptime: self.total_uptime(),
        }
    }
}

/// A point-in-time snapshot of all metrics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connect_attempts_total: u64,
    pub connect_failures_total: u64,
    pub frames_received_total: u64,
    pub frames_dropped_total: u64,
    pub events_dispatched_total: u64,
    pub handler_failures_total: u64,
    pub messages_sent_total: u64,
    pub sends_dropped_total: u64,
    pub pings_sent_total: u64,
    pub pongs_received_total: u64,
    pub health_failures_total: u64,
    pub total_uptime: Duration,
}
