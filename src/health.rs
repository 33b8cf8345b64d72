use crate::config::HealthConfig;
use tokio::time::{Duration, Instant};

/// Liveness tracking for one open connection.
///
/// Uses tokio's clock so paused-time tests drive it deterministically.
#[derive(Debug)]
pub struct HealthMonitor {
    config: HealthConfig,
    last_ping_sent: Option<Instant>,
    last_data_received: Instant,
    /// Pings in a row that got no pong
    missed_pongs: u32,
    waiting_for_pong: bool,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            last_ping_sent: None,
            // Count the handshake as data
            last_data_received: Instant::now(),
            missed_pongs: 0,
            waiting_for_pong: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn record_ping_sent(&mut self) {
        self.last_ping_sent = Some(Instant::now());
        self.waiting_for_pong = true;
    }

    pub fn record_pong_received(&mut self) {
        self.missed_pongs = 0;
        self.waiting_for_pong = false;
    }

    pub fn record_data_received(&mut self) {
        self.last_data_received = Instant::now();
    }

    /// Ping due and none outstanding
    pub fn should_send_ping(&self) -> bool {
        if !self.config.enabled || self.waiting_for_pong {
            return false;
        }
        match self.last_ping_sent {
            None => true,
            Some(last) => last.elapsed() >= self.config.ping_interval,
        }
    }

    /// Check if the outstanding pong is overdue and count the miss.
    ///
    /// Has side effects: clears the outstanding ping so the next one can be
    /// sent. Call once per check cycle.
    pub fn check_and_record_pong_timeout(&mut self) -> bool {
        if !self.waiting_for_pong {
            return false;
        }
        match self.last_ping_sent {
            Some(last) if last.elapsed() >= self.config.pong_timeout => {
                self.missed_pongs += 1;
                self.waiting_for_pong = false;
                true
            }
            _ => false,
        }
    }

    pub fn is_data_timeout(&self) -> bool {
        match self.config.data_timeout {
            Some(limit) if self.config.enabled => self.last_data_received.elapsed() >= limit,
            _ => false,
        }
    }

    pub fn is_unhealthy(&self) -> bool {
        self.missed_pongs >= self.config.failure_threshold
    }

    pub fn missed_pongs(&self) -> u32 {
        self.missed_pongs
    }

    /// How long the connection loop may sleep before the next check
    pub fn time_until_next_check(&self) -> Duration {
        let ping_or_pong = match (self.last_ping_sent, self.waiting_for_pong) {
            (None, _) => Duration::ZERO,
            (Some(last), true) => self.config.pong_timeout.saturating_sub(last.elapsed()),
            (Some(last), false) => self.config.ping_interval.saturating_sub(last.elapsed()),
        };
        match self.config.data_timeout {
            Some(limit) => ping_or_pong.min(limit.saturating_sub(self.last_data_received.elapsed())),
            None => ping_or_pong,
        }
    }
}
