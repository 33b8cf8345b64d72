use crate::bus::EventBus;
use crate::config::{BackoffConfig, ConnectionConfig, HealthConfig};
use crate::error::Error;
use crate::health::HealthMonitor;
use crate::metrics::Metrics;
use crate::normalizer::normalize_frame;
use crate::state::{ConnectionState, StatePublisher};
use crate::transport::{Connector, Transport};
use chrono::Utc;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use url::Url;

/// Commands from the client handle to the connection task
#[derive(Debug)]
pub(crate) enum ConnectionCommand {
    /// Write a frame on the open connection
    Send(Message),
    /// Drop the current connection and go through backoff again
    Reconnect,
    /// Close and stop retrying
    Close,
}

/// What to do after an open session ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Reconnect,
    Stop,
}

/// Owns the single live transport and drives the reconnect state machine:
/// `Connecting -> Open -> Closed -> (backoff) -> Connecting ...` until told
/// to stop.
pub(crate) struct ConnectionManager<C: Connector> {
    pub(crate) connector: Arc<C>,
    pub(crate) url: Url,
    pub(crate) connection: ConnectionConfig,
    pub(crate) backoff: BackoffConfig,
    pub(crate) health: HealthConfig,
    pub(crate) bus: Arc<EventBus>,
    pub(crate) state: Arc<StatePublisher>,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) command_rx: mpsc::Receiver<ConnectionCommand>,
}

impl<C: Connector> ConnectionManager<C> {
    pub(crate) async fn run(mut self) {
        // Failed attempts since the last successful open
        let mut failures = 0u32;
        let mut is_first_connect = true;

        loop {
            if !is_first_connect {
                let delay = self.backoff.delay_for_attempt(failures);
                debug!(
                    "[STREAM] Reconnecting in {:?} (failed attempts: {})",
                    delay, failures
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = until_stopped(&mut self.command_rx, &self.metrics) => {
                        debug!("[STREAM] Stopped during backoff");
                        break;
                    }
                }
            }
            is_first_connect = false;

            self.state.transition(ConnectionState::Connecting);
            self.metrics.record_connect_attempt();

            let attempt = timeout(
                self.connection.connect_timeout,
                self.connector.connect(&self.url),
            );
            let result = tokio::select! {
                result = attempt => result.unwrap_or(Err(Error::ConnectTimeout(self.connection.connect_timeout))),
                _ = until_stopped(&mut self.command_rx, &self.metrics) => {
                    debug!("[STREAM] Stopped while connecting");
                    self.state.transition(ConnectionState::Closed);
                    break;
                }
            };

            let transport = match result {
                Ok(transport) => transport,
                Err(e) => {
                    failures = failures.saturating_add(1);
                    self.metrics.record_connect_failure();
                    warn!(
                        "[STREAM] Connect to {} failed: {} (attempt {})",
                        self.url, e, failures
                    );
                    self.state.transition(ConnectionState::Closed);
                    continue;
                }
            };

            failures = 0;
            self.metrics.record_connected();
            info!("[STREAM] Connected to {}", self.url);
            self.state.transition(ConnectionState::Open);

            let end = self.run_session(transport).await;

            self.metrics.record_disconnected();
            self.state.transition(ConnectionState::Closed);
            if end == SessionEnd::Stop {
                break;
            }
        }

        info!("[STREAM] Connection task stopped");
    }

    /// Pump one open connection until it drops or a stop is requested.
    /// The transport is dropped on return.
    async fn run_session(&mut self, mut transport: C::Transport) -> SessionEnd {
        let mut health = HealthMonitor::new(self.health.clone());

        loop {
            let next_health_check = health.time_until_next_check();

            tokio::select! {
                frame = transport.next_message() => {
                    match frame {
                        Some(Ok(Message::Ping(data))) => {
                            debug!("[STREAM] Received ping, sending pong");
                            if let Err(e) = transport.send(Message::Pong(data)).await {
                                warn!("[STREAM] Failed to send pong: {}", e);
                                return SessionEnd::Reconnect;
                            }
                        }
                        Some(Ok(Message::Pong(_))) => {
                            health.record_pong_received();
                            self.metrics.record_pong();
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!("[STREAM] Server closed the connection: {:?}", frame);
                            return SessionEnd::Reconnect;
                        }
                        Some(Ok(Message::Frame(_))) => {}
                        Some(Ok(message)) => {
                            health.record_data_received();
                            self.on_data_frame(&message);
                        }
                        Some(Err(e)) => {
                            warn!("[STREAM] Transport error: {}", e);
                            return SessionEnd::Reconnect;
                        }
                        None => {
                            info!("[STREAM] Stream ended");
                            return SessionEnd::Reconnect;
                        }
                    }
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(ConnectionCommand::Send(message)) => {
                            if let Err(e) = transport.send(message).await {
                                warn!("[STREAM] Failed to send message: {}", e);
                                return SessionEnd::Reconnect;
                            }
                            self.metrics.record_message_sent();
                        }
                        Some(ConnectionCommand::Reconnect) => {
                            info!("[STREAM] Reconnect requested");
                            transport.close().await;
                            return SessionEnd::Reconnect;
                        }
                        Some(ConnectionCommand::Close) | None => {
                            info!("[STREAM] Closing connection");
                            transport.close().await;
                            return SessionEnd::Stop;
                        }
                    }
                }

                _ = tokio::time::sleep(next_health_check), if health.is_enabled() => {
                    if health.check_and_record_pong_timeout() {
                        self.metrics.record_health_failure();
                        warn!("[STREAM] Pong timeout (missed: {})", health.missed_pongs());
                        if health.is_unhealthy() {
                            warn!("[STREAM] Connection unhealthy, reconnecting");
                            transport.close().await;
                            return SessionEnd::Reconnect;
                        }
                    }

                    if health.is_data_timeout() {
                        self.metrics.record_health_failure();
                        warn!("[STREAM] No data received within timeout, reconnecting");
                        transport.close().await;
                        return SessionEnd::Reconnect;
                    }

                    if health.should_send_ping() {
                        if let Err(e) = transport.send(Message::Ping(Default::default())).await {
                            warn!("[STREAM] Failed to send ping: {}", e);
                            return SessionEnd::Reconnect;
                        }
                        health.record_ping_sent();
                        self.metrics.record_ping();
                    }
                }
            }
        }
    }

    /// Normalize and fan out. Never fails the session.
    fn on_data_frame(&self, message: &Message) {
        self.metrics.record_frame_received();
        match normalize_frame(message, Utc::now()) {
            Some(event) => {
                self.bus.dispatch(event);
            }
            None => self.metrics.record_frame_dropped(),
        }
    }
}

/// Service the command channel while no connection is open. Resolves only
/// when a stop is requested or the client handle is gone.
async fn until_stopped(commands: &mut mpsc::Receiver<ConnectionCommand>, metrics: &Metrics) {
    loop {
        match commands.recv().await {
            Some(ConnectionCommand::Send(_)) => {
                metrics.record_send_dropped();
                warn!("[STREAM] Connection not open, outbound message dropped");
            }
            Some(ConnectionCommand::Reconnect) => {
                debug!("[STREAM] Reconnect requested while already reconnecting");
            }
            Some(ConnectionCommand::Close) | None => return,
        }
    }
}

/// Run the manager, containing any panic so it is logged instead of
/// silently killing the task.
pub(crate) async fn run_with_recovery<C: Connector>(manager: ConnectionManager<C>) {
    let state = manager.state.clone();

    if let Err(panic_err) = AssertUnwindSafe(manager.run()).catch_unwind().await {
        let panic_msg = if let Some(s) = panic_err.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_err.downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };
        error!(
            "[STREAM] Connection task PANICKED: {}. Stream is now stopped.",
            panic_msg
        );
        state.transition(ConnectionState::Closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{settle, MockConnector, MockPeer};
    use parking_lot::Mutex;
    use tokio::task::JoinHandle;
    use tokio::time::{Duration, Instant};

    const FLOOR: Duration = Duration::from_millis(3000);

    struct Harness {
        connector: MockConnector,
        bus: Arc<EventBus>,
        state: Arc<StatePublisher>,
        metrics: Arc<Metrics>,
        commands: mpsc::Sender<ConnectionCommand>,
        states: Arc<Mutex<Vec<ConnectionState>>>,
        handle: JoinHandle<()>,
    }

    fn spawn_with(connector: MockConnector, backoff: BackoffConfig, health: HealthConfig) -> Harness {
        let metrics = Arc::new(Metrics::new());
        let bus = Arc::new(EventBus::new(metrics.clone()));
        let state = Arc::new(StatePublisher::new());
        let states = Arc::new(Mutex::new(Vec::new()));
        let s = states.clone();
        state.on_change(move |next| s.lock().push(*next));

        let (commands, command_rx) = mpsc::channel(16);
        let manager = ConnectionManager {
            connector: Arc::new(connector.clone()),
            url: Url::parse("ws://localhost:8000/ws/claims").unwrap(),
            connection: ConnectionConfig::default(),
            backoff,
            health,
            bus: bus.clone(),
            state: state.clone(),
            metrics: metrics.clone(),
            command_rx,
        };
        let handle = tokio::spawn(run_with_recovery(manager));

        Harness {
            connector,
            bus,
            state,
            metrics,
            commands,
            states,
            handle,
        }
    }

    fn spawn(connector: MockConnector) -> Harness {
        spawn_with(
            connector,
            BackoffConfig::constant(FLOOR),
            HealthConfig::disabled(),
        )
    }

    fn claim(kind: &str, id: &str) -> String {
        format!(r#"{{"type":"{}","id":"{}","title":"Claim {}"}}"#, kind, id, id)
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_reach_subscribers_in_order() {
        let connector = MockConnector::new();
        let peer = connector.accept();
        let h = spawn(connector);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        h.bus.subscribe(move |event| s.lock().push(event.id.clone()));

        settle().await;
        assert_eq!(h.state.current(), ConnectionState::Open);

        peer.push_text(&claim("claim_created", "a"));
        peer.push_text(&claim("claim_updated", "b"));
        peer.push_text(&claim("claim_resolved", "c"));
        settle().await;

        assert_eq!(*seen.lock(), vec!["a", "b", "c"]);
        assert_eq!(h.metrics.events_dispatched(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_without_subscribers_are_discarded() {
        let connector = MockConnector::new();
        let peer = connector.accept();
        let h = spawn(connector);
        settle().await;

        for id in ["1", "2", "3"] {
            peer.push_text(&claim("claim_created", id));
        }
        settle().await;
        assert_eq!(h.metrics.events_dispatched(), 3);

        let seen = Arc::new(Mutex::new(0));
        let s = seen.clone();
        h.bus.subscribe(move |_| *s.lock() += 1);
        settle().await;

        assert_eq!(*seen.lock(), 0);
        assert_eq!(h.state.current(), ConnectionState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fraud_alert_delivered_normalized() {
        let connector = MockConnector::new();
        let peer = connector.accept();
        let h = spawn(connector);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        h.bus.subscribe(move |event| s.lock().push(event.clone()));
        settle().await;

        peer.push_text(r#"{"type":"fraud_detected","claimId":"42","severity":"high"}"#);
        settle().await;

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].kind, crate::event::EventKind::FraudDetected);
        assert_eq!(seen[0].subject_id.as_deref(), Some("42"));
        assert_eq!(seen[0].severity, Some(crate::event::Severity::High));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_subscriber_gets_no_backlog() {
        let connector = MockConnector::new();
        let peer = connector.accept();
        let h = spawn(connector);

        let first = Arc::new(Mutex::new(Vec::new()));
        let f = first.clone();
        h.bus.subscribe(move |event| f.lock().push(event.id.clone()));
        settle().await;

        peer.push_text(&claim("claim_created", "e1"));
        settle().await;

        let second = Arc::new(Mutex::new(Vec::new()));
        let s = second.clone();
        h.bus.subscribe(move |event| s.lock().push(event.id.clone()));

        peer.push_text(&claim("claim_updated", "e2"));
        settle().await;

        assert_eq!(*first.lock(), vec!["e1", "e2"]);
        assert_eq!(*second.lock(), vec!["e2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_server_close() {
        let connector = MockConnector::new();
        let first = connector.accept();
        let second = connector.accept();
        let h = spawn(connector);

        settle().await;
        let dropped_at = Instant::now();
        drop(first);
        settle().await;
        assert_eq!(h.state.current(), ConnectionState::Closed);

        tokio::time::sleep(FLOOR + Duration::from_millis(10)).await;
        assert_eq!(h.state.current(), ConnectionState::Open);

        let attempts = h.connector.attempts();
        assert_eq!(attempts.len(), 2);
        assert!(attempts[1] - dropped_at >= FLOOR);

        assert_eq!(
            *h.states.lock(),
            vec![
                ConnectionState::Connecting,
                ConnectionState::Open,
                ConnectionState::Closed,
                ConnectionState::Connecting,
                ConnectionState::Open,
            ]
        );

        // The new connection delivers events
        let seen = Arc::new(Mutex::new(0));
        let s = seen.clone();
        h.bus.subscribe(move |_| *s.lock() += 1);
        second.push_text(&claim("fraud_detected", "x"));
        settle().await;
        assert_eq!(*seen.lock(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_triggers_reconnect() {
        let connector = MockConnector::new();
        let first = connector.accept();
        let _second = connector.accept();
        let h = spawn(connector);

        settle().await;
        first.fail();
        settle().await;
        assert_eq!(h.state.current(), ConnectionState::Closed);

        tokio::time::sleep(FLOOR + Duration::from_millis(10)).await;
        assert_eq!(h.state.current(), ConnectionState::Open);
        assert_eq!(h.metrics.connections(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_spaced_by_at_least_floor() {
        let connector = MockConnector::new();
        connector.refuse().refuse().refuse().refuse();
        let _peer = connector.accept();

        let backoff = BackoffConfig {
            initial_delay: FLOOR,
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
        };
        let h = spawn_with(connector, backoff, HealthConfig::disabled());

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(h.state.current(), ConnectionState::Open);

        let attempts = h.connector.attempts();
        assert_eq!(attempts.len(), 5);
        for pair in attempts.windows(2) {
            assert!(pair[1] - pair[0] >= FLOOR);
        }
        assert_eq!(h.metrics.connect_failures(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_frame_keeps_connection_open() {
        let connector = MockConnector::new();
        let peer = connector.accept();
        let h = spawn(connector);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        h.bus.subscribe(move |event| s.lock().push(event.id.clone()));
        settle().await;

        peer.push_text("not json at all");
        peer.push_text("[1,2,3]");
        peer.push_text(&claim("claim_updated", "ok"));
        settle().await;

        assert_eq!(h.state.current(), ConnectionState::Open);
        assert_eq!(*seen.lock(), vec!["ok"]);
        assert_eq!(h.metrics.frames_received(), 3);
        assert_eq!(h.metrics.frames_dropped(), 2);
        assert_eq!(h.connector.attempts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_subscriber_does_not_break_stream() {
        let connector = MockConnector::new();
        let peer = connector.accept();
        let h = spawn(connector);

        h.bus.subscribe(|_| panic!("subscriber bug"));
        let seen = Arc::new(Mutex::new(0));
        let s = seen.clone();
        h.bus.subscribe(move |_| *s.lock() += 1);
        settle().await;

        peer.push_text(&claim("claim_created", "1"));
        peer.push_text(&claim("claim_created", "2"));
        settle().await;

        assert_eq!(*seen.lock(), 2);
        assert_eq!(h.metrics.handler_failures(), 2);
        assert_eq!(h.state.current(), ConnectionState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_answers_server_ping() {
        let connector = MockConnector::new();
        let mut peer = connector.accept();
        let _h = spawn(connector);
        settle().await;

        peer.push(Message::Ping(vec![1, 2, 3].into()));
        settle().await;

        let sent = peer.received();
        assert_eq!(sent.len(), 1);
        assert!(matches!(&sent[0], Message::Pong(data) if data.to_vec() == vec![1u8, 2, 3]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_command_writes_frame() {
        let connector = MockConnector::new();
        let mut peer = connector.accept();
        let h = spawn(connector);
        settle().await;

        h.commands
            .send(ConnectionCommand::Send(Message::Text("hello".into())))
            .await
            .unwrap();
        settle().await;

        let sent = peer.received();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to_text().unwrap(), "hello");
        assert_eq!(h.metrics.messages_sent(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_stops_during_backoff() {
        let connector = MockConnector::new();
        connector.refuse();
        let h = spawn(connector);
        settle().await;
        assert_eq!(h.state.current(), ConnectionState::Closed);

        h.commands.send(ConnectionCommand::Close).await.unwrap();
        h.handle.await.unwrap();

        // No attempt after the stop, however long we wait
        tokio::time::sleep(FLOOR * 10).await;
        assert_eq!(h.connector.attempts().len(), 1);
        assert_eq!(h.state.current(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_while_connecting() {
        // No scripted outcome: the attempt hangs
        let connector = MockConnector::new();
        let h = spawn(connector);
        settle().await;
        assert_eq!(h.state.current(), ConnectionState::Connecting);

        h.commands.send(ConnectionCommand::Close).await.unwrap();
        h.handle.await.unwrap();

        tokio::time::sleep(FLOOR * 10).await;
        assert_eq!(h.connector.attempts().len(), 1);
        assert_eq!(h.metrics.connect_failures(), 0);
        assert_eq!(
            *h.states.lock(),
            vec![ConnectionState::Connecting, ConnectionState::Closed]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_while_open() {
        let connector = MockConnector::new();
        let _peer: MockPeer = connector.accept();
        let h = spawn(connector);
        settle().await;

        h.commands.send(ConnectionCommand::Close).await.unwrap();
        h.handle.await.unwrap();
        assert_eq!(h.state.current(), ConnectionState::Closed);
        assert_eq!(h.connector.attempts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_counts_as_failure() {
        // No scripted outcome: the attempt hangs
        let connector = MockConnector::new();
        let h = spawn(connector);

        tokio::time::sleep(ConnectionConfig::default().connect_timeout + Duration::from_millis(10))
            .await;
        assert_eq!(h.state.current(), ConnectionState::Closed);
        assert_eq!(h.metrics.connect_failures(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missed_pongs_force_reconnect() {
        let connector = MockConnector::new();
        let _silent = connector.accept();
        let _next = connector.accept();

        let health = HealthConfig {
            enabled: true,
            ping_interval: Duration::from_secs(1),
            pong_timeout: Duration::from_millis(500),
            data_timeout: None,
            failure_threshold: 2,
        };
        let h = spawn_with(connector, BackoffConfig::constant(FLOOR), health);

        // Pings at 0s and 1s go unanswered; the second miss at 1.5s is
        // fatal and the retry lands 3s later
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(h.metrics.health_failures() >= 2);
        assert!(h.metrics.pings_sent() >= 2);
        assert_eq!(h.connector.attempts().len(), 2);
    }
}
