use crate::bus::EventBus;
use crate::config::RealtimeConfig;
use crate::error::{Error, SendResult};
use crate::event::Event;
use crate::manager::{run_with_recovery, ConnectionCommand, ConnectionManager};
use crate::metrics::Metrics;
use crate::registry::SubscriptionToken;
use crate::state::{ConnectionState, StatePublisher};
use crate::transport::Connector;
use crate::websocket::WebSocketConnector;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

/// Handle to the realtime claims stream.
///
/// Owns the background connection task. Consumers subscribe to normalized
/// events and observe connection state; they never touch the socket.
///
/// # Example
/// ```ignore
/// let client = RealtimeClient::new(RealtimeConfig::from_env()?)?;
/// let token = client.subscribe(|event| println!("{}: {}", event.kind, event.title));
/// client.start().await?;
/// // ...
/// client.unsubscribe(&token);
/// client.stop().await?;
/// ```
pub struct RealtimeClient<C: Connector = WebSocketConnector> {
    config: RealtimeConfig,
    url: Url,
    connector: Arc<C>,
    bus: Arc<EventBus>,
    state: Arc<StatePublisher>,
    metrics: Arc<Metrics>,
    command_tx: RwLock<Option<mpsc::Sender<ConnectionCommand>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    /// Serializes start/stop
    lifecycle_lock: tokio::sync::Mutex<()>,
}

impl RealtimeClient<WebSocketConnector> {
    /// Create a client for the configured stream. Nothing connects until
    /// [`start`](Self::start).
    pub fn new(config: RealtimeConfig) -> Result<Self, Error> {
        let connector = WebSocketConnector::new(config.connection.headers.clone());
        Self::with_connector(config, connector)
    }

    /// Create and start in one step
    pub async fn connect(config: RealtimeConfig) -> Result<Self, Error> {
        let client = Self::new(config)?;
        client.start().await?;
        Ok(client)
    }
}

impl<C: Connector> RealtimeClient<C> {
    /// Create a client over a custom transport
    pub fn with_connector(config: RealtimeConfig, connector: C) -> Result<Self, Error> {
        let url = config.stream_url()?;
        let metrics = Arc::new(Metrics::new());
        Ok(Self {
            config,
            url,
            connector: Arc::new(connector),
            bus: Arc::new(EventBus::new(metrics.clone())),
            state: Arc::new(StatePublisher::new()),
            metrics,
            command_tx: RwLock::new(None),
            task: Mutex::new(None),
            lifecycle_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Spawn the connection task. The first attempt happens immediately.
    pub async fn start(&self) -> Result<(), Error> {
        let _guard = self.lifecycle_lock.lock().await;
        if self.command_tx.read().is_some() {
            return Err(Error::AlreadyRunning);
        }

        let (command_tx, command_rx) = mpsc::channel(self.config.connection.command_buffer);
        let manager = ConnectionManager {
            connector: self.connector.clone(),
            url: self.url.clone(),
            connection: self.config.connection.clone(),
            backoff: self.config.backoff.clone(),
            health: self.config.health.clone(),
            bus: self.bus.clone(),
            state: self.state.clone(),
            metrics: self.metrics.clone(),
            command_rx,
        };

        info!("[STREAM] Starting realtime stream for {}", self.url);
        let handle = tokio::spawn(run_with_recovery(manager));
        *self.command_tx.write() = Some(command_tx);
        *self.task.lock() = Some(handle);
        Ok(())
    }

    /// Close the connection, cancel any pending reconnect and wait for the
    /// task to finish. Subscriptions survive a stop/start cycle.
    pub async fn stop(&self) -> Result<(), Error> {
        let _guard = self.lifecycle_lock.lock().await;
        let command_tx = self.command_tx.write().take().ok_or(Error::NotRunning)?;

        // Task may already be gone; the join below covers both cases
        let _ = command_tx.send(ConnectionCommand::Close).await;
        drop(command_tx);

        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("[STREAM] Connection task failed to join: {}", e);
            }
        }
        info!("[STREAM] Realtime stream stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.command_tx.read().is_some()
    }

    /// True only while the connection is open
    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.state.current()
    }

    /// Watch channel for async consumers that only need the latest state
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state.receiver()
    }

    /// Called synchronously on every state transition
    pub fn on_state_change<F>(&self, listener: F) -> SubscriptionToken
    where
        F: Fn(&ConnectionState) + Send + Sync + 'static,
    {
        self.state.on_change(listener)
    }

    /// Register an event handler. It receives every event that arrives after
    /// this call, and nothing from before.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionToken
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.bus.subscribe(handler)
    }

    /// Remove an event handler or state listener registered on this client.
    /// Idempotent; returns whether anything was removed.
    pub fn unsubscribe(&self, token: &SubscriptionToken) -> bool {
        self.bus.unsubscribe(token) || self.state.remove_listener(token)
    }

    pub fn subscriber_count(&self) -> usize {
        self.bus.subscriber_count()
    }

    /// Serialize `message` as JSON and queue it on the open connection.
    ///
    /// Never blocks. When the stream is not open the message is dropped with
    /// a warning; it is not buffered for later.
    pub fn send<T: Serialize + ?Sized>(&self, message: &T) -> SendResult {
        let state = self.state.current();
        if !state.is_connected() {
            warn!("[STREAM] Cannot send while {}, message dropped", state);
            self.metrics.record_send_dropped();
            return SendResult::NotConnected;
        }

        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(e) => {
                warn!("[STREAM] Failed to serialize outbound message: {}", e);
                return SendResult::SerializeFailed {
                    error: e.to_string(),
                };
            }
        };

        let Some(command_tx) = self.command_tx.read().clone() else {
            self.metrics.record_send_dropped();
            return SendResult::NotConnected;
        };

        match command_tx.try_send(ConnectionCommand::Send(Message::Text(text.into()))) {
            Ok(()) => SendResult::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("[STREAM] Outbound queue full, message dropped");
                self.metrics.record_send_dropped();
                SendResult::QueueFull
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.metrics.record_send_dropped();
                SendResult::NotConnected
            }
        }
    }

    /// Drop the current connection and reconnect after the backoff floor.
    /// Returns false when the stream is not running.
    pub fn reconnect(&self) -> bool {
        let Some(command_tx) = self.command_tx.read().clone() else {
            return false;
        };
        debug!("[STREAM] Requesting reconnect");
        command_tx.try_send(ConnectionCommand::Reconnect).is_ok()
    }

    /// Most recent event received, if any
    pub fn last_event(&self) -> Option<Arc<Event>> {
        self.bus.last_event()
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    pub fn stream_url(&self) -> &Url {
        &self.url
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.config
    }
}

impl<C: Connector> Drop for RealtimeClient<C> {
    fn drop(&mut self) {
        // Abort the task so no orphaned reconnect timer or socket outlives us
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
            let state = self.state.current();
            if state != ConnectionState::Idle && state != ConnectionState::Closed {
                self.state.transition(ConnectionState::Closed);
            }
        }
    }
}
