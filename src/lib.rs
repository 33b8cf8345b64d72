//! # claims-realtime
//!
//! Realtime event stream for the claims triage dashboard: one self-healing
//! WebSocket connection to the claims API, with every inbound frame
//! normalized and fanned out to independent subscribers.
//!
//! ## Features
//!
//! - **Auto-reconnection** with capped exponential backoff that never retries
//!   faster than the configured floor
//! - **Normalization** of loosely-typed frames into [`Event`]s with defaults
//!   for missing fields; malformed frames are logged and dropped
//! - **Fan-out** to subscribers with panic isolation and no backlog for late
//!   subscribers
//! - **Connection state** published separately from events, as a current
//!   value, a `watch` channel and per-transition callbacks
//! - **Health monitoring** via ping/pong and optional data timeout
//! - **Metrics** for observability
//!
//! ## Example
//!
//! ```ignore
//! use claims_realtime::{RealtimeClient, RealtimeConfig, RecentEvents};
//!
//! let client = RealtimeClient::new(RealtimeConfig::from_env()?)?;
//! let feed = RecentEvents::default();
//! feed.attach(&client);
//!
//! client.on_state_change(|state| println!("stream is {}", state));
//! client.subscribe(|event| println!("{}: {}", event.kind, event.title));
//! client.start().await?;
//! ```

mod bus;
mod client;
mod config;
mod error;
mod event;
mod feed;
mod health;
mod manager;
mod metrics;
mod normalizer;
mod registry;
mod state;
mod transport;
mod websocket;

#[cfg(test)]
mod testutil;

pub use bus::EventBus;
pub use client::RealtimeClient;
pub use config::{
    BackoffConfig, ConfigError, ConnectionConfig, HealthConfig, RealtimeConfig,
    RealtimeConfigBuilder, API_URL_ENV, STREAM_URL_ENV,
};
pub use error::{Error, ErrorKind, SendResult};
pub use event::{Event, EventKind, Severity};
pub use feed::{RecentEvents, DEFAULT_FEED_CAPACITY};
pub use metrics::{Metrics, MetricsSnapshot};
pub use normalizer::{normalize_frame, normalize_text};
pub use registry::{DispatchReport, SubscriberId, SubscriptionToken};
pub use state::{ConnectionState, StatePublisher};
pub use transport::{Connector, Transport};
pub use websocket::{WebSocketConnector, WebSocketTransport};

// Re-export http types for connection headers
pub use http::{HeaderName, HeaderValue};
// Frames passed through `Transport`
pub use tokio_tungstenite::tungstenite::Message;

/// Result type for claims-realtime operations
pub type Result<T> = std::result::Result<T, Error>;
