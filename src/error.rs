use crate::config::ConfigError;
use std::time::Duration;
use thiserror::Error;

/// Categorizes errors for logging and metrics decisions.
///
/// This is a lightweight, cloneable view of [`Error`] that can be stored or
/// compared without holding on to the underlying transport error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// WebSocket protocol error
    WebSocket,
    /// Connection failed (refused, DNS, TLS, etc.)
    ConnectionFailed,
    /// Connection attempt did not complete in time
    Timeout,
    /// Invalid configuration
    Config,
    /// Lifecycle misuse (start while running, stop while stopped)
    Lifecycle,
    /// Outbound payload could not be serialized
    Serialization,
}

/// Errors that can occur in claims-realtime
#[derive(Error, Debug)]
pub enum Error {
    /// WebSocket connection error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Connection could not be established
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection attempt exceeded the configured timeout
    #[error("Connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// Configuration rejected
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// `start` called while the stream is already running
    #[error("Realtime stream is already running")]
    AlreadyRunning,

    /// `stop` called while the stream is not running
    #[error("Realtime stream is not running")]
    NotRunning,

    /// Outbound message serialization failed
    #[error("Failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl Error {
    /// Get the kind of this error for decision-making.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::WebSocket(_) => ErrorKind::WebSocket,
            Error::ConnectionFailed(_) => ErrorKind::ConnectionFailed,
            Error::ConnectTimeout(_) => ErrorKind::Timeout,
            Error::Config(_) => ErrorKind::Config,
            Error::AlreadyRunning | Error::NotRunning => ErrorKind::Lifecycle,
            Error::Serialize(_) => ErrorKind::Serialization,
        }
    }
}

/// Outcome of [`RealtimeClient::send`](crate::RealtimeClient::send).
///
/// Sending never fails loudly: callers that care about delivery check
/// `is_connected()` first or inspect this value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendResult {
    /// Serialized and handed to the live connection
    Queued,
    /// Stream is not open; the message was dropped
    NotConnected,
    /// Outbound queue is full; the message was dropped
    QueueFull,
    /// Message could not be serialized to JSON
    SerializeFailed { error: String },
}

impl SendResult {
    /// Whether the message reached the connection's outbound queue
    pub fn is_queued(&self) -> bool {
        matches!(self, SendResult::Queued)
    }
}
