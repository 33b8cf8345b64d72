use crate::error::Error;
use std::future::Future;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

/// One live, bidirectional connection to the event source.
///
/// Owned exclusively by the connection manager task; nothing else reads or
/// writes it.
pub trait Transport: Send + 'static {
    /// Write one frame.
    fn send(&mut self, message: Message) -> impl Future<Output = Result<(), Error>> + Send;

    /// Next inbound frame; `None` once the stream has ended.
    ///
    /// Must be cancel-safe: the manager polls it inside `tokio::select!`.
    fn next_message(&mut self) -> impl Future<Output = Option<Result<Message, Error>>> + Send;

    /// Best-effort graceful close.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Opens transports. Called once per connection attempt.
///
/// The production implementation is
/// [`WebSocketConnector`](crate::WebSocketConnector); tests substitute an
/// in-memory one.
pub trait Connector: Send + Sync + 'static {
    type Transport: Transport;

    /// Establish a connection and complete the handshake.
    ///
    /// The manager bounds this with the configured connect timeout.
    fn connect(&self, url: &Url) -> impl Future<Output = Result<Self::Transport, Error>> + Send;
}
