use crate::error::Error;
use crate::transport::{Connector, Transport};
use futures_util::{SinkExt, StreamExt};
use http::{HeaderName, HeaderValue};
use std::net::SocketAddr;
use tokio::net::{TcpSocket, TcpStream};
use tokio::time::Duration;
use tokio_tungstenite::{
    client_async_tls_with_config, tungstenite::client::IntoClientRequest, tungstenite::Message,
    Connector as TlsConnector, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, trace};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to the event feed over `ws://` or `wss://` (native TLS).
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector {
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl WebSocketConnector {
    /// `headers` are added to every handshake request (e.g. auth)
    pub fn new(headers: Vec<(HeaderName, HeaderValue)>) -> Self {
        Self { headers }
    }
}

impl Connector for WebSocketConnector {
    type Transport = WebSocketTransport;

    async fn connect(&self, url: &Url) -> Result<WebSocketTransport, Error> {
        let stream = connect_with_headers(url, self.headers.clone()).await?;
        Ok(WebSocketTransport { stream })
    }
}

/// A live tungstenite WebSocket stream
pub struct WebSocketTransport {
    stream: WsStream,
}

impl Transport for WebSocketTransport {
    async fn send(&mut self, message: Message) -> Result<(), Error> {
        self.stream.send(message).await?;
        Ok(())
    }

    async fn next_message(&mut self) -> Option<Result<Message, Error>> {
        self.stream.next().await.map(|frame| frame.map_err(Error::from))
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.send(Message::Close(None)).await {
            trace!("[STREAM] Close frame not sent: {}", e);
        }
    }
}

/// Connect to a WebSocket URL with extra handshake headers.
async fn connect_with_headers(
    url: &Url,
    headers: Vec<(HeaderName, HeaderValue)>,
) -> Result<WsStream, Error> {
    let host = url
        .host_str()
        .ok_or_else(|| Error::ConnectionFailed(format!("No host in URL {}", url)))?;

    let is_tls = url.scheme() == "wss";
    let port = url
        .port_or_known_default()
        .unwrap_or(if is_tls { 443 } else { 80 });

    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| Error::ConnectionFailed(format!("Invalid WebSocket request: {}", e)))?;

    for (name, value) in headers {
        request.headers_mut().insert(name, value);
    }

    debug!(
        "[STREAM] Opening TCP connection to {}:{} (tls={})",
        host, port, is_tls
    );
    let tcp_stream = connect_direct(host, port).await?;
    set_tcp_options(&tcp_stream);

    let connector = if is_tls {
        let tls = native_tls::TlsConnector::new()
            .map_err(|e| Error::ConnectionFailed(format!("TLS error: {}", e)))?;
        Some(TlsConnector::NativeTls(tls))
    } else {
        None
    };

    let (ws_stream, _response) =
        client_async_tls_with_config(request, tcp_stream, None, connector).await?;

    Ok(ws_stream)
}

async fn connect_direct(host: &str, port: u16) -> Result<TcpStream, Error> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| Error::ConnectionFailed(format!("DNS lookup for {} failed: {}", host, e)))?
        .collect();

    if addrs.is_empty() {
        return Err(Error::ConnectionFailed(format!(
            "No addresses found for {}",
            host
        )));
    }
    connect_any(&addrs).await
}

/// Try each address in order; `localhost` often resolves to `::1` first
/// while the server only listens on IPv4.
async fn connect_any(addrs: &[SocketAddr]) -> Result<TcpStream, Error> {
    let mut last_error = None;

    for &dest_addr in addrs {
        let socket = if dest_addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        };
        let socket = match socket {
            Ok(socket) => socket,
            Err(e) => {
                last_error = Some(format!("Failed to create socket for {}: {}", dest_addr, e));
                continue;
            }
        };

        match socket.connect(dest_addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!("[STREAM] TCP connect to {} failed: {}", dest_addr, e);
                last_error = Some(format!("TCP connect to {} failed: {}", dest_addr, e));
            }
        }
    }

    Err(Error::ConnectionFailed(
        last_error.unwrap_or_else(|| "No addresses to connect to".to_string()),
    ))
}

/// No-delay plus keepalive so half-dead connections surface as errors
fn set_tcp_options(stream: &TcpStream) {
    let sock = socket2::SockRef::from(stream);
    let _ = sock.set_nodelay(true);

    let keepalive = socket2::TcpKeepalive::new()
        .with_time(Duration::from_secs(30))
        .with_interval(Duration::from_secs(10));
    let _ = sock.set_tcp_keepalive(&keepalive);
}
