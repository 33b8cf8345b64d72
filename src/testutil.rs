//! In-memory transport for driving the connection manager in tests.

use crate::error::Error;
use crate::transport::{Connector, Transport};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

pub(crate) enum Outcome {
    Refuse,
    Accept(MockTransport),
}

/// Hands out scripted outcomes, one per attempt. With the script exhausted
/// further attempts hang until the connect timeout fires.
#[derive(Clone, Default)]
pub(crate) struct MockConnector {
    outcomes: Arc<Mutex<VecDeque<Outcome>>>,
    attempts: Arc<Mutex<Vec<Instant>>>,
}

impl MockConnector {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn refuse(&self) -> &Self {
        self.outcomes.lock().push_back(Outcome::Refuse);
        self
    }

    /// Queue an accepted connection and return the server side of it
    pub(crate) fn accept(&self) -> MockPeer {
        let (peer, transport) = mock_pair();
        self.outcomes.lock().push_back(Outcome::Accept(transport));
        peer
    }

    pub(crate) fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().clone()
    }
}

impl Connector for MockConnector {
    type Transport = MockTransport;

    async fn connect(&self, _url: &Url) -> Result<MockTransport, Error> {
        self.attempts.lock().push(Instant::now());
        let outcome = self.outcomes.lock().pop_front();
        match outcome {
            Some(Outcome::Accept(transport)) => Ok(transport),
            Some(Outcome::Refuse) => Err(Error::ConnectionFailed("connection refused".into())),
            None => std::future::pending().await,
        }
    }
}

pub(crate) struct MockTransport {
    inbound: mpsc::UnboundedReceiver<Result<Message, Error>>,
    outbound: mpsc::UnboundedSender<Message>,
}

impl Transport for MockTransport {
    async fn send(&mut self, message: Message) -> Result<(), Error> {
        self.outbound
            .send(message)
            .map_err(|_| Error::ConnectionFailed("peer went away".into()))
    }

    async fn next_message(&mut self) -> Option<Result<Message, Error>> {
        self.inbound.recv().await
    }

    async fn close(&mut self) {
        self.inbound.close();
    }
}

/// Server end of a mock connection. Dropping it ends the client's stream.
pub(crate) struct MockPeer {
    to_client: mpsc::UnboundedSender<Result<Message, Error>>,
    from_client: mpsc::UnboundedReceiver<Message>,
}

impl MockPeer {
    pub(crate) fn push_text(&self, text: &str) {
        let _ = self.to_client.send(Ok(Message::Text(text.into())));
    }

    pub(crate) fn push(&self, message: Message) {
        let _ = self.to_client.send(Ok(message));
    }

    /// Surface a transport error on the client's read side
    pub(crate) fn fail(&self) {
        let _ = self
            .to_client
            .send(Err(Error::ConnectionFailed("connection reset".into())));
    }

    /// Everything the client has written so far
    pub(crate) fn received(&mut self) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(message) = self.from_client.try_recv() {
            out.push(message);
        }
        out
    }
}

pub(crate) fn mock_pair() -> (MockPeer, MockTransport) {
    let (to_client, inbound) = mpsc::unbounded_channel();
    let (outbound, from_client) = mpsc::unbounded_channel();
    (
        MockPeer {
            to_client,
            from_client,
        },
        MockTransport { inbound, outbound },
    )
}

/// Let spawned tasks run without advancing the paused clock much
pub(crate) async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
