//! Duplex message channels
//!
//! A [`MessageChannel`] is anything that can post a JSON message to a
//! destination and yield inbound messages tagged with where to reply, such as
//! a worker port, a window, or a websocket connection. [`LocalChannel`] is
//! an in-process pair used for tests and same-process clients.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tracing::trace;

/// Raw inbound payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Structured message
    Json(Value),
    /// Serialized message, decoded by the transport
    Text(String),
}

/// Inbound message and the destination replies go to.
#[derive(Debug, Clone)]
pub struct Inbound<D> {
    /// The payload
    pub payload: Payload,
    /// Where responses to this message are sent
    pub reply_to: D,
}

/// Errors from posting a message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// The other side is gone
    #[error("channel closed")]
    Closed,
    /// The destination isn't reachable through this channel
    #[error("unknown destination: {0}")]
    UnknownDestination(String),
}

/// Duplex message channel.
#[async_trait]
pub trait MessageChannel: Send + Sync + 'static {
    /// Address responses are sent to.
    type Destination: Clone + fmt::Debug + Send + Sync + 'static;

    /// Post a message. Fire-and-forget: returns once the message is queued.
    fn send(&self, message: Value, destination: &Self::Destination) -> Result<(), ChannelError>;

    /// Next inbound message; `None` once the channel is closed.
    async fn recv(&self) -> Option<Inbound<Self::Destination>>;
}

/// Inbound messages of `channel` as a stream that ends when the channel closes.
pub fn incoming<C: MessageChannel>(channel: Arc<C>) -> BoxStream<'static, Inbound<C::Destination>> {
    stream::unfold(channel, |channel| async move {
        let message = channel.recv().await?;
        Some((message, channel))
    })
    .boxed()
}

// =============================================================================
// Local channel
// =============================================================================

/// Name of one side of a [`LocalChannel`] pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocalPeer(pub String);

impl fmt::Display for LocalPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One end of an in-process channel pair.
pub struct LocalChannel {
    name: LocalPeer,
    peer: LocalPeer,
    tx: mpsc::UnboundedSender<Inbound<LocalPeer>>,
    rx: Mutex<mpsc::UnboundedReceiver<Inbound<LocalPeer>>>,
}

impl LocalChannel {
    /// Create two connected ends named `a` and `b`.
    pub fn pair(a: impl Into<String>, b: impl Into<String>) -> (Self, Self) {
        let (a, b) = (LocalPeer(a.into()), LocalPeer(b.into()));
        let (to_b, from_a) = mpsc::unbounded_channel();
        let (to_a, from_b) = mpsc::unbounded_channel();
        (
            Self {
                name: a.clone(),
                peer: b.clone(),
                tx: to_b,
                rx: Mutex::new(from_b),
            },
            Self {
                name: b,
                peer: a,
                tx: to_a,
                rx: Mutex::new(from_a),
            },
        )
    }

    /// This end's name.
    pub fn name(&self) -> &LocalPeer {
        &self.name
    }

    /// The other end's name.
    pub fn peer(&self) -> &LocalPeer {
        &self.peer
    }

    /// Post a JSON message to the other end.
    pub fn post(&self, message: Value) -> Result<(), ChannelError> {
        self.post_payload(Payload::Json(message))
    }

    /// Post a text message to the other end.
    pub fn post_text(&self, message: impl Into<String>) -> Result<(), ChannelError> {
        self.post_payload(Payload::Text(message.into()))
    }

    fn post_payload(&self, payload: Payload) -> Result<(), ChannelError> {
        trace!(from = %self.name, to = %self.peer, "Posting local message");
        self.tx
            .send(Inbound {
                payload,
                reply_to: self.name.clone(),
            })
            .map_err(|_| ChannelError::Closed)
    }
}

#[async_trait]
impl MessageChannel for LocalChannel {
    type Destination = LocalPeer;

    fn send(&self, message: Value, destination: &LocalPeer) -> Result<(), ChannelError> {
        if destination != &self.peer {
            return Err(ChannelError::UnknownDestination(destination.to_string()));
        }
        self.post(message)
    }

    async fn recv(&self) -> Option<Inbound<LocalPeer>> {
        self.rx.lock().await.recv().await
    }
}

impl fmt::Debug for LocalChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalChannel")
            .field("name", &self.name)
            .field("peer", &self.peer)
            .finish()
    }
}
