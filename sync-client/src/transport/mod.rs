//! Transport abstraction for TaskFlow sync.
//!
//! The engine never touches sockets. It drives a [`Transport`] that attaches
//! the local endpoint to some peer fabric (WebRTC, QUIC, in-memory mock),
//! opens [`Channel`]s to remote peers, and reports everything that happens
//! as an ordered stream of [`TransportEvent`]s.
//!
//! # Design
//!
//! - `attach()` registers the local endpoint and hands the transport an
//!   [`EventSink`] tagged with the engine's session generation
//! - `open()` starts an outbound channel; `ChannelOpen` follows when usable
//! - `Channel::send()` transmits encoded message bytes
//! - `detach()` tears the endpoint down and closes its channels
//!
//! Callbacks are replaced by one event stream with a single consumer, so the
//! engine sees arrivals, data and closes in the order the transport produced
//! them.
//!
//! # Example
//!
//! ```ignore
//! let network = MockNetwork::new();
//! let transport = network.transport();
//! transport.attach(&local, &profile, sink).await?;
//! let channel = transport.open(&remote).await?;
//! channel.send(&message.to_bytes()?).await?;
//! ```

mod mock;

pub use mock::{MockChannel, MockNetwork, MockTransport, SentMessage};

use async_trait::async_trait;
use std::fmt;
use taskflow_sync_types::PeerId;
use thiserror::Error;
use tokio::sync::mpsc;

/// Transport errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The local endpoint could not be created or attached.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The target peer is not reachable on the fabric.
    #[error("peer unavailable: {0}")]
    PeerUnavailable(String),

    /// The local endpoint is not attached.
    #[error("endpoint not attached")]
    NotAttached,

    /// Channel is closed.
    #[error("channel closed")]
    ChannelClosed,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),
}

/// Transport-assigned identity of one channel.
///
/// Distinguishes a replaced channel from its replacement when both belong to
/// the same remote peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch#{}", self.0)
    }
}

/// Discovery/relay configuration flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportMode {
    /// Public STUN servers and the default signaling service.
    #[default]
    Standard,
    /// Restricted STUN set and a local signaling endpoint.
    LocalOnly,
}

/// Everything a transport needs to attach the local endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportProfile {
    /// Which flavour this is.
    pub mode: TransportMode,
    /// ICE/STUN server URLs.
    pub stun_servers: Vec<String>,
    /// Signaling endpoint (`host:port/path`). `None` means transport default.
    pub signaling: Option<String>,
}

/// Classification of an endpoint-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointErrorKind {
    /// Network or signaling server connectivity lost. Recovered by mode switch.
    ConnectivityLost,
    /// Anything else. Recovered by reconnect backoff.
    Other,
}

/// One thing that happened on the transport.
#[derive(Debug)]
pub enum TransportEvent<C> {
    /// The local endpoint is attached and reachable.
    EndpointOpen,
    /// A remote peer opened a channel to us.
    Incoming {
        /// The inbound channel.
        channel: C,
    },
    /// An outbound channel became usable.
    ChannelOpen {
        /// Remote peer.
        peer: PeerId,
        /// Channel that opened.
        channel: ChannelId,
    },
    /// Bytes arrived on a channel.
    Data {
        /// Remote peer.
        peer: PeerId,
        /// Channel they arrived on.
        channel: ChannelId,
        /// Raw payload.
        bytes: Vec<u8>,
    },
    /// A channel closed (either side).
    ChannelClosed {
        /// Remote peer.
        peer: PeerId,
        /// Channel that closed.
        channel: ChannelId,
    },
    /// A channel failed.
    ChannelError {
        /// Remote peer.
        peer: PeerId,
        /// Channel that failed.
        channel: ChannelId,
        /// Transport-provided description.
        reason: String,
    },
    /// The local endpoint lost its attachment to the fabric.
    EndpointLost,
    /// The local endpoint failed.
    EndpointError {
        /// Failure class.
        kind: EndpointErrorKind,
        /// Transport-provided description.
        reason: String,
    },
}

/// Receiving half of the engine's event queue.
pub type EventReceiver<C> = mpsc::UnboundedReceiver<(u64, TransportEvent<C>)>;

/// Where a transport delivers events for one attach session.
///
/// Every event is tagged with the session generation the sink was created
/// for, so the consumer can discard events from a torn-down session.
pub struct EventSink<C> {
    session: u64,
    tx: mpsc::UnboundedSender<(u64, TransportEvent<C>)>,
}

impl<C> EventSink<C> {
    /// Create a sink/receiver pair for session 0.
    pub fn channel() -> (Self, EventReceiver<C>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { session: 0, tx }, rx)
    }

    /// A sink feeding the same queue, tagged with another session.
    pub fn for_session(&self, session: u64) -> Self {
        Self {
            session,
            tx: self.tx.clone(),
        }
    }

    /// Session generation this sink tags events with.
    pub fn session(&self) -> u64 {
        self.session
    }

    /// Deliver an event. Returns false if the consumer is gone.
    pub fn emit(&self, event: TransportEvent<C>) -> bool {
        self.tx.send((self.session, event)).is_ok()
    }
}

impl<C> Clone for EventSink<C> {
    fn clone(&self) -> Self {
        self.for_session(self.session)
    }
}

impl<C> fmt::Debug for EventSink<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

/// An ordered, reliable message channel to one remote peer.
#[async_trait]
pub trait Channel: Clone + fmt::Debug + Send + Sync + 'static {
    /// Transport-assigned identity.
    fn id(&self) -> ChannelId;

    /// Remote peer.
    fn peer(&self) -> &PeerId;

    /// Whether the channel is currently usable.
    fn is_open(&self) -> bool;

    /// Send one message.
    async fn send(&self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Close the channel. Safe to call more than once.
    async fn close(&self);
}

/// Peer fabric capability.
///
/// Implementations handle NAT traversal, signaling and encryption; the
/// engine only sees channels and events.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Channel handle type.
    type Channel: Channel;

    /// Attach the local endpoint under `profile`.
    ///
    /// `EndpointOpen` is delivered to `events` once the endpoint is reachable.
    async fn attach(
        &self,
        local: &PeerId,
        profile: &TransportProfile,
        events: EventSink<Self::Channel>,
    ) -> Result<(), TransportError>;

    /// Open a channel to `target`. `ChannelOpen` follows when it is usable.
    async fn open(&self, target: &PeerId) -> Result<Self::Channel, TransportError>;

    /// Tear the local endpoint down. Safe to call when not attached.
    async fn detach(&self);
}
