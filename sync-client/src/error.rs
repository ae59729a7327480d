//! Error taxonomy for the sync engine.
//!
//! [`InitError`] and [`ConnectError`] are returned from the public API.
//! [`SyncFailure`] is what the error handler receives; every failure is
//! reported through it exactly once, whether or not it was also returned.

use taskflow_sync_types::PeerId;
use thiserror::Error;

use crate::transport::TransportError;

/// `initialize()` failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InitError {
    /// The transport refused to attach the local endpoint.
    #[error("transport could not be created: {0}")]
    Attach(#[from] TransportError),
}

/// `connect_to_peer()` failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectError {
    /// The target id is not a valid peer id.
    #[error("invalid peer id: {0:?}")]
    InvalidPeerId(String),

    /// The target is this engine's own peer id.
    #[error("cannot connect to own peer id")]
    OwnPeerId,

    /// `initialize()` has not attached the local endpoint.
    #[error("engine not initialized")]
    NotInitialized,

    /// The channel could not be opened.
    #[error("could not reach {peer}: {source}")]
    Open {
        /// Target peer.
        peer: PeerId,
        /// Transport failure.
        source: TransportError,
    },
}

/// A failure reported through the error handler.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncFailure {
    /// Local endpoint could not be created.
    #[error("sync service could not be initialized: {0}")]
    Init(InitError),

    /// Outbound connection failed.
    #[error("connection attempt failed: {0}")]
    Connect(ConnectError),

    /// A payload could not be decoded. The message was dropped.
    #[error("malformed message from {peer}: {reason}")]
    MessageDecode {
        /// Sending peer.
        peer: PeerId,
        /// Decoder message.
        reason: String,
    },

    /// Network or signaling connectivity lost; switching to local-only mode.
    #[error("server connection lost, switching to local mode: {reason}")]
    ConnectivityLost {
        /// Transport-provided description.
        reason: String,
    },

    /// Any other connection failure.
    #[error("connection error{}: {reason}", with_peer(.peer))]
    Connection {
        /// Remote peer, if the failure belongs to one channel.
        peer: Option<PeerId>,
        /// Description.
        reason: String,
    },

    /// Automatic reconnection gave up.
    #[error("reconnection abandoned after {attempts} attempts")]
    ReconnectExhausted {
        /// Attempts made.
        attempts: u32,
    },

    /// Re-attaching in local-only mode failed.
    #[error("could not switch to local mode: {reason}")]
    ModeSwitchFailed {
        /// Transport failure description.
        reason: String,
    },
}

fn with_peer(peer: &Option<PeerId>) -> String {
    peer.as_ref().map(|p| format!(" with {p}")).unwrap_or_default()
}
