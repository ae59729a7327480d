//! # sync-client
//!
//! Peer-to-peer sync engine for TaskFlow.
//!
//! This is the main library that applications use to keep replicas of their
//! task state in step across devices.
//!
//! ## Features
//!
//! - **Direct Peer Connections**: one channel per remote peer, host role latched
//!   on first inbound arrival
//! - **Liveness**: 30 s heartbeat, silent connections closed after missed pings
//! - **Recovery**: exponential reconnect backoff, local-only mode switch on
//!   connectivity loss
//! - **Transport Abstraction**: pluggable transport layer (mock included)
//! - **Pure State Machine**: uses sync-core for side-effect-free logic
//!
//! ## Example
//!
//! ```ignore
//! use taskflow_sync_client::{EngineConfig, MockNetwork, SyncEngine};
//!
//! let engine = SyncEngine::new(EngineConfig::default(), transport, move || current());
//! engine.set_data_received_handler(|merged| save(merged));
//! engine.initialize().await?;
//!
//! // Pull from a peer, then push local changes
//! engine.connect_to_peer("taskflow-k3j9x0a2b").await?;
//! engine.broadcast_data(current()).await;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod engine;
pub mod error;
pub mod transport;

pub use config::{ConfigError, EngineConfig};
pub use engine::{SnapshotProvider, SyncEngine};
pub use error::{ConnectError, InitError, SyncFailure};
pub use taskflow_sync_core::{MergePolicy, SyncStatus};
pub use transport::{
    Channel, ChannelId, EndpointErrorKind, EventSink, MockChannel, MockNetwork, MockTransport,
    SentMessage, Transport, TransportError, TransportEvent, TransportMode, TransportProfile,
};
