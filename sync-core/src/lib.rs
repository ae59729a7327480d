//! # sync-core
//!
//! Pure logic for TaskFlow sync (no I/O, instant tests).
//!
//! This crate implements the state machines and algorithms for peer sync
//! without any network, timer or disk I/O, enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. Clock readings are passed in as parameters. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! The actual I/O (transport, timers) is performed by `sync-client`, which
//! interprets the actions produced here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod heartbeat;
pub mod merge;
pub mod reconnect;
pub mod registry;
pub mod router;
pub mod status;

pub use heartbeat::HeartbeatPolicy;
pub use merge::{merge, merge_with, parse_instant, MergePolicy};
pub use reconnect::{ReconnectDecision, ReconnectPolicy, Reconnector};
pub use registry::{Connection, ConnectionRegistry, Origin, Removal};
pub use router::{route, IgnoreReason, Route};
pub use status::{StatusAction, StatusEvent, SyncStatus};
