//! # sync-types
//!
//! Data model and wire format for TaskFlow peer-to-peer sync.
//!
//! This crate provides the types shared by every TaskFlow sync crate:
//! - [`Snapshot`], [`Task`], [`Category`], [`Settings`] - replica state
//! - [`Message`], [`MessageType`] - the JSON unit exchanged between peers
//! - [`PeerId`] - per-process peer identity
//! - [`TypesError`] - error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod ids;
mod messages;
mod snapshot;

pub use error::TypesError;
pub use ids::{PeerId, DEFAULT_PEER_PREFIX, PEER_SUFFIX_LEN};
pub use messages::{Message, MessageType};
pub use snapshot::{now_millis, Category, ExportData, Settings, Snapshot, Task, SNAPSHOT_VERSION};
