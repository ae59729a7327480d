//! CLI command implementations.

pub mod merge;
pub mod peer_id;
pub mod show_config;
pub mod simulate;
