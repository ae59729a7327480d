//! Connection registry.
//!
//! Tracks live peer connections keyed by remote peer id and derives the
//! role and cardinality facts the rest of the engine needs. The registry
//! only holds channel handles; it never performs I/O on them.
//!
//! Invariants:
//! - At most one entry per peer id. Registering a known peer replaces the
//!   old entry and hands it back to the caller.
//! - `host` is a one-way latch set by the first inbound arrival. Nothing
//!   clears it for the lifetime of the registry.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use taskflow_sync_types::PeerId;

/// Which side opened a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// The remote peer connected to us.
    Inbound,
    /// We connected to the remote peer.
    Outbound,
}

/// One registered connection.
#[derive(Debug, Clone)]
pub struct Connection<C> {
    /// Transport channel handle.
    pub channel: C,
    /// Which side opened it.
    pub origin: Origin,
    /// Whether the channel has reported open.
    pub open: bool,
    /// Last time anything was heard from the peer (or registration time).
    pub last_seen: Instant,
}

/// Result of removing a peer.
#[derive(Debug)]
pub struct Removal<C> {
    /// The removed entry, if the peer was registered.
    pub removed: Option<Connection<C>>,
    /// True when this removal emptied the registry.
    pub now_empty: bool,
}

/// Live connections keyed by remote peer id.
#[derive(Debug)]
pub struct ConnectionRegistry<C> {
    connections: HashMap<PeerId, Connection<C>>,
    host: bool,
}

impl<C> ConnectionRegistry<C> {
    /// Create an empty registry. Not host.
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
            host: false,
        }
    }

    /// Insert or replace the entry for `peer`.
    ///
    /// Returns the replaced entry, if any. An inbound registration latches
    /// host status.
    pub fn register(
        &mut self,
        peer: PeerId,
        channel: C,
        origin: Origin,
        open: bool,
        now: Instant,
    ) -> Option<Connection<C>> {
        if origin == Origin::Inbound {
            self.host = true;
        }
        self.connections.insert(
            peer,
            Connection {
                channel,
                origin,
                open,
                last_seen: now,
            },
        )
    }

    /// Remove the entry for `peer`.
    pub fn unregister(&mut self, peer: &PeerId) -> Removal<C> {
        self.unregister_if(peer, |_| true)
    }

    /// Remove the entry for `peer` only if its channel satisfies `matches`.
    ///
    /// Used to ignore close events from a channel that was already replaced.
    pub fn unregister_if<F>(&mut self, peer: &PeerId, matches: F) -> Removal<C>
    where
        F: FnOnce(&C) -> bool,
    {
        let hit = self
            .connections
            .get(peer)
            .map(|c| matches(&c.channel))
            .unwrap_or(false);

        let removed = if hit {
            self.connections.remove(peer)
        } else {
            None
        };
        let now_empty = removed.is_some() && self.connections.is_empty();
        Removal { removed, now_empty }
    }

    /// Mark the channel for `peer` as open. Returns false if unknown.
    pub fn mark_open(&mut self, peer: &PeerId) -> bool {
        match self.connections.get_mut(peer) {
            Some(conn) => {
                conn.open = true;
                true
            }
            None => false,
        }
    }

    /// Record that something was heard from `peer`.
    pub fn touch(&mut self, peer: &PeerId, now: Instant) {
        if let Some(conn) = self.connections.get_mut(peer) {
            conn.last_seen = now;
        }
    }

    /// Look up the entry for `peer`.
    pub fn get(&self, peer: &PeerId) -> Option<&Connection<C>> {
        self.connections.get(peer)
    }

    /// Number of registered connections.
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// True when no connection is registered.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Whether this endpoint latched host status.
    pub fn is_host(&self) -> bool {
        self.host
    }

    /// Iterate over registered peers and their connections.
    pub fn iter(&self) -> impl Iterator<Item = (&PeerId, &Connection<C>)> {
        self.connections.iter()
    }

    /// Iterate over connections whose channel has reported open.
    pub fn open_connections(&self) -> impl Iterator<Item = (&PeerId, &Connection<C>)> {
        self.connections.iter().filter(|(_, c)| c.open)
    }

    /// Peers not heard from for longer than `limit`.
    pub fn silent_longer_than(&self, limit: Duration, now: Instant) -> Vec<PeerId> {
        self.connections
            .iter()
            .filter(|(_, c)| now.saturating_duration_since(c.last_seen) > limit)
            .map(|(peer, _)| peer.clone())
            .collect()
    }

    /// Remove every entry. Host status is kept.
    pub fn drain(&mut self) -> Vec<(PeerId, Connection<C>)> {
        self.connections.drain().collect()
    }
}

impl<C> Default for ConnectionRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}
