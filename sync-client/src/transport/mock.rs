//! Mock transport for testing.
//!
//! [`MockNetwork`] is an in-memory peer fabric. Every [`MockTransport`] created
//! from it is one endpoint; channels between endpoints deliver bytes straight
//! into the other side's event sink. Sent messages are captured for
//! verification, and failures can be forced or injected.

use super::{
    Channel, ChannelId, EventSink, Transport, TransportError, TransportEvent, TransportProfile,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use taskflow_sync_types::PeerId;

/// A message captured on the mock network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    /// Sending peer.
    pub from: PeerId,
    /// Receiving peer.
    pub to: PeerId,
    /// Channel it travelled on.
    pub channel: ChannelId,
    /// Raw payload.
    pub bytes: Vec<u8>,
}

/// In-memory peer fabric shared by any number of [`MockTransport`]s.
#[derive(Debug, Clone, Default)]
pub struct MockNetwork {
    inner: Arc<Mutex<NetworkInner>>,
}

#[derive(Debug, Default)]
struct NetworkInner {
    endpoints: HashMap<PeerId, EventSink<MockChannel>>,
    links: HashMap<ChannelId, Link>,
    next_channel: u64,
    sent: Vec<SentMessage>,
    muted: HashSet<PeerId>,
    fail_next_send: Option<String>,
}

#[derive(Debug)]
struct Link {
    opener: PeerId,
    target: PeerId,
    open: bool,
}

impl Link {
    fn other(&self, peer: &PeerId) -> &PeerId {
        if &self.opener == peer {
            &self.target
        } else {
            &self.opener
        }
    }
}

impl NetworkInner {
    fn emit(&self, to: &PeerId, event: TransportEvent<MockChannel>) {
        if let Some(sink) = self.endpoints.get(to) {
            sink.emit(event);
        }
    }

    /// Close a link and tell both ends.
    fn close(&mut self, id: ChannelId) {
        let ends = match self.links.get_mut(&id) {
            Some(link) if link.open => {
                link.open = false;
                (link.opener.clone(), link.target.clone())
            }
            _ => return,
        };
        let (opener, target) = ends;
        self.emit(
            &opener,
            TransportEvent::ChannelClosed {
                peer: target.clone(),
                channel: id,
            },
        );
        self.emit(
            &target,
            TransportEvent::ChannelClosed {
                peer: opener,
                channel: id,
            },
        );
    }
}

impl MockNetwork {
    /// Create an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, NetworkInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a new endpoint on this network.
    pub fn transport(&self) -> MockTransport {
        MockTransport {
            network: self.clone(),
            state: Arc::new(Mutex::new(TransportState::default())),
        }
    }

    /// Get all messages that were delivered.
    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.lock().sent.clone()
    }

    /// Messages delivered from `from` to `to`.
    pub fn sent_between(&self, from: &PeerId, to: &PeerId) -> Vec<SentMessage> {
        self.lock()
            .sent
            .iter()
            .filter(|m| &m.from == from && &m.to == to)
            .cloned()
            .collect()
    }

    /// Forget captured messages.
    pub fn clear_sent(&self) {
        self.lock().sent.clear();
    }

    /// Cause the next channel send anywhere on the network to fail.
    pub fn fail_next_send(&self, error: &str) {
        self.lock().fail_next_send = Some(error.to_string());
    }

    /// Silently drop everything sent to or from `peer`.
    ///
    /// Channels stay open and no close is reported, like a link that stopped
    /// delivering without telling anyone.
    pub fn mute(&self, peer: &PeerId) {
        self.lock().muted.insert(peer.clone());
    }

    /// Undo [`mute`](Self::mute).
    pub fn unmute(&self, peer: &PeerId) {
        self.lock().muted.remove(peer);
    }

    /// Whether `peer` currently has an attached endpoint.
    pub fn is_attached(&self, peer: &PeerId) -> bool {
        self.lock().endpoints.contains_key(peer)
    }

    /// Most recent open channel opened by `opener` towards `target`.
    pub fn channel_between(&self, opener: &PeerId, target: &PeerId) -> Option<ChannelId> {
        self.lock()
            .links
            .iter()
            .filter(|(_, l)| l.open && &l.opener == opener && &l.target == target)
            .map(|(id, _)| *id)
            .max()
    }

    /// Number of open channels on the network.
    pub fn open_channel_count(&self) -> usize {
        self.lock().links.values().filter(|l| l.open).count()
    }

    /// Deliver an arbitrary event to `peer`'s endpoint.
    pub fn emit_to(&self, peer: &PeerId, event: TransportEvent<MockChannel>) -> bool {
        match self.lock().endpoints.get(peer) {
            Some(sink) => sink.emit(event),
            None => false,
        }
    }

    /// Close a channel from the network side. Both ends see `ChannelClosed`.
    pub fn close_channel(&self, id: ChannelId) {
        self.lock().close(id);
    }

    fn attach_endpoint(&self, peer: &PeerId, sink: EventSink<MockChannel>) {
        self.lock().endpoints.insert(peer.clone(), sink);
    }

    fn detach_endpoint(&self, peer: &PeerId) {
        let mut inner = self.lock();
        let ids: Vec<ChannelId> = inner
            .links
            .iter()
            .filter(|(_, l)| l.open && (&l.opener == peer || &l.target == peer))
            .map(|(id, _)| *id)
            .collect();

        // Remove the sink first: the detached side hears nothing more
        inner.endpoints.remove(peer);
        for id in ids {
            inner.close(id);
        }
    }

    /// Create a link. A stalled link never opens and announces nothing.
    fn open_link(
        &self,
        opener: &PeerId,
        target: &PeerId,
        stalled: bool,
    ) -> Result<MockChannel, TransportError> {
        let mut inner = self.lock();
        if !inner.endpoints.contains_key(target) {
            return Err(TransportError::PeerUnavailable(target.to_string()));
        }

        inner.next_channel += 1;
        let id = ChannelId(inner.next_channel);
        inner.links.insert(
            id,
            Link {
                opener: opener.clone(),
                target: target.clone(),
                open: !stalled,
            },
        );

        let outbound = MockChannel {
            id,
            local: opener.clone(),
            remote: target.clone(),
            network: self.clone(),
        };
        if stalled {
            return Ok(outbound);
        }

        let inbound = MockChannel {
            id,
            local: target.clone(),
            remote: opener.clone(),
            network: self.clone(),
        };
        inner.emit(target, TransportEvent::Incoming { channel: inbound });
        inner.emit(
            opener,
            TransportEvent::ChannelOpen {
                peer: target.clone(),
                channel: id,
            },
        );

        Ok(outbound)
    }

    fn link_open(&self, id: ChannelId) -> bool {
        self.lock().links.get(&id).map(|l| l.open).unwrap_or(false)
    }

    fn deliver(&self, id: ChannelId, from: &PeerId, bytes: &[u8]) -> Result<(), TransportError> {
        let mut inner = self.lock();
        let to = match inner.links.get(&id) {
            Some(link) if link.open => link.other(from).clone(),
            _ => return Err(TransportError::ChannelClosed),
        };

        if let Some(error) = inner.fail_next_send.take() {
            return Err(TransportError::SendFailed(error));
        }

        if inner.muted.contains(from) || inner.muted.contains(&to) {
            return Ok(());
        }

        inner.sent.push(SentMessage {
            from: from.clone(),
            to: to.clone(),
            channel: id,
            bytes: bytes.to_vec(),
        });
        inner.emit(
            &to,
            TransportEvent::Data {
                peer: from.clone(),
                channel: id,
                bytes: bytes.to_vec(),
            },
        );
        Ok(())
    }
}

/// One end of a mock channel.
#[derive(Clone)]
pub struct MockChannel {
    id: ChannelId,
    local: PeerId,
    remote: PeerId,
    network: MockNetwork,
}

impl fmt::Debug for MockChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockChannel")
            .field("id", &self.id)
            .field("local", &self.local)
            .field("remote", &self.remote)
            .finish()
    }
}

#[async_trait]
impl Channel for MockChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn peer(&self) -> &PeerId {
        &self.remote
    }

    fn is_open(&self) -> bool {
        self.network.link_open(self.id)
    }

    async fn send(&self, bytes: &[u8]) -> Result<(), TransportError> {
        self.network.deliver(self.id, &self.local, bytes)
    }

    async fn close(&self) {
        self.network.close_channel(self.id);
    }
}

/// Mock endpoint for testing.
///
/// Counts attaches, remembers the last profile, and can be told to fail.
#[derive(Debug, Clone)]
pub struct MockTransport {
    network: MockNetwork,
    state: Arc<Mutex<TransportState>>,
}

#[derive(Debug, Default)]
struct TransportState {
    local: Option<PeerId>,
    sink: Option<EventSink<MockChannel>>,
    attach_calls: usize,
    attach_count: usize,
    detach_count: usize,
    last_profile: Option<TransportProfile>,
    attach_failures: VecDeque<String>,
    fail_next_open: Option<String>,
    stall_next_open: bool,
    hold_endpoint_open: bool,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Create an endpoint on its own private network.
    pub fn new() -> Self {
        MockNetwork::new().transport()
    }

    fn lock(&self) -> MutexGuard<'_, TransportState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The network this endpoint lives on.
    pub fn network(&self) -> &MockNetwork {
        &self.network
    }

    /// Cause the next attach() to fail with the given error.
    pub fn fail_next_attach(&self, error: &str) {
        self.fail_attaches(1, error);
    }

    /// Cause the next `count` attach() calls to fail with the given error.
    pub fn fail_attaches(&self, count: usize, error: &str) {
        let mut state = self.lock();
        for _ in 0..count {
            state.attach_failures.push_back(error.to_string());
        }
    }

    /// Cause the next open() to fail with the given error.
    pub fn fail_next_open(&self, error: &str) {
        self.lock().fail_next_open = Some(error.to_string());
    }

    /// Make the next `open()` return a channel that never becomes usable.
    ///
    /// Neither side hears about it until an event is injected.
    pub fn stall_next_open(&self) {
        self.lock().stall_next_open = true;
    }

    /// Stop announcing `EndpointOpen` after attach.
    pub fn hold_endpoint_open(&self, hold: bool) {
        self.lock().hold_endpoint_open = hold;
    }

    /// Number of attach() calls, failed ones included.
    pub fn attach_calls(&self) -> usize {
        self.lock().attach_calls
    }

    /// Number of successful attaches.
    pub fn attach_count(&self) -> usize {
        self.lock().attach_count
    }

    /// Number of detaches of an attached endpoint.
    pub fn detach_count(&self) -> usize {
        self.lock().detach_count
    }

    /// Profile passed to the most recent successful attach.
    pub fn last_profile(&self) -> Option<TransportProfile> {
        self.lock().last_profile.clone()
    }

    /// Whether the endpoint is attached.
    pub fn is_attached(&self) -> bool {
        self.lock().local.is_some()
    }

    /// Session generation of the current attach.
    pub fn session(&self) -> Option<u64> {
        self.lock().sink.as_ref().map(EventSink::session)
    }

    /// Push an event into the current session, as if the transport raised it.
    pub fn inject(&self, event: TransportEvent<MockChannel>) -> bool {
        match self.lock().sink.as_ref() {
            Some(sink) => sink.emit(event),
            None => false,
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Channel = MockChannel;

    async fn attach(
        &self,
        local: &PeerId,
        profile: &TransportProfile,
        events: EventSink<MockChannel>,
    ) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.attach_calls += 1;

        // Check for forced failure
        if let Some(error) = state.attach_failures.pop_front() {
            return Err(TransportError::ConnectionFailed(error));
        }

        if let Some(previous) = state.local.take() {
            self.network.detach_endpoint(&previous);
        }

        self.network.attach_endpoint(local, events.clone());
        state.local = Some(local.clone());
        state.attach_count += 1;
        state.last_profile = Some(profile.clone());
        if !state.hold_endpoint_open {
            events.emit(TransportEvent::EndpointOpen);
        }
        state.sink = Some(events);
        Ok(())
    }

    async fn open(&self, target: &PeerId) -> Result<MockChannel, TransportError> {
        let (local, stalled) = {
            let mut state = self.lock();
            if let Some(error) = state.fail_next_open.take() {
                return Err(TransportError::ConnectionFailed(error));
            }
            let local = state.local.clone().ok_or(TransportError::NotAttached)?;
            (local, std::mem::take(&mut state.stall_next_open))
        };
        self.network.open_link(&local, target, stalled)
    }

    async fn detach(&self) {
        let mut state = self.lock();
        if let Some(local) = state.local.take() {
            self.network.detach_endpoint(&local);
            state.detach_count += 1;
        }
        state.sink = None;
    }
}
