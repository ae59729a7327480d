//! SyncEngine - the main interface for TaskFlow sync.
//!
//! This module provides [`SyncEngine`], the API applications use to keep
//! replicas of their task state in step across devices.
//!
//! # Architecture
//!
//! The engine uses the pure state machines from sync-core for status,
//! registry, routing and backoff decisions, and interprets the resulting
//! actions to perform actual I/O via the [`Transport`] trait.
//!
//! ```text
//! Application → SyncEngine → Transport → Network
//!                  ↓    ↑
//!      sync-core      TransportEvent queue (single consumer)
//! ```
//!
//! All mutable state lives behind one async mutex. Transport events are
//! consumed by a single task in arrival order. Handler calls are queued under
//! the lock in the order the state changed and delivered after it is
//! released, one at a time, so a handler may call back into the engine.
//!
//! # Example
//!
//! ```ignore
//! use taskflow_sync_client::{EngineConfig, MockNetwork, SyncEngine};
//!
//! let network = MockNetwork::new();
//! let engine = SyncEngine::new(EngineConfig::default(), network.transport(), || store.snapshot());
//! engine.set_data_received_handler(|merged| store.replace(merged));
//!
//! engine.initialize().await?;
//! engine.connect_to_peer("taskflow-k3j9x0a2b").await?;
//! engine.broadcast_data(store.snapshot()).await;
//! ```

use futures_util::future::{BoxFuture, FutureExt};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use taskflow_sync_core::{
    merge_with, route, ConnectionRegistry, IgnoreReason, Origin, ReconnectDecision, Reconnector,
    Route, StatusAction, StatusEvent, SyncStatus,
};
use taskflow_sync_types::{now_millis, Message, PeerId, Snapshot};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::{ConnectError, InitError, SyncFailure};
use crate::transport::{
    Channel, ChannelId, EndpointErrorKind, EventReceiver, EventSink, Transport, TransportError,
    TransportEvent, TransportMode,
};

/// Source of the current local snapshot.
///
/// Called when a host answers `sync_request` and when a remote snapshot is
/// merged. Must not block.
pub trait SnapshotProvider: Send + Sync + 'static {
    /// The replica's state right now.
    fn current_snapshot(&self) -> Snapshot;
}

impl<F> SnapshotProvider for F
where
    F: Fn() -> Snapshot + Send + Sync + 'static,
{
    fn current_snapshot(&self) -> Snapshot {
        self()
    }
}

type StatusHandler = Arc<dyn Fn(SyncStatus) + Send + Sync>;
type DataHandler = Arc<dyn Fn(Snapshot) + Send + Sync>;
type ErrorHandler = Arc<dyn Fn(SyncFailure) + Send + Sync>;

/// One handler of each kind; registering replaces.
#[derive(Default)]
struct Handlers {
    status: Option<StatusHandler>,
    data: Option<DataHandler>,
    error: Option<ErrorHandler>,
}

/// Deferred handler invocation.
enum Notice {
    Status(SyncStatus),
    Data(Snapshot),
    Error(SyncFailure),
}

/// Notices in the order their state changes were made.
///
/// Pushed while the state lock is held. Whoever claims the queue delivers
/// everything in it, including notices pushed by others meanwhile, so
/// handlers run one at a time and never see an older status after a newer one.
#[derive(Default)]
struct NoticeQueue {
    pending: StdMutex<VecDeque<Notice>>,
    draining: AtomicBool,
}

impl NoticeQueue {
    fn pending(&self) -> MutexGuard<'_, VecDeque<Notice>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, notices: Vec<Notice>) {
        self.pending().extend(notices);
    }

    fn pop(&self) -> Option<Notice> {
        self.pending().pop_front()
    }

    fn is_empty(&self) -> bool {
        self.pending().is_empty()
    }

    /// Become the deliverer. `None` if another caller already is.
    fn claim(&self) -> Option<DrainGuard<'_>> {
        self.draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| DrainGuard(&self.draining))
    }
}

/// Releases the deliverer role, also when a handler panics.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct EngineState<C> {
    status: SyncStatus,
    registry: ConnectionRegistry<C>,
    reconnector: Reconnector,
    /// Generation of the current attach. Events tagged otherwise are stale.
    session: u64,
    attached: bool,
    mode: TransportMode,
    events: Option<EventReceiver<C>>,
    event_loop: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
    syncing_revert: Option<JoinHandle<()>>,
    mode_switch: Option<JoinHandle<()>>,
}

struct EngineInner<T: Transport> {
    config: EngineConfig,
    peer_id: PeerId,
    transport: T,
    provider: Box<dyn SnapshotProvider>,
    sink: EventSink<T::Channel>,
    state: Mutex<EngineState<T::Channel>>,
    handlers: StdMutex<Handlers>,
    notices: NoticeQueue,
}

/// The peer-to-peer sync engine.
///
/// Cheap to clone; clones share one engine.
pub struct SyncEngine<T: Transport> {
    inner: Arc<EngineInner<T>>,
}

impl<T: Transport> Clone for SyncEngine<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> SyncEngine<T> {
    /// Create a new engine.
    ///
    /// The peer id is generated here and stays fixed for the engine's
    /// lifetime, including across re-initialization and mode switches.
    pub fn new(config: EngineConfig, transport: T, provider: impl SnapshotProvider) -> Self {
        let peer_id = PeerId::generate_with_prefix(&config.peer_id_prefix);
        let (sink, events) = EventSink::channel();
        let reconnector = Reconnector::new(config.reconnect_policy());

        let state = EngineState {
            status: SyncStatus::Disconnected,
            registry: ConnectionRegistry::new(),
            reconnector,
            session: 0,
            attached: false,
            mode: TransportMode::Standard,
            events: Some(events),
            event_loop: None,
            heartbeat: None,
            reconnect: None,
            syncing_revert: None,
            mode_switch: None,
        };

        Self {
            inner: Arc::new(EngineInner {
                config,
                peer_id,
                transport,
                provider: Box::new(provider),
                sink,
                state: Mutex::new(state),
                handlers: StdMutex::new(Handlers::default()),
                notices: NoticeQueue::default(),
            }),
        }
    }

    /// Attach the local endpoint with the standard profile.
    ///
    /// Publishes `connecting`; `connected` follows when the transport reports
    /// the endpoint open. Calling again tears down the current session first
    /// and resets the reconnect attempts. On failure the error is also
    /// reported to the error handler, status becomes `error`, and nothing is
    /// retried automatically.
    pub async fn initialize(&self) -> Result<(), InitError> {
        let inner = &self.inner;
        let mut out = Vec::new();

        let result = {
            let mut state = inner.state.lock().await;
            if let Some(events) = state.events.take() {
                let task = event_loop(Arc::downgrade(inner), events);
                state.event_loop = Some(tokio::spawn(task));
            }

            cancel(&mut state.reconnect);
            cancel(&mut state.mode_switch);
            state.reconnector.reset();
            inner.teardown_session(&mut state).await;
            inner
                .apply(&mut state, StatusEvent::InitRequested, &mut out)
                .await;

            state.mode = TransportMode::Standard;
            let result = match inner.attach(&mut state).await {
                Ok(()) => Ok(()),
                Err(e) => {
                    let err = InitError::from(e);
                    error!(error = %err, "failed to initialize transport");
                    out.push(Notice::Error(SyncFailure::Init(err.clone())));
                    inner.apply(&mut state, StatusEvent::Failed, &mut out).await;
                    Err(err)
                }
            };
            inner.notices.push(out);
            result
        };

        inner.flush();
        result
    }

    /// Open a channel to `target`.
    ///
    /// Returns once the channel is registered. A `sync_request` is sent as
    /// soon as the transport reports the channel open.
    pub async fn connect_to_peer(&self, target: &str) -> Result<(), ConnectError> {
        let inner = &self.inner;
        let mut out = Vec::new();
        let result = {
            let mut state = inner.state.lock().await;
            let result = inner.connect(&mut state, target, &mut out).await;
            inner.notices.push(out);
            result
        };
        inner.flush();
        result
    }

    /// Send `snapshot` as a `data_update` to every open connection.
    ///
    /// No acknowledgment is awaited; send failures are logged.
    pub async fn broadcast_data(&self, snapshot: Snapshot) {
        let inner = &self.inner;
        let channels: Vec<T::Channel> = {
            let state = inner.state.lock().await;
            state
                .registry
                .open_connections()
                .map(|(_, c)| c.channel.clone())
                .collect()
        };

        let message = Message::data_update(&inner.peer_id, now_millis(), snapshot);
        let mut sent = 0usize;
        for channel in &channels {
            if inner.send_message(channel, &message).await {
                sent += 1;
            }
        }
        debug!(sent, "broadcast data_update");
    }

    /// Full teardown.
    ///
    /// Stops the heartbeat, cancels pending reconnect and mode switch timers,
    /// closes every connection, detaches the transport, then publishes
    /// `disconnected`. Idempotent.
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        let mut out = Vec::new();
        {
            let mut state = inner.state.lock().await;
            // Anything the old session still emits is stale
            state.session += 1;
            inner
                .apply(&mut state, StatusEvent::DisconnectRequested, &mut out)
                .await;
            inner.notices.push(out);
        }
        info!(peer_id = %inner.peer_id, "disconnected");
        inner.flush();
    }

    /// This engine's peer id.
    pub fn peer_id(&self) -> &PeerId {
        &self.inner.peer_id
    }

    /// Number of registered connections.
    pub async fn connection_count(&self) -> usize {
        self.inner.state.lock().await.registry.count()
    }

    /// True iff at least one connection is registered.
    pub async fn is_connected(&self) -> bool {
        !self.inner.state.lock().await.registry.is_empty()
    }

    /// Current status.
    pub async fn status(&self) -> SyncStatus {
        self.inner.state.lock().await.status
    }

    /// Whether this endpoint latched host status.
    pub async fn is_host(&self) -> bool {
        self.inner.state.lock().await.registry.is_host()
    }

    /// Profile flavour of the current (or last) attach.
    pub async fn transport_mode(&self) -> TransportMode {
        self.inner.state.lock().await.mode
    }

    /// Automatic reconnect attempts since the last successful attach.
    pub async fn reconnect_attempts(&self) -> u32 {
        self.inner.state.lock().await.reconnector.attempts()
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Get a reference to the underlying transport (for testing).
    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// Register the status handler, replacing any previous one.
    pub fn set_status_change_handler<F>(&self, handler: F)
    where
        F: Fn(SyncStatus) + Send + Sync + 'static,
    {
        self.inner.handlers().status = Some(Arc::new(handler));
    }

    /// Register the data handler, replacing any previous one.
    ///
    /// Receives the merge of the local snapshot with each accepted remote one.
    pub fn set_data_received_handler<F>(&self, handler: F)
    where
        F: Fn(Snapshot) + Send + Sync + 'static,
    {
        self.inner.handlers().data = Some(Arc::new(handler));
    }

    /// Register the error handler, replacing any previous one.
    pub fn set_error_handler<F>(&self, handler: F)
    where
        F: Fn(SyncFailure) + Send + Sync + 'static,
    {
        self.inner.handlers().error = Some(Arc::new(handler));
    }
}

impl<T: Transport> EngineInner<T> {
    fn handlers(&self) -> MutexGuard<'_, Handlers> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver queued notices unless another caller is already doing so.
    /// Must be called without the state lock.
    fn flush(&self) {
        loop {
            let Some(guard) = self.notices.claim() else {
                return;
            };
            while let Some(notice) = self.notices.pop() {
                self.deliver(notice);
            }
            drop(guard);
            // A push that lost the claim race while we were finishing
            if self.notices.is_empty() {
                return;
            }
        }
    }

    fn deliver(&self, notice: Notice) {
        match notice {
            Notice::Status(status) => {
                info!(status = %status, "status changed");
                let handler = self.handlers().status.clone();
                if let Some(handler) = handler {
                    handler(status);
                }
            }
            Notice::Data(snapshot) => {
                let handler = self.handlers().data.clone();
                if let Some(handler) = handler {
                    handler(snapshot);
                }
            }
            Notice::Error(failure) => {
                let handler = self.handlers().error.clone();
                if let Some(handler) = handler {
                    handler(failure);
                }
            }
        }
    }

    /// Feed the status machine and execute its actions in order.
    async fn apply(
        self: &Arc<Self>,
        state: &mut EngineState<T::Channel>,
        event: StatusEvent,
        out: &mut Vec<Notice>,
    ) {
        let (next, actions) = state.status.on_event(event);
        state.status = next;

        for action in actions {
            match action {
                StatusAction::Publish(status) => out.push(Notice::Status(status)),
                StatusAction::StartHeartbeat => self.start_heartbeat(state),
                StatusAction::StopHeartbeat => cancel(&mut state.heartbeat),
                StatusAction::ScheduleSyncingRevert => {
                    cancel(&mut state.syncing_revert);
                    let delay = self.config.syncing_display();
                    let task = revert_syncing_after(Arc::downgrade(self), delay);
                    state.syncing_revert = Some(tokio::spawn(task));
                }
                StatusAction::CancelSyncingRevert => cancel(&mut state.syncing_revert),
                StatusAction::CancelReconnect => {
                    cancel(&mut state.reconnect);
                    cancel(&mut state.mode_switch);
                }
                StatusAction::CloseConnections => {
                    for (peer, conn) in state.registry.drain() {
                        debug!(%peer, "closing connection");
                        conn.channel.close().await;
                    }
                }
                StatusAction::DetachTransport => {
                    if state.attached {
                        self.transport.detach().await;
                        state.attached = false;
                    }
                }
            }
        }
    }

    fn start_heartbeat(self: &Arc<Self>, state: &mut EngineState<T::Channel>) {
        if state.heartbeat.is_some() {
            return;
        }
        let interval = self.config.heartbeat_policy().interval;
        if interval.is_zero() {
            warn!("heartbeat interval is zero, heartbeat disabled");
            return;
        }
        let task = heartbeat_loop(Arc::downgrade(self), interval);
        state.heartbeat = Some(tokio::spawn(task));
    }

    /// Attach under a fresh session generation using the current mode.
    async fn attach(&self, state: &mut EngineState<T::Channel>) -> Result<(), TransportError> {
        state.session += 1;
        let profile = self.config.transport.profile(state.mode);
        let sink = self.sink.for_session(state.session);
        self.transport.attach(&self.peer_id, &profile, sink).await?;
        state.attached = true;
        info!(
            peer_id = %self.peer_id,
            mode = ?state.mode,
            session = state.session,
            "endpoint attached"
        );
        Ok(())
    }

    /// Invalidate the current session: drop its connections and detach.
    async fn teardown_session(&self, state: &mut EngineState<T::Channel>) {
        state.session += 1;
        cancel(&mut state.heartbeat);
        cancel(&mut state.syncing_revert);
        for (_, conn) in state.registry.drain() {
            conn.channel.close().await;
        }
        if state.attached {
            self.transport.detach().await;
            state.attached = false;
        }
    }

    async fn connect(
        self: &Arc<Self>,
        state: &mut EngineState<T::Channel>,
        target: &str,
        out: &mut Vec<Notice>,
    ) -> Result<(), ConnectError> {
        let peer = match PeerId::new(target) {
            Ok(peer) => peer,
            Err(_) => {
                let err = ConnectError::InvalidPeerId(target.to_string());
                return Err(self.connect_failed(state, err, out).await);
            }
        };
        if peer == self.peer_id {
            return Err(self.connect_failed(state, ConnectError::OwnPeerId, out).await);
        }
        if !state.attached {
            return Err(self
                .connect_failed(state, ConnectError::NotInitialized, out)
                .await);
        }

        self.apply(state, StatusEvent::ConnectRequested, out).await;
        info!(%peer, "connecting to peer");

        match self.transport.open(&peer).await {
            Ok(channel) => {
                let id = channel.id();
                let replaced = state
                    .registry
                    .register(peer, channel, Origin::Outbound, false, now());
                if let Some(old) = replaced {
                    if old.channel.id() != id {
                        old.channel.close().await;
                    }
                }
                Ok(())
            }
            Err(source) => {
                let err = ConnectError::Open { peer, source };
                Err(self.connect_failed(state, err, out).await)
            }
        }
    }

    async fn connect_failed(
        self: &Arc<Self>,
        state: &mut EngineState<T::Channel>,
        err: ConnectError,
        out: &mut Vec<Notice>,
    ) -> ConnectError {
        warn!(error = %err, "connect failed");
        out.push(Notice::Error(SyncFailure::Connect(err.clone())));
        self.apply(state, StatusEvent::Failed, out).await;
        err
    }

    /// Encode and send. Returns false if nothing went out.
    async fn send_message(&self, channel: &T::Channel, message: &Message) -> bool {
        if !channel.is_open() {
            debug!(
                peer = %channel.peer(),
                kind = message.kind.as_str(),
                "skipping send on closed channel"
            );
            return false;
        }
        let bytes = match message.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "failed to encode message");
                return false;
            }
        };
        match channel.send(&bytes).await {
            Ok(()) => {
                debug!(peer = %channel.peer(), kind = message.kind.as_str(), "sent");
                true
            }
            Err(e) => {
                warn!(peer = %channel.peer(), error = %e, "failed to send message");
                false
            }
        }
    }

    // ===========================================
    // Transport events
    // ===========================================

    async fn handle_event(self: &Arc<Self>, session: u64, event: TransportEvent<T::Channel>) {
        let mut out = Vec::new();
        {
            let mut state = self.state.lock().await;
            if session != state.session {
                debug!(session, current = state.session, "dropping event from stale session");
                return;
            }

            match event {
                TransportEvent::EndpointOpen => {
                    state.reconnector.reset();
                    let connections = state.registry.count();
                    info!(peer_id = %self.peer_id, "endpoint open");
                    self.apply(&mut state, StatusEvent::EndpointOpened { connections }, &mut out)
                        .await;
                }
                TransportEvent::Incoming { channel } => {
                    self.on_incoming(&mut state, channel, &mut out).await;
                }
                TransportEvent::ChannelOpen { peer, channel } => {
                    self.on_channel_open(&mut state, peer, channel, &mut out)
                        .await;
                }
                TransportEvent::Data {
                    peer,
                    channel,
                    bytes,
                } => {
                    self.on_data(&mut state, peer, channel, &bytes, &mut out)
                        .await;
                }
                TransportEvent::ChannelClosed { peer, channel } => {
                    self.on_channel_gone(&mut state, peer, channel, None, &mut out)
                        .await;
                }
                TransportEvent::ChannelError {
                    peer,
                    channel,
                    reason,
                } => {
                    self.on_channel_gone(&mut state, peer, channel, Some(reason), &mut out)
                        .await;
                }
                TransportEvent::EndpointLost => {
                    self.on_endpoint_failure(&mut state, None, &mut out).await;
                }
                TransportEvent::EndpointError { kind, reason } => {
                    let switch = kind == EndpointErrorKind::ConnectivityLost
                        && self.config.mode_switch.enabled
                        && state.mode == TransportMode::Standard;
                    if switch {
                        self.begin_mode_switch(&mut state, reason, &mut out).await;
                    } else {
                        self.on_endpoint_failure(&mut state, Some(reason), &mut out)
                            .await;
                    }
                }
            }
            self.notices.push(out);
        }
        self.flush();
    }

    async fn on_incoming(
        self: &Arc<Self>,
        state: &mut EngineState<T::Channel>,
        channel: T::Channel,
        out: &mut Vec<Notice>,
    ) {
        let peer = channel.peer().clone();
        let id = channel.id();
        let open = channel.is_open();
        info!(%peer, channel = %id, "incoming connection");

        let replaced = state
            .registry
            .register(peer, channel, Origin::Inbound, open, now());
        if let Some(old) = replaced {
            if old.channel.id() != id {
                old.channel.close().await;
            }
        }
        self.apply(state, StatusEvent::PeerConnected, out).await;
    }

    async fn on_channel_open(
        self: &Arc<Self>,
        state: &mut EngineState<T::Channel>,
        peer: PeerId,
        id: ChannelId,
        out: &mut Vec<Notice>,
    ) {
        let current = state
            .registry
            .get(&peer)
            .filter(|c| c.channel.id() == id)
            .map(|c| (c.channel.clone(), c.origin));
        let Some((channel, origin)) = current else {
            debug!(%peer, channel = %id, "open for unknown or replaced channel");
            return;
        };

        state.registry.mark_open(&peer);
        info!(%peer, channel = %id, "connection open");
        if origin == Origin::Outbound {
            let request = Message::sync_request(&self.peer_id, now_millis());
            self.send_message(&channel, &request).await;
        }
        self.apply(state, StatusEvent::PeerConnected, out).await;
    }

    async fn on_data(
        self: &Arc<Self>,
        state: &mut EngineState<T::Channel>,
        peer: PeerId,
        id: ChannelId,
        bytes: &[u8],
        out: &mut Vec<Notice>,
    ) {
        let message = match Message::from_bytes(bytes) {
            Ok(message) => message,
            Err(e) => {
                warn!(%peer, error = %e, "dropping malformed message");
                out.push(Notice::Error(SyncFailure::MessageDecode {
                    peer,
                    reason: e.to_string(),
                }));
                return;
            }
        };

        debug!(%peer, kind = message.kind.as_str(), "received");

        let reply_to = state
            .registry
            .get(&peer)
            .filter(|c| c.channel.id() == id)
            .map(|c| c.channel.clone());
        if reply_to.is_some() {
            state.registry.touch(&peer, now());
        }

        match route(message, state.registry.is_host()) {
            Route::ReplySnapshot => {
                if let Some(channel) = reply_to {
                    let snapshot = self.provider.current_snapshot();
                    let response = Message::sync_response(&self.peer_id, now_millis(), snapshot);
                    self.send_message(&channel, &response).await;
                }
            }
            Route::ReplyPong => {
                if let Some(channel) = reply_to {
                    let pong = Message::pong(&self.peer_id, now_millis());
                    self.send_message(&channel, &pong).await;
                }
            }
            Route::Deliver(remote) => {
                let local = self.provider.current_snapshot();
                let merged = merge_with(&local, &remote, self.config.merge.policy);
                info!(
                    %peer,
                    tasks = merged.tasks.len(),
                    categories = merged.categories.len(),
                    "merged remote snapshot"
                );
                self.apply(state, StatusEvent::SnapshotAccepted, out).await;
                out.push(Notice::Data(merged));
            }
            Route::Alive => {}
            Route::Ignore(IgnoreReason::NotHost) => {
                debug!(%peer, "ignoring sync_request, not host");
            }
            Route::Ignore(IgnoreReason::MissingData) => {
                warn!(%peer, "data message without snapshot");
            }
        }
    }

    /// A channel closed or failed.
    async fn on_channel_gone(
        self: &Arc<Self>,
        state: &mut EngineState<T::Channel>,
        peer: PeerId,
        id: ChannelId,
        reason: Option<String>,
        out: &mut Vec<Notice>,
    ) {
        let removal = state.registry.unregister_if(&peer, |c| c.id() == id);
        let never_opened = removal
            .removed
            .as_ref()
            .is_some_and(|c| c.origin == Origin::Outbound && !c.open);

        if never_opened {
            let source = match reason {
                Some(reason) => TransportError::ConnectionFailed(reason),
                None => TransportError::ChannelClosed,
            };
            let err = ConnectError::Open { peer, source };
            warn!(channel = %id, error = %err, "channel failed before opening");
            if let Some(conn) = &removal.removed {
                conn.channel.close().await;
            }
            out.push(Notice::Error(SyncFailure::Connect(err)));
        } else {
            match reason {
                Some(reason) => {
                    warn!(%peer, channel = %id, %reason, "connection error");
                    if let Some(conn) = &removal.removed {
                        conn.channel.close().await;
                    }
                    out.push(Notice::Error(SyncFailure::Connection {
                        peer: Some(peer),
                        reason,
                    }));
                }
                None if removal.removed.is_some() => {
                    info!(%peer, channel = %id, "connection closed");
                }
                None => {
                    debug!(%peer, channel = %id, "close for unknown or replaced channel");
                }
            }
        }

        if removal.now_empty {
            self.apply(state, StatusEvent::RegistryEmptied, out).await;
        }
        if never_opened {
            self.apply(state, StatusEvent::Failed, out).await;
        }
    }

    /// Endpoint lost or failed for a reason a mode switch does not cover.
    async fn on_endpoint_failure(
        self: &Arc<Self>,
        state: &mut EngineState<T::Channel>,
        reason: Option<String>,
        out: &mut Vec<Notice>,
    ) {
        match reason {
            Some(reason) => {
                warn!(%reason, "endpoint error");
                out.push(Notice::Error(SyncFailure::Connection { peer: None, reason }));
            }
            None => warn!("endpoint lost"),
        }
        self.teardown_session(state).await;
        self.apply(state, StatusEvent::EndpointLost, out).await;
        self.schedule_reconnect(state, out);
    }

    fn schedule_reconnect(
        self: &Arc<Self>,
        state: &mut EngineState<T::Channel>,
        out: &mut Vec<Notice>,
    ) {
        cancel(&mut state.reconnect);
        match state.reconnector.on_failure() {
            ReconnectDecision::Retry { attempt, delay } => {
                info!(attempt, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
                let task = reconnect_after(Arc::downgrade(self), delay);
                state.reconnect = Some(tokio::spawn(task));
            }
            ReconnectDecision::GiveUp { attempts } => {
                error!(attempts, "giving up on reconnection");
                out.push(Notice::Error(SyncFailure::ReconnectExhausted { attempts }));
            }
        }
    }

    async fn begin_mode_switch(
        self: &Arc<Self>,
        state: &mut EngineState<T::Channel>,
        reason: String,
        out: &mut Vec<Notice>,
    ) {
        warn!(%reason, "connectivity lost, switching to local-only mode");
        out.push(Notice::Error(SyncFailure::ConnectivityLost { reason }));
        self.teardown_session(state).await;

        cancel(&mut state.reconnect);
        cancel(&mut state.mode_switch);
        let task = switch_mode_after(Arc::downgrade(self), self.config.mode_switch_delay());
        state.mode_switch = Some(tokio::spawn(task));
    }

    // ===========================================
    // Timer callbacks
    // ===========================================

    async fn heartbeat_tick(self: &Arc<Self>) {
        let mut out = Vec::new();
        {
            let mut state = self.state.lock().await;

            if let Some(limit) = self.config.heartbeat_policy().silence_limit() {
                for peer in state.registry.silent_longer_than(limit, now()) {
                    let removal = state.registry.unregister(&peer);
                    if let Some(conn) = removal.removed {
                        warn!(%peer, silent_secs = limit.as_secs(), "closing silent connection");
                        conn.channel.close().await;
                        out.push(Notice::Error(SyncFailure::Connection {
                            peer: Some(peer),
                            reason: format!("nothing heard for over {}s", limit.as_secs()),
                        }));
                    }
                    if removal.now_empty {
                        self.apply(&mut state, StatusEvent::RegistryEmptied, &mut out)
                            .await;
                    }
                }
            }

            let channels: Vec<T::Channel> = state
                .registry
                .open_connections()
                .map(|(_, c)| c.channel.clone())
                .collect();
            let ping = Message::ping(&self.peer_id, now_millis());
            for channel in &channels {
                self.send_message(channel, &ping).await;
            }
            self.notices.push(out);
        }
        self.flush();
    }

    async fn syncing_elapsed(self: &Arc<Self>) {
        let mut out = Vec::new();
        {
            let mut state = self.state.lock().await;
            state.syncing_revert = None;
            self.apply(&mut state, StatusEvent::SyncingElapsed, &mut out)
                .await;
            self.notices.push(out);
        }
        self.flush();
    }

    async fn retry_attach(self: &Arc<Self>) {
        let mut out = Vec::new();
        {
            let mut state = self.state.lock().await;
            state.reconnect = None;
            let attempt = state.reconnector.attempts();
            info!(attempt, "reconnecting");
            self.apply(&mut state, StatusEvent::InitRequested, &mut out)
                .await;

            if let Err(e) = self.attach(&mut state).await {
                warn!(attempt, error = %e, "reconnect failed");
                out.push(Notice::Error(SyncFailure::Connection {
                    peer: None,
                    reason: e.to_string(),
                }));
                self.apply(&mut state, StatusEvent::EndpointLost, &mut out)
                    .await;
                self.schedule_reconnect(&mut state, &mut out);
            }
            self.notices.push(out);
        }
        self.flush();
    }

    async fn finish_mode_switch(self: &Arc<Self>) {
        let mut out = Vec::new();
        {
            let mut state = self.state.lock().await;
            state.mode_switch = None;
            state.mode = TransportMode::LocalOnly;

            match self.attach(&mut state).await {
                Ok(()) => {
                    self.apply(&mut state, StatusEvent::InitRequested, &mut out)
                        .await;
                }
                Err(e) => {
                    error!(error = %e, "failed to switch to local-only mode");
                    out.push(Notice::Error(SyncFailure::ModeSwitchFailed {
                        reason: e.to_string(),
                    }));
                    self.apply(&mut state, StatusEvent::Failed, &mut out).await;
                }
            }
            self.notices.push(out);
        }
        self.flush();
    }
}

impl<T: Transport> Drop for EngineInner<T> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        for slot in [
            &mut state.event_loop,
            &mut state.heartbeat,
            &mut state.reconnect,
            &mut state.syncing_revert,
            &mut state.mode_switch,
        ] {
            cancel(slot);
        }
    }
}

fn cancel(slot: &mut Option<JoinHandle<()>>) {
    if let Some(handle) = slot.take() {
        handle.abort();
    }
}

/// Registry clock. Follows tokio's clock so paused-time tests see it move.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

// Background tasks hold a weak reference and stop once the engine is gone.

fn event_loop<T: Transport>(
    engine: Weak<EngineInner<T>>,
    mut events: EventReceiver<T::Channel>,
) -> BoxFuture<'static, ()> {
    async move {
        while let Some((session, event)) = events.recv().await {
            let Some(inner) = engine.upgrade() else {
                break;
            };
            inner.handle_event(session, event).await;
        }
        debug!("event loop stopped");
    }
    .boxed()
}

fn heartbeat_loop<T: Transport>(
    engine: Weak<EngineInner<T>>,
    interval: Duration,
) -> BoxFuture<'static, ()> {
    async move {
        let start = tokio::time::Instant::now() + interval;
        let mut ticker = tokio::time::interval_at(start, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(inner) = engine.upgrade() else {
                break;
            };
            inner.heartbeat_tick().await;
        }
    }
    .boxed()
}

fn revert_syncing_after<T: Transport>(
    engine: Weak<EngineInner<T>>,
    delay: Duration,
) -> BoxFuture<'static, ()> {
    async move {
        tokio::time::sleep(delay).await;
        if let Some(inner) = engine.upgrade() {
            inner.syncing_elapsed().await;
        }
    }
    .boxed()
}

fn reconnect_after<T: Transport>(
    engine: Weak<EngineInner<T>>,
    delay: Duration,
) -> BoxFuture<'static, ()> {
    async move {
        tokio::time::sleep(delay).await;
        if let Some(inner) = engine.upgrade() {
            inner.retry_attach().await;
        }
    }
    .boxed()
}

fn switch_mode_after<T: Transport>(
    engine: Weak<EngineInner<T>>,
    delay: Duration,
) -> BoxFuture<'static, ()> {
    async move {
        tokio::time::sleep(delay).await;
        if let Some(inner) = engine.upgrade() {
            inner.finish_mode_switch().await;
        }
    }
    .boxed()
}
