//! Sync status state machine.
//!
//! A pure, side-effect-free machine over the five user-visible statuses.
//! It takes events as input and produces the new status plus the actions
//! the engine must execute, in order. Publishing is itself an action, and
//! is only emitted when the status value actually changes.
//!
//! ```text
//! disconnected → connecting → connected ⇄ syncing
//!       ↑______________________/  |
//!  error ← (any state, unrecoverable failure)
//! ```
//!
//! A snapshot accepted while in `error` still enters `syncing`: a failed
//! connect to one peer does not hide progress with the others.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The single process-wide sync status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// No transport session, or no peers after having had some.
    #[default]
    Disconnected,
    /// Transport session or peer channel being established.
    Connecting,
    /// Endpoint attached and/or peers connected.
    Connected,
    /// A remote snapshot was just accepted for merge. Cosmetic and transient.
    Syncing,
    /// Unrecoverable failure; needs an explicit re-initialize or connect.
    Error,
}

impl SyncStatus {
    /// Process an event and return the new status plus actions to execute.
    ///
    /// This is a pure function. The caller interprets the actions.
    pub fn on_event(self, event: StatusEvent) -> (Self, Vec<StatusAction>) {
        use StatusAction::*;

        let (next, mut actions) = match (self, event) {
            (_, StatusEvent::InitRequested) => (Self::Connecting, vec![]),
            (_, StatusEvent::ConnectRequested) => (Self::Connecting, vec![]),

            (_, StatusEvent::EndpointOpened { connections }) => {
                let actions = if connections > 0 {
                    vec![StartHeartbeat]
                } else {
                    vec![]
                };
                (Self::Connected, actions)
            }

            (_, StatusEvent::PeerConnected) => (Self::Connected, vec![StartHeartbeat]),

            (Self::Connected | Self::Syncing, StatusEvent::RegistryEmptied) => (
                Self::Disconnected,
                vec![StopHeartbeat, CancelSyncingRevert],
            ),
            (state, StatusEvent::RegistryEmptied) => (state, vec![StopHeartbeat]),

            (
                Self::Connecting | Self::Connected | Self::Syncing | Self::Error,
                StatusEvent::SnapshotAccepted,
            ) => (Self::Syncing, vec![ScheduleSyncingRevert]),

            (Self::Syncing, StatusEvent::SyncingElapsed) => (Self::Connected, vec![]),

            (_, StatusEvent::EndpointLost) => (Self::Disconnected, vec![CancelSyncingRevert]),

            (_, StatusEvent::Failed) => (Self::Error, vec![CancelSyncingRevert]),

            (_, StatusEvent::DisconnectRequested) => (
                Self::Disconnected,
                vec![
                    StopHeartbeat,
                    CancelReconnect,
                    CancelSyncingRevert,
                    CloseConnections,
                    DetachTransport,
                ],
            ),

            // Ignored in the current state
            (state, _) => (state, vec![]),
        };

        if next != self {
            actions.push(Publish(next));
        }
        (next, actions)
    }

    /// Wire/display name.
    pub fn as_str(self) -> &'static str {
        match self {
            SyncStatus::Disconnected => "disconnected",
            SyncStatus::Connecting => "connecting",
            SyncStatus::Connected => "connected",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Error => "error",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs to the status machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    /// `initialize()` (or a retry) started attaching the local endpoint.
    InitRequested,
    /// The transport reported the local endpoint open.
    EndpointOpened {
        /// Connections currently registered.
        connections: usize,
    },
    /// `connect_to_peer()` started.
    ConnectRequested,
    /// A peer channel became usable (inbound arrival or outbound open).
    PeerConnected,
    /// The last registered connection went away.
    RegistryEmptied,
    /// A remote snapshot was accepted for merge.
    SnapshotAccepted,
    /// The syncing display delay ran out.
    SyncingElapsed,
    /// The local endpoint lost its attachment to the transport fabric.
    EndpointLost,
    /// Unrecoverable failure (init, connect, mode switch).
    Failed,
    /// `disconnect()` was called.
    DisconnectRequested,
}

/// Instructions for the engine, executed in the order given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusAction {
    /// Invoke the status handler with this value.
    Publish(SyncStatus),
    /// Start the heartbeat timer if not running.
    StartHeartbeat,
    /// Stop the heartbeat timer if running.
    StopHeartbeat,
    /// Arm (or re-arm) the syncing → connected revert timer.
    ScheduleSyncingRevert,
    /// Disarm the syncing revert timer.
    CancelSyncingRevert,
    /// Cancel any pending reconnect or mode switch timer.
    CancelReconnect,
    /// Close and unregister every connection.
    CloseConnections,
    /// Tear down the local transport session.
    DetachTransport,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn published(actions: &[StatusAction]) -> Vec<SyncStatus> {
        actions
            .iter()
            .filter_map(|a| match a {
                StatusAction::Publish(s) => Some(*s),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn starts_disconnected() {
        assert_eq!(SyncStatus::default(), SyncStatus::Disconnected);
    }

    #[test]
    fn init_then_open_reaches_connected() {
        let (state, actions) = SyncStatus::Disconnected.on_event(StatusEvent::InitRequested);
        assert_eq!(state, SyncStatus::Connecting);
        assert_eq!(published(&actions), vec![SyncStatus::Connecting]);

        let (state, actions) = state.on_event(StatusEvent::EndpointOpened { connections: 0 });
        assert_eq!(state, SyncStatus::Connected);
        assert_eq!(published(&actions), vec![SyncStatus::Connected]);
        assert!(
            !actions.contains(&StatusAction::StartHeartbeat),
            "no heartbeat without connections"
        );
    }

    #[test]
    fn endpoint_open_with_connections_starts_heartbeat() {
        let (_, actions) =
            SyncStatus::Connecting.on_event(StatusEvent::EndpointOpened { connections: 2 });
        assert!(actions.contains(&StatusAction::StartHeartbeat));
    }

    #[test]
    fn peer_connected_starts_heartbeat() {
        let (state, actions) = SyncStatus::Connecting.on_event(StatusEvent::PeerConnected);
        assert_eq!(state, SyncStatus::Connected);
        assert!(actions.contains(&StatusAction::StartHeartbeat));
    }

    #[test]
    fn no_publish_without_change() {
        let (state, actions) = SyncStatus::Connected.on_event(StatusEvent::PeerConnected);
        assert_eq!(state, SyncStatus::Connected);
        assert!(published(&actions).is_empty());
    }

    #[test]
    fn snapshot_accepted_enters_syncing_and_schedules_revert() {
        let (state, actions) = SyncStatus::Connected.on_event(StatusEvent::SnapshotAccepted);
        assert_eq!(state, SyncStatus::Syncing);
        assert!(actions.contains(&StatusAction::ScheduleSyncingRevert));
        assert_eq!(published(&actions), vec![SyncStatus::Syncing]);

        // A second snapshot while syncing re-arms the timer without publishing.
        let (state, actions) = state.on_event(StatusEvent::SnapshotAccepted);
        assert_eq!(state, SyncStatus::Syncing);
        assert!(actions.contains(&StatusAction::ScheduleSyncingRevert));
        assert!(published(&actions).is_empty());
    }

    #[test]
    fn syncing_reverts_to_connected() {
        let (state, actions) = SyncStatus::Syncing.on_event(StatusEvent::SyncingElapsed);
        assert_eq!(state, SyncStatus::Connected);
        assert_eq!(published(&actions), vec![SyncStatus::Connected]);
    }

    #[test]
    fn stale_syncing_timer_is_ignored() {
        let (state, actions) = SyncStatus::Error.on_event(StatusEvent::SyncingElapsed);
        assert_eq!(state, SyncStatus::Error);
        assert!(actions.is_empty());
    }

    #[test]
    fn snapshot_from_live_peer_recovers_from_error() {
        let (state, actions) = SyncStatus::Error.on_event(StatusEvent::SnapshotAccepted);
        assert_eq!(state, SyncStatus::Syncing);
        assert!(actions.contains(&StatusAction::ScheduleSyncingRevert));
        assert_eq!(published(&actions), vec![SyncStatus::Syncing]);

        let (state, _) = state.on_event(StatusEvent::SyncingElapsed);
        assert_eq!(state, SyncStatus::Connected);
    }

    #[test]
    fn snapshot_ignored_when_disconnected() {
        let (state, actions) = SyncStatus::Disconnected.on_event(StatusEvent::SnapshotAccepted);
        assert_eq!(state, SyncStatus::Disconnected);
        assert!(actions.is_empty());
    }

    #[test]
    fn registry_emptied_disconnects_from_connected_and_syncing() {
        for from in [SyncStatus::Connected, SyncStatus::Syncing] {
            let (state, actions) = from.on_event(StatusEvent::RegistryEmptied);
            assert_eq!(state, SyncStatus::Disconnected);
            assert!(actions.contains(&StatusAction::StopHeartbeat));
            assert_eq!(published(&actions), vec![SyncStatus::Disconnected]);
        }
    }

    #[test]
    fn registry_emptied_elsewhere_only_stops_heartbeat() {
        let (state, actions) = SyncStatus::Connecting.on_event(StatusEvent::RegistryEmptied);
        assert_eq!(state, SyncStatus::Connecting);
        assert_eq!(actions, vec![StatusAction::StopHeartbeat]);
    }

    #[test]
    fn failure_reachable_from_any_state() {
        for from in [
            SyncStatus::Disconnected,
            SyncStatus::Connecting,
            SyncStatus::Connected,
            SyncStatus::Syncing,
        ] {
            let (state, actions) = from.on_event(StatusEvent::Failed);
            assert_eq!(state, SyncStatus::Error);
            assert_eq!(published(&actions), vec![SyncStatus::Error]);
        }
    }

    #[test]
    fn disconnect_actions_are_ordered() {
        let (state, actions) = SyncStatus::Connected.on_event(StatusEvent::DisconnectRequested);
        assert_eq!(state, SyncStatus::Disconnected);
        assert_eq!(
            actions,
            vec![
                StatusAction::StopHeartbeat,
                StatusAction::CancelReconnect,
                StatusAction::CancelSyncingRevert,
                StatusAction::CloseConnections,
                StatusAction::DetachTransport,
                StatusAction::Publish(SyncStatus::Disconnected),
            ]
        );
    }

    #[test]
    fn second_disconnect_publishes_nothing() {
        let (state, _) = SyncStatus::Connected.on_event(StatusEvent::DisconnectRequested);
        let (state, actions) = state.on_event(StatusEvent::DisconnectRequested);
        assert_eq!(state, SyncStatus::Disconnected);
        assert!(published(&actions).is_empty());
        // Teardown is still requested; every step is idempotent.
        assert!(actions.contains(&StatusAction::DetachTransport));
    }

    #[test]
    fn display_uses_wire_names() {
        assert_eq!(SyncStatus::Syncing.to_string(), "syncing");
        assert_eq!(
            serde_json::to_string(&SyncStatus::Disconnected).unwrap(),
            "\"disconnected\""
        );
    }
}
