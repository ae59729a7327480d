//! Inbound message routing.
//!
//! Decides what a decoded [`Message`] means for the engine. The decision is
//! pure; the engine performs the replies and callbacks.

use taskflow_sync_types::{Message, MessageType, Snapshot};

/// What the engine should do with an inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// Answer with a `sync_response` carrying the local snapshot.
    ReplySnapshot,
    /// Answer with a `pong`.
    ReplyPong,
    /// Hand the snapshot to the conflict resolver.
    Deliver(Snapshot),
    /// Liveness only; nothing else to do.
    Alive,
    /// Drop the message.
    Ignore(IgnoreReason),
}

/// Why a message was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// `sync_request` reached a peer that is not host.
    NotHost,
    /// A data-carrying message arrived without data.
    MissingData,
}

/// Route a message given the local host role.
///
/// Data messages are delivered regardless of role.
pub fn route(message: Message, is_host: bool) -> Route {
    match message.kind {
        MessageType::SyncRequest if is_host => Route::ReplySnapshot,
        MessageType::SyncRequest => Route::Ignore(IgnoreReason::NotHost),
        MessageType::SyncResponse | MessageType::DataUpdate => match message.data {
            Some(snapshot) => Route::Deliver(snapshot),
            None => Route::Ignore(IgnoreReason::MissingData),
        },
        MessageType::Ping => Route::ReplyPong,
        MessageType::Pong => Route::Alive,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskflow_sync_types::PeerId;

    fn sender() -> PeerId {
        PeerId::new("taskflow-remote123").unwrap()
    }

    #[test]
    fn host_answers_sync_request() {
        let msg = Message::sync_request(&sender(), 1);
        assert_eq!(route(msg, true), Route::ReplySnapshot);
    }

    #[test]
    fn non_host_ignores_sync_request() {
        let msg = Message::sync_request(&sender(), 1);
        assert_eq!(route(msg, false), Route::Ignore(IgnoreReason::NotHost));
    }

    #[test]
    fn data_messages_delivered_regardless_of_role() {
        let snapshot = Snapshot::empty_at(9);
        for is_host in [true, false] {
            let update = Message::data_update(&sender(), 1, snapshot.clone());
            assert_eq!(route(update, is_host), Route::Deliver(snapshot.clone()));

            let response = Message::sync_response(&sender(), 1, snapshot.clone());
            assert_eq!(route(response, is_host), Route::Deliver(snapshot.clone()));
        }
    }

    #[test]
    fn data_message_without_data_is_ignored() {
        let mut msg = Message::data_update(&sender(), 1, Snapshot::empty_at(0));
        msg.data = None;
        assert_eq!(route(msg, true), Route::Ignore(IgnoreReason::MissingData));
    }

    #[test]
    fn ping_and_pong() {
        assert_eq!(route(Message::ping(&sender(), 1), false), Route::ReplyPong);
        assert_eq!(route(Message::pong(&sender(), 1), false), Route::Alive);
    }
}
