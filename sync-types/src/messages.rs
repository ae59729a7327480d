//! Wire messages exchanged over a peer channel.
//!
//! Every message is a JSON object `{type, data?, timestamp, senderId}`.
//! `data` is present only for [`MessageType::SyncResponse`] and
//! [`MessageType::DataUpdate`].

use serde::{Deserialize, Serialize};

use crate::{PeerId, Snapshot, TypesError};

/// Message type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Ask the remote side for its current snapshot.
    SyncRequest,
    /// Answer to a sync request, carries a snapshot.
    SyncResponse,
    /// Unsolicited snapshot broadcast after a local change.
    DataUpdate,
    /// Heartbeat probe.
    Ping,
    /// Heartbeat reply.
    Pong,
}

impl MessageType {
    /// Whether messages of this type carry a snapshot.
    pub fn carries_data(self) -> bool {
        matches!(self, MessageType::SyncResponse | MessageType::DataUpdate)
    }

    /// Wire name of this type.
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::SyncRequest => "sync_request",
            MessageType::SyncResponse => "sync_response",
            MessageType::DataUpdate => "data_update",
            MessageType::Ping => "ping",
            MessageType::Pong => "pong",
        }
    }
}

/// The unit exchanged over a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// What kind of message this is.
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// Snapshot payload, only for sync_response and data_update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Snapshot>,
    /// Sender's clock, milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Sender's peer id.
    pub sender_id: PeerId,
}

impl Message {
    /// A sync request.
    pub fn sync_request(sender: &PeerId, timestamp: i64) -> Self {
        Self::bare(MessageType::SyncRequest, sender, timestamp)
    }

    /// A sync response carrying the sender's current snapshot.
    pub fn sync_response(sender: &PeerId, timestamp: i64, snapshot: Snapshot) -> Self {
        Self::with_data(MessageType::SyncResponse, sender, timestamp, snapshot)
    }

    /// A data update carrying a freshly built snapshot.
    pub fn data_update(sender: &PeerId, timestamp: i64, snapshot: Snapshot) -> Self {
        Self::with_data(MessageType::DataUpdate, sender, timestamp, snapshot)
    }

    /// A heartbeat probe.
    pub fn ping(sender: &PeerId, timestamp: i64) -> Self {
        Self::bare(MessageType::Ping, sender, timestamp)
    }

    /// A heartbeat reply.
    pub fn pong(sender: &PeerId, timestamp: i64) -> Self {
        Self::bare(MessageType::Pong, sender, timestamp)
    }

    fn bare(kind: MessageType, sender: &PeerId, timestamp: i64) -> Self {
        Self {
            kind,
            data: None,
            timestamp,
            sender_id: sender.clone(),
        }
    }

    fn with_data(kind: MessageType, sender: &PeerId, timestamp: i64, snapshot: Snapshot) -> Self {
        Self {
            kind,
            data: Some(snapshot),
            timestamp,
            sender_id: sender.clone(),
        }
    }

    /// Serialize to JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TypesError> {
        serde_json::to_vec(self).map_err(TypesError::Serialization)
    }

    /// Deserialize from JSON bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TypesError> {
        serde_json::from_slice(bytes).map_err(TypesError::Deserialization)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Category, Settings, Task};

    fn sender() -> PeerId {
        PeerId::new("taskflow-abc123xyz").unwrap()
    }

    fn sample_snapshot() -> Snapshot {
        Snapshot {
            tasks: vec![Task::new("t1", "A", "2024-01-01T00:00:00Z")],
            categories: vec![Category::new("c1", "Work", "#ff0000")],
            settings: Settings::default(),
            timestamp: 1_700_000_000_000,
            version: "1.0.0".into(),
        }
    }

    #[test]
    fn ping_wire_shape() {
        let msg = Message::ping(&sender(), 1000);
        let json: serde_json::Value = serde_json::from_slice(&msg.to_bytes().unwrap()).unwrap();

        assert_eq!(json["type"], "ping");
        assert_eq!(json["timestamp"], 1000);
        assert_eq!(json["senderId"], "taskflow-abc123xyz");
        assert!(json.get("data").is_none(), "ping must not carry data");
    }

    #[test]
    fn data_update_carries_snapshot() {
        let msg = Message::data_update(&sender(), 5, sample_snapshot());
        let json: serde_json::Value = serde_json::from_slice(&msg.to_bytes().unwrap()).unwrap();

        assert_eq!(json["type"], "data_update");
        assert_eq!(json["data"]["tasks"][0]["id"], "t1");
        assert_eq!(json["data"]["version"], "1.0.0");
    }

    #[test]
    fn decodes_message_from_reference_peer() {
        let raw = br#"{"type":"sync_response","data":{"tasks":[],"categories":[],
            "settings":{"primaryColor":"red","compactMode":true,"showAnimations":false,
            "defaultView":"calendar","sidebarCollapsed":false,"openaiApiKey":"",
            "openaiBaseUrl":"","openaiModel":""},"timestamp":7,"version":"1.0.0"},
            "timestamp":8,"senderId":"taskflow-zzz999aaa"}"#;

        let msg = Message::from_bytes(raw).unwrap();
        assert_eq!(msg.kind, MessageType::SyncResponse);
        assert_eq!(msg.timestamp, 8);
        let data = msg.data.unwrap();
        assert_eq!(data.settings.primary_color, "red");
        assert_eq!(data.timestamp, 7);
    }

    #[test]
    fn unknown_type_is_rejected() {
        let raw = br#"{"type":"shout","timestamp":1,"senderId":"taskflow-a"}"#;
        assert!(matches!(
            Message::from_bytes(raw),
            Err(TypesError::Deserialization(_))
        ));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(Message::from_bytes(b"\x00\x01not json").is_err());
    }

    #[test]
    fn carries_data_matches_wire_contract() {
        assert!(MessageType::SyncResponse.carries_data());
        assert!(MessageType::DataUpdate.carries_data());
        assert!(!MessageType::SyncRequest.carries_data());
        assert!(!MessageType::Ping.carries_data());
        assert!(!MessageType::Pong.carries_data());
    }

    #[test]
    fn as_str_matches_serde_name() {
        for kind in [
            MessageType::SyncRequest,
            MessageType::SyncResponse,
            MessageType::DataUpdate,
            MessageType::Ping,
            MessageType::Pong,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }
}
