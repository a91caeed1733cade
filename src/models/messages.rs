use crate::models::{FileBlob, PresenceEntry, ViewState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An accepted write, fanned out to every other subscriber of the board
/// channel.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ElementsUpdatedMessage {
    pub version: u64,
    pub elements: Vec<serde_json::Value>,
    pub view_state: ViewState,
    pub files: BTreeMap<String, FileBlob>,
    pub updated_by: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PresenceJoinMessage {
    pub member: PresenceEntry,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PresenceLeaveMessage {
    pub user_id: String,
    pub connection_id: uuid::Uuid,
}

/// Sent once to a connection right after it subscribes: the full current
/// member list (a snapshot, not an event replay) plus the connection id the
/// server assigned to the subscriber.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PresenceSnapshotMessage {
    pub connection_id: uuid::Uuid,
    pub members: Vec<PresenceEntry>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PongMessage {
    pub date: String,
}

/// Messages pushed from the server over a board channel.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "elements-updated")]
    ElementsUpdated(ElementsUpdatedMessage),
    #[serde(rename = "presence-join")]
    PresenceJoin(PresenceJoinMessage),
    #[serde(rename = "presence-leave")]
    PresenceLeave(PresenceLeaveMessage),
    #[serde(rename = "presence-snapshot")]
    PresenceSnapshot(PresenceSnapshotMessage),
    #[serde(rename = "pong")]
    Pong(PongMessage),
}

/// Messages a client may send over a board channel. Writes go over HTTP,
/// so the channel only carries heartbeats upstream.
#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "ping")]
    Ping,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_message_round_trips_with_topic_tag() {
        let msg = ServerMessage::PresenceLeave(PresenceLeaveMessage {
            user_id: "u1".to_string(),
            connection_id: uuid::Uuid::new_v4(),
        });
        let text = serde_json::to_string(&msg).unwrap();
        assert!(text.contains("\"type\":\"presence-leave\""));
        let parsed: ServerMessage = serde_json::from_str(&text).unwrap();
        assert!(matches!(parsed, ServerMessage::PresenceLeave(_)));
    }

    #[test]
    fn client_ping_parses() {
        let parsed: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(parsed, ClientMessage::Ping));
    }
}
