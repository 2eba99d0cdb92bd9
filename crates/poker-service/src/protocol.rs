//! WebSocket wire format.
//!
//! Client frames are `{"action": ..., "payload": {...}}`. Server frames are
//! either the same action envelope or a full room snapshot:
//!
//! ```text
//! {"action": "submit", "payload": {"userId": "...", "vote": "voted"}}
//! {"type": "room_update", "roomId": "...", "payload": { RoomSnapshot }}
//! {"type": "disconnect"}
//! ```

use crate::errors::PokerError;
use crate::models::RoomSnapshot;
use common::types::RoomId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sent best-effort to a connection that is being unregistered.
pub const DISCONNECT_NOTICE: &str = r#"{"type":"disconnect"}"#;

/// Actions understood on the wire, in either direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Join,
    Leave,
    Online,
    Offline,
    Rename,
    Submit,
    Reveal,
    Reset,
    Transfer,
    Ping,
    Pong,
}

impl ActionType {
    /// Parse a client-supplied action name. Unknown names yield `None`.
    pub fn parse(action: &str) -> Option<Self> {
        match action {
            "join" => Some(ActionType::Join),
            "leave" => Some(ActionType::Leave),
            "online" => Some(ActionType::Online),
            "offline" => Some(ActionType::Offline),
            "rename" => Some(ActionType::Rename),
            "submit" => Some(ActionType::Submit),
            "reveal" => Some(ActionType::Reveal),
            "reset" => Some(ActionType::Reset),
            "transfer" => Some(ActionType::Transfer),
            "ping" => Some(ActionType::Ping),
            "pong" => Some(ActionType::Pong),
            _ => None,
        }
    }

    /// Wire name, also used as a metric label.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActionType::Join => "join",
            ActionType::Leave => "leave",
            ActionType::Online => "online",
            ActionType::Offline => "offline",
            ActionType::Rename => "rename",
            ActionType::Submit => "submit",
            ActionType::Reveal => "reveal",
            ActionType::Reset => "reset",
            ActionType::Transfer => "transfer",
            ActionType::Ping => "ping",
            ActionType::Pong => "pong",
        }
    }
}

/// A decoded client frame.
///
/// `action` stays a string so unrecognized actions can be re-broadcast
/// untouched; `raw` keeps the received text for that purpose.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InboundFrame {
    pub action: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(skip)]
    pub raw: String,
}

impl InboundFrame {
    /// Decode a text frame. Anything that is not an object with a string
    /// `action` is rejected.
    pub fn decode(text: &str) -> Result<Self, PokerError> {
        let mut frame: InboundFrame = serde_json::from_str(text)
            .map_err(|e| PokerError::Validation(format!("malformed frame: {e}")))?;
        frame.raw = text.to_string();
        Ok(frame)
    }
}

/// Action envelope sent to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventFrame {
    pub action: ActionType,
    pub payload: Value,
}

/// Full room state sent to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomUpdateFrame {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(rename = "roomId")]
    pub room_id: RoomId,
    pub payload: RoomSnapshot,
}

/// Any server-originated frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    Event(EventFrame),
    RoomUpdate(RoomUpdateFrame),
}

impl OutboundMessage {
    pub fn event(action: ActionType, payload: Value) -> Self {
        OutboundMessage::Event(EventFrame { action, payload })
    }

    pub fn room_update(snapshot: RoomSnapshot) -> Self {
        OutboundMessage::RoomUpdate(RoomUpdateFrame {
            kind: "room_update",
            room_id: snapshot.id,
            payload: snapshot,
        })
    }

    /// Serialize to the text sent on the socket.
    pub fn encode(&self) -> Result<String, PokerError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::{Room, User};
    use serde_json::json;

    #[test]
    fn test_action_type_round_trips_lowercase() {
        let json = serde_json::to_string(&ActionType::Transfer).unwrap();
        assert_eq!(json, "\"transfer\"");
        assert_eq!(ActionType::parse("transfer"), Some(ActionType::Transfer));
        assert_eq!(ActionType::parse("Transfer"), None);
        assert_eq!(ActionType::parse("emoji"), None);
        assert_eq!(ActionType::Transfer.as_str(), "transfer");
    }

    #[test]
    fn test_decode_keeps_raw_text() {
        let text = r#"{"action":"submit","payload":{"userId":"u","vote":"5"}}"#;
        let frame = InboundFrame::decode(text).unwrap();
        assert_eq!(frame.action, "submit");
        assert_eq!(frame.payload["vote"], "5");
        assert_eq!(frame.raw, text);
    }

    #[test]
    fn test_decode_defaults_missing_payload() {
        let frame = InboundFrame::decode(r#"{"action":"reset"}"#).unwrap();
        assert_eq!(frame.payload, Value::Null);
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(InboundFrame::decode("not json").is_err());
        assert!(InboundFrame::decode(r#"{"payload":{}}"#).is_err());
        assert!(InboundFrame::decode(r#"{"action":5}"#).is_err());
        assert!(InboundFrame::decode("[]").is_err());
    }

    #[test]
    fn test_event_encoding() {
        let msg = OutboundMessage::event(ActionType::Offline, json!({"userId": "abc"}));
        let value: Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(value, json!({"action": "offline", "payload": {"userId": "abc"}}));
    }

    #[test]
    fn test_room_update_encoding() {
        let room = Room::new("Planning", User::new("alice"));
        let msg = OutboundMessage::room_update(room.snapshot());
        let value: Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();

        assert_eq!(value["type"], "room_update");
        assert_eq!(value["roomId"], room.id.to_string());
        assert_eq!(value["payload"]["name"], "Planning");
        assert!(value.get("action").is_none());
    }

    #[test]
    fn test_disconnect_notice_is_valid_json() {
        let value: Value = serde_json::from_str(DISCONNECT_NOTICE).unwrap();
        assert_eq!(value["type"], "disconnect");
    }
}
