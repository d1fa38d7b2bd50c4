//! Server-to-client messages.
//!
//! Covers the session handshake, transaction answers, invitation arrival and
//! the push events that keep namespace and room mirrors converged.
//!
//! # Invariants
//!
//! Each variant lists exactly the fields a handler needs. A message missing a
//! required field fails to decode as a whole, so handlers never see partial
//! records. Optional fields (`tid`, `data`, `error` on answers; `status` and
//! `pending` on peer updates) are `Option`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    TransactionId,
    errors::{ProtocolError, Result},
    snapshot::PeerSnapshot,
};

/// Messages pushed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    // Session
    /// Handshake establishing the session's own id.
    Hello {
        /// Session id assigned by the server
        id: String,
        /// Opaque server descriptor
        server: Value,
    },
    /// Reply to a transaction.
    Answer {
        /// Transaction being answered. Absent answers are dropped.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tid: Option<TransactionId>,
        /// Success payload
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
        /// Server-reported failure
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Another user invites this session into a room.
    InviteIncoming {
        /// Correlation handle
        handle: String,
        /// Inviting user
        user: String,
        /// Inviting user's status
        status: Value,
        /// Application payload attached to the invitation
        data: Value,
    },

    // Namespace presence
    /// User registered in a namespace.
    NsUserAdd {
        /// Namespace id
        namespace: String,
        /// User id
        user: String,
        /// Initial status
        status: Value,
    },
    /// User status changed.
    NsUserUpdate {
        /// Namespace id
        namespace: String,
        /// User id
        user: String,
        /// Replacement status
        status: Value,
    },
    /// User unregistered.
    NsUserRm {
        /// Namespace id
        namespace: String,
        /// User id
        user: String,
    },
    /// Room appeared in a namespace.
    NsRoomAdd {
        /// Namespace id
        namespace: String,
        /// Room id
        room: String,
        /// Room status
        status: Value,
        /// Current peers
        peers: BTreeMap<String, PeerSnapshot>,
    },
    /// Room status changed.
    NsRoomUpdate {
        /// Namespace id
        namespace: String,
        /// Room id
        room: String,
        /// Replacement status
        status: Value,
    },
    /// Room closed.
    NsRoomRm {
        /// Namespace id
        namespace: String,
        /// Room id
        room: String,
    },
    /// Peer joined a namespace room.
    NsRoomPeerAdd {
        /// Namespace id
        namespace: String,
        /// Room id
        room: String,
        /// Peer user id
        user: String,
        /// Peer status
        status: Value,
        /// Whether the peer still awaits admission
        pending: bool,
    },
    /// Peer in a namespace room changed.
    NsRoomPeerUpdate {
        /// Namespace id
        namespace: String,
        /// Room id
        room: String,
        /// Peer user id
        user: String,
        /// Replacement status, if changed
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<Value>,
        /// New admission state, if changed
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pending: Option<bool>,
    },
    /// Peer left a namespace room.
    NsRoomPeerRm {
        /// Namespace id
        namespace: String,
        /// Room id
        room: String,
        /// Peer user id
        user: String,
    },

    // Joined rooms
    /// Room status replaced.
    RoomUpdate {
        /// Room id
        room: String,
        /// Replacement status
        status: Value,
    },
    /// Peer joined after this session.
    RoomPeerAdd {
        /// Room id
        room: String,
        /// Peer user id
        user: String,
        /// Peer status
        status: Value,
        /// Whether the peer still awaits admission
        pending: bool,
    },
    /// Peer status or admission changed.
    RoomPeerUpdate {
        /// Room id
        room: String,
        /// Peer user id
        user: String,
        /// Replacement status, if changed
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<Value>,
        /// New admission state, if changed
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pending: Option<bool>,
    },
    /// Peer left the room.
    RoomPeerRm {
        /// Room id
        room: String,
        /// Peer user id
        user: String,
    },
    /// Application message relayed from a peer.
    RoomPeerFrom {
        /// Room id
        room: String,
        /// Sending peer
        user: String,
        /// Application event name
        event: String,
        /// Application payload
        data: Value,
    },

    // Invitations
    /// Inviter withdrew an incoming invitation.
    InviteCancelled {
        /// Correlation handle
        handle: String,
    },
    /// Invitee decided on an outgoing invitation.
    InviteResponse {
        /// Correlation handle
        handle: String,
        /// Decision
        accepted: bool,
    },
}

impl ServerMessage {
    /// Decode a message from JSON text.
    ///
    /// Accepts `event` as the discriminator when `type` is absent.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Json` if the text is not JSON
    /// - `ProtocolError::NotAnObject` if the top level is not an object
    /// - `ProtocolError::MissingDiscriminator` if neither key is present
    /// - `ProtocolError::InvalidMessage` for unknown types or missing fields
    pub fn decode(text: &str) -> Result<Self> {
        let mut object = parse_object(text)?;

        if !object.contains_key("type") {
            let event = object.remove("event").ok_or(ProtocolError::MissingDiscriminator)?;
            object.insert("type".to_string(), event);
        }

        let kind = object.get("type").and_then(Value::as_str).unwrap_or("<non-string>").to_string();

        serde_json::from_value(Value::Object(object))
            .map_err(|e| ProtocolError::InvalidMessage { kind, reason: e.to_string() })
    }

    /// Encode to JSON text.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Wire discriminator of this message.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "hello",
            Self::Answer { .. } => "answer",
            Self::InviteIncoming { .. } => "invite_incoming",
            Self::NsUserAdd { .. } => "ns_user_add",
            Self::NsUserUpdate { .. } => "ns_user_update",
            Self::NsUserRm { .. } => "ns_user_rm",
            Self::NsRoomAdd { .. } => "ns_room_add",
            Self::NsRoomUpdate { .. } => "ns_room_update",
            Self::NsRoomRm { .. } => "ns_room_rm",
            Self::NsRoomPeerAdd { .. } => "ns_room_peer_add",
            Self::NsRoomPeerUpdate { .. } => "ns_room_peer_update",
            Self::NsRoomPeerRm { .. } => "ns_room_peer_rm",
            Self::RoomUpdate { .. } => "room_update",
            Self::RoomPeerAdd { .. } => "room_peer_add",
            Self::RoomPeerUpdate { .. } => "room_peer_update",
            Self::RoomPeerRm { .. } => "room_peer_rm",
            Self::RoomPeerFrom { .. } => "room_peer_from",
            Self::InviteCancelled { .. } => "invite_cancelled",
            Self::InviteResponse { .. } => "invite_response",
        }
    }
}

/// Parse JSON text into a top-level object.
pub(crate) fn parse_object(text: &str) -> Result<Map<String, Value>> {
    let value: Value = serde_json::from_str(text).map_err(|e| ProtocolError::Json(e.to_string()))?;
    match value {
        Value::Object(object) => Ok(object),
        _ => Err(ProtocolError::NotAnObject),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn decodes_hello() {
        let message = ServerMessage::decode(r#"{"type":"hello","id":"S1","server":{"v":1}}"#).unwrap();
        assert_eq!(message, ServerMessage::Hello { id: "S1".into(), server: json!({"v": 1}) });
    }

    #[test]
    fn decodes_user_add() {
        let message = ServerMessage::decode(
            r#"{"type":"ns_user_add","namespace":"ns1","user":"u1","status":"online"}"#,
        )
        .unwrap();

        insta::assert_debug_snapshot!(message, @r#"
        NsUserAdd {
            namespace: "ns1",
            user: "u1",
            status: String("online"),
        }
        "#);
    }

    #[test]
    fn event_key_is_accepted_as_discriminator() {
        let message = ServerMessage::decode(r#"{"event":"invite_cancelled","handle":"h1"}"#).unwrap();
        assert_eq!(message, ServerMessage::InviteCancelled { handle: "h1".into() });
    }

    #[test]
    fn type_wins_over_event() {
        let message = ServerMessage::decode(
            r#"{"type":"room_peer_from","room":"r1","user":"u2","event":"offer","data":{"sdp":"x"}}"#,
        )
        .unwrap();

        assert_eq!(message.kind(), "room_peer_from");
        let ServerMessage::RoomPeerFrom { event, .. } = message else {
            unreachable!("decoded wrong variant")
        };
        assert_eq!(event, "offer");
    }

    #[test]
    fn answer_fields_are_optional() {
        let message = ServerMessage::decode(r#"{"type":"answer"}"#).unwrap();
        assert_eq!(message, ServerMessage::Answer { tid: None, data: None, error: None });
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let result = ServerMessage::decode(r#"{"type":"invite_incoming","handle":"h1","user":"u1"}"#);
        assert!(matches!(
            result,
            Err(ProtocolError::InvalidMessage { ref kind, .. }) if kind == "invite_incoming"
        ));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let result = ServerMessage::decode(r#"{"type":"bogus"}"#);
        assert!(matches!(result, Err(ProtocolError::InvalidMessage { .. })));
    }

    #[test]
    fn non_object_is_rejected() {
        assert_eq!(ServerMessage::decode("[1,2]"), Err(ProtocolError::NotAnObject));
        assert!(matches!(ServerMessage::decode("{"), Err(ProtocolError::Json(_))));
        assert_eq!(ServerMessage::decode("{}"), Err(ProtocolError::MissingDiscriminator));
    }

    #[test]
    fn peer_update_without_optionals_decodes() {
        let message =
            ServerMessage::decode(r#"{"type":"room_peer_update","room":"r1","user":"u2"}"#).unwrap();
        assert_eq!(message, ServerMessage::RoomPeerUpdate {
            room: "r1".into(),
            user: "u2".into(),
            status: None,
            pending: None,
        });
    }

    #[test]
    fn encoded_message_decodes_to_itself() {
        let message = ServerMessage::NsRoomAdd {
            namespace: "ns1".into(),
            room: "r1".into(),
            status: json!({"topic": "standup"}),
            peers: BTreeMap::from([(
                "u1".to_string(),
                PeerSnapshot { status: json!("here"), pending: true },
            )]),
        };

        let text = message.encode().unwrap();
        assert_eq!(ServerMessage::decode(&text).unwrap(), message);
    }
}
