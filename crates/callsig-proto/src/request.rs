//! Client-to-server requests.
//!
//! Every request is a transaction: the session stamps it with a fresh
//! [`TransactionId`] at encode time and the server echoes that id in its
//! `answer`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    TransactionId,
    errors::{ProtocolError, Result},
    message::parse_object,
};

/// Requests a session can issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Start mirroring a namespace.
    NsSubscribe {
        /// Namespace id
        namespace: String,
    },
    /// Stop mirroring a namespace.
    NsUnsubscribe {
        /// Namespace id
        namespace: String,
    },
    /// Make this session visible as a user of a namespace.
    NsUserRegister {
        /// Namespace id
        namespace: String,
    },
    /// Withdraw this session from a namespace.
    NsUserUnregister {
        /// Namespace id
        namespace: String,
    },
    /// Replace this session's global presence status.
    UserStatus {
        /// New status
        status: Value,
    },
    /// Join a room, or create one when `room` is absent.
    RoomJoin {
        /// Room to join
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room: Option<String>,
        /// Local peer status to publish on join
        status: Value,
    },
    /// Leave a joined room.
    RoomLeave {
        /// Room id
        room: String,
    },
    /// Replace the local peer status inside a joined room.
    RoomPeerStatus {
        /// Room id
        room: String,
        /// New peer status
        status: Value,
    },
    /// Set one key of the shared room status.
    RoomStatus {
        /// Room id
        room: String,
        /// Status key
        key: String,
        /// New value
        value: Value,
        /// Whether the server must compare `previous` first
        #[serde(default)]
        check: bool,
        /// Expected current value when `check` is set
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous: Option<Value>,
    },
    /// Invite a user into a joined room.
    InviteSend {
        /// Room id
        room: String,
        /// Invited user
        user: String,
        /// Application payload
        data: Value,
    },
    /// Withdraw an outgoing invitation.
    InviteCancel {
        /// Correlation handle
        handle: String,
    },
    /// Accept an incoming invitation and join its room.
    InviteAccept {
        /// Correlation handle
        handle: String,
        /// Local peer status to publish on join
        status: Value,
    },
    /// Decline an incoming invitation.
    InviteDeny {
        /// Correlation handle
        handle: String,
    },
    /// Relay an application message to one peer.
    RoomPeerTo {
        /// Room id
        room: String,
        /// Target peer
        user: String,
        /// Application event name
        event: String,
        /// Application payload
        data: Value,
    },
}

impl Request {
    /// Encode this request stamped with `tid`.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Encode` if serialization fails
    pub fn encode(&self, tid: TransactionId) -> Result<String> {
        let mut value =
            serde_json::to_value(self).map_err(|e| ProtocolError::Encode(e.to_string()))?;

        let Value::Object(object) = &mut value else {
            return Err(ProtocolError::Encode("request did not encode to an object".into()));
        };
        object.insert("tid".to_string(), Value::from(tid));

        serde_json::to_string(&value).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Decode a stamped request. Used by servers and test harnesses.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::MissingTransactionId` if `tid` is absent or not a
    ///   non-negative integer
    /// - `ProtocolError::InvalidMessage` for unknown types or missing fields
    pub fn decode(text: &str) -> Result<(TransactionId, Self)> {
        let mut object = parse_object(text)?;

        let tid = object
            .remove("tid")
            .and_then(|tid| tid.as_u64())
            .ok_or(ProtocolError::MissingTransactionId)?;

        let kind = object.get("type").and_then(Value::as_str).unwrap_or("<missing>").to_string();

        let request = serde_json::from_value(Value::Object(object))
            .map_err(|e| ProtocolError::InvalidMessage { kind, reason: e.to_string() })?;

        Ok((tid, request))
    }

    /// Wire discriminator of this request.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NsSubscribe { .. } => "ns_subscribe",
            Self::NsUnsubscribe { .. } => "ns_unsubscribe",
            Self::NsUserRegister { .. } => "ns_user_register",
            Self::NsUserUnregister { .. } => "ns_user_unregister",
            Self::UserStatus { .. } => "user_status",
            Self::RoomJoin { .. } => "room_join",
            Self::RoomLeave { .. } => "room_leave",
            Self::RoomPeerStatus { .. } => "room_peer_status",
            Self::RoomStatus { .. } => "room_status",
            Self::InviteSend { .. } => "invite_send",
            Self::InviteCancel { .. } => "invite_cancel",
            Self::InviteAccept { .. } => "invite_accept",
            Self::InviteDeny { .. } => "invite_deny",
            Self::RoomPeerTo { .. } => "room_peer_to",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn encoded(request: &Request, tid: TransactionId) -> Value {
        serde_json::from_str(&request.encode(tid).unwrap()).unwrap()
    }

    #[test]
    fn subscribe_carries_tid_and_type() {
        let request = Request::NsSubscribe { namespace: "ns1".into() };
        assert_eq!(
            encoded(&request, 0),
            json!({"type": "ns_subscribe", "namespace": "ns1", "tid": 0})
        );
    }

    #[test]
    fn join_without_room_omits_room() {
        let request = Request::RoomJoin { room: None, status: json!({"muted": false}) };
        assert_eq!(
            encoded(&request, 7),
            json!({"type": "room_join", "status": {"muted": false}, "tid": 7})
        );
    }

    #[test]
    fn unchecked_room_status_omits_previous() {
        let request = Request::RoomStatus {
            room: "r1".into(),
            key: "topic".into(),
            value: json!("retro"),
            check: false,
            previous: None,
        };
        assert_eq!(
            encoded(&request, 3),
            json!({"type": "room_status", "room": "r1", "key": "topic", "value": "retro", "check": false, "tid": 3})
        );
    }

    #[test]
    fn checked_room_status_keeps_null_previous() {
        let request = Request::RoomStatus {
            room: "r1".into(),
            key: "lock".into(),
            value: json!("u1"),
            check: true,
            previous: Some(Value::Null),
        };
        let value = encoded(&request, 4);
        assert_eq!(value["check"], json!(true));
        assert_eq!(value.get("previous"), Some(&Value::Null));
    }

    #[test]
    fn decode_splits_tid_from_request() {
        let (tid, request) =
            Request::decode(r#"{"type":"invite_deny","handle":"h9","tid":12}"#).unwrap();

        assert_eq!(tid, 12);
        insta::assert_debug_snapshot!(request, @r#"
        InviteDeny {
            handle: "h9",
        }
        "#);
    }

    #[test]
    fn decode_requires_tid() {
        let result = Request::decode(r#"{"type":"invite_deny","handle":"h9"}"#);
        assert_eq!(result, Err(ProtocolError::MissingTransactionId));
    }

    #[test]
    fn kind_matches_wire_type() {
        let request = Request::RoomPeerTo {
            room: "r1".into(),
            user: "u2".into(),
            event: "ice".into(),
            data: json!({}),
        };
        assert_eq!(encoded(&request, 0)["type"], json!(request.kind()));
    }
}
