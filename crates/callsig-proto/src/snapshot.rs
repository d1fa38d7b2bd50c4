//! Payloads carried in `answer.data`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::errors::{ProtocolError, Result};

/// Peer entry inside room snapshots and `ns_room_add` pushes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerSnapshot {
    /// Peer status
    pub status: Value,
    /// Whether the peer still awaits admission
    #[serde(default)]
    pub pending: bool,
}

/// Room entry inside a namespace snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    /// Room status
    pub status: Value,
    /// Current peers
    #[serde(default)]
    pub peers: BTreeMap<String, PeerSnapshot>,
}

/// Answer to `ns_subscribe`: current presence of the namespace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamespaceSnapshot {
    /// User id to status
    #[serde(default)]
    pub users: BTreeMap<String, Value>,
    /// Room id to room snapshot
    #[serde(default)]
    pub rooms: BTreeMap<String, RoomSnapshot>,
}

/// Answer to `room_join` and `invite_accept`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinAnswer {
    /// Server-assigned room id
    pub room: String,
    /// Room status
    pub status: Value,
    /// Peers already present
    #[serde(default)]
    pub peers: BTreeMap<String, PeerSnapshot>,
}

/// Answer to `invite_send`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InviteAnswer {
    /// Correlation handle for the new invitation
    pub handle: String,
}

/// Decode an answer payload into the shape a transaction expects.
///
/// A missing payload is decoded from `null`, so payloads whose fields are all
/// defaulted still succeed.
///
/// # Errors
///
/// - `ProtocolError::InvalidAnswer` if the payload has the wrong shape
pub fn decode_answer<T: DeserializeOwned>(data: Option<&Value>) -> Result<T> {
    let data = data.cloned().unwrap_or(Value::Null);
    let data = if data.is_null() { Value::Object(serde_json::Map::new()) } else { data };
    serde_json::from_value(data).map_err(|e| ProtocolError::InvalidAnswer(e.to_string()))
}
