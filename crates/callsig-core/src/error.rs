//! Error types for the signaling core.
//!
//! Two paths, never mixed: transaction failures and local misuse surface as
//! [`SessionError`] exactly once to the caller, while malformed or unmatched
//! inbound messages are absorbed as [`crate::ProtocolWarning`]s.

use callsig_proto::ProtocolError;
use thiserror::Error;

use crate::room::RoomKey;

/// Errors surfaced to callers of session operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Server rejected the transaction. Displays the server's string as-is.
    #[error("{0}")]
    Server(String),

    /// Answer violated the protocol (missing fields after join, accept, ...)
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Request could not be encoded
    #[error("encode failed: {0}")]
    Encode(String),

    /// No room with this key exists in the session
    #[error("unknown room {0}")]
    UnknownRoom(RoomKey),

    /// Operation requires a connected room
    #[error("room {0} is not connected")]
    RoomNotConnected(RoomKey),

    /// Room has already been left
    #[error("room {0} has been left")]
    RoomLeft(RoomKey),

    /// Room is neither left nor failed and cannot be released
    #[error("room {0} is still active")]
    RoomActive(RoomKey),

    /// Another local room is already bound to this server room id
    #[error("room {0} is already joined by this session")]
    AlreadyJoined(String),

    /// No invitation with this handle exists in the session
    #[error("unknown invitation {0}")]
    UnknownInvitation(String),

    /// Invitation already reached a terminal state
    #[error("invitation {handle} is already {state}")]
    InvitationClosed {
        /// Invitation handle
        handle: String,
        /// Terminal state it is in
        state: &'static str,
    },

    /// Invitation is still open or unanswered and cannot be released
    #[error("invitation {0} is still active")]
    InvitationActive(String),

    /// Namespace is subscribed or a subscribe is in flight
    #[error("namespace {0} is already subscribed")]
    AlreadySubscribed(String),

    /// Namespace has no live subscription
    #[error("namespace {0} is not subscribed")]
    NotSubscribed(String),
}

impl From<ProtocolError> for SessionError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Encode(reason) => Self::Encode(reason),
            other => Self::Protocol(other.to_string()),
        }
    }
}

/// Rejection of a peer's acceptance outcome.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptanceError {
    /// Peer (or this session) left while the peer was still pending
    #[error("left")]
    Left,
}

/// Rejection of an outgoing invitation's response.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvitationError {
    /// Invitation was cancelled before the invitee responded
    #[error("cancelled")]
    Cancelled,
}
