//! Protocol
//!
//! Wire format for the callsig signaling protocol. Every message is a JSON
//! object carrying a `type` discriminator (or `event`, for older servers).
//!
//! # Message families
//!
//! - [`ServerMessage`]: everything the server pushes to a session, including
//!   the `hello` handshake and `answer` replies to transactions.
//! - [`Request`]: everything a session asks of the server. Requests are
//!   stamped with a session-scoped [`TransactionId`] on encode.
//! - [`snapshot`]: payloads carried inside `answer.data` for subscribe, join,
//!   accept and invite transactions.
//!
//! Application state (`status`, `data`) is opaque to the protocol and kept as
//! [`serde_json::Value`].

#![forbid(unsafe_code)]

pub mod errors;
pub mod message;
pub mod request;
pub mod snapshot;

pub use errors::{ProtocolError, Result};
pub use message::ServerMessage;
pub use request::Request;
pub use serde_json::Value;
pub use snapshot::{InviteAnswer, JoinAnswer, NamespaceSnapshot, PeerSnapshot, RoomSnapshot};

/// Session-scoped transaction identifier.
///
/// Issued sequentially from 0 by the session that sends the request and
/// echoed by the server in the matching `answer`.
pub type TransactionId = u64;
