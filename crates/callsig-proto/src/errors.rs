//! Protocol error types.

use thiserror::Error;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while encoding or decoding wire messages.
///
/// None of these are fatal to a session: an inbound message that fails to
/// decode is dropped and reported as a warning.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Input was not valid JSON.
    #[error("malformed json: {0}")]
    Json(String),

    /// Input was valid JSON but not an object.
    #[error("message is not an object")]
    NotAnObject,

    /// Object carries neither `type` nor `event`.
    #[error("message has no type or event discriminator")]
    MissingDiscriminator,

    /// Unknown type, or a required field is missing or mistyped.
    #[error("invalid {kind} message: {reason}")]
    InvalidMessage {
        /// Discriminator value of the rejected message
        kind: String,
        /// Decoder failure description
        reason: String,
    },

    /// Request has no numeric `tid`.
    #[error("request has no transaction id")]
    MissingTransactionId,

    /// `answer.data` does not have the shape the transaction expects.
    #[error("invalid answer payload: {0}")]
    InvalidAnswer(String),

    /// Serialization failed.
    #[error("encode failed: {0}")]
    Encode(String),
}
