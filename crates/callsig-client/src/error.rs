//! Error types for the async runtime.

use std::time::Duration;

use callsig_core::{AcceptanceError, InvitationError, SessionError};
use thiserror::Error;

/// Errors returned by [`crate::Runtime`] operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Operation failed in the session or on the server
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Awaited peer left before it was admitted
    #[error("peer acceptance failed: {0}")]
    Acceptance(#[from] AcceptanceError),

    /// Awaited invitation response was withdrawn
    #[error("invitation response failed: {0}")]
    Invitation(#[from] InvitationError),

    /// Transport reported an error
    #[error("channel error: {0}")]
    Channel(String),

    /// Transport closed while waiting
    #[error("channel closed")]
    ChannelClosed,

    /// Wait exceeded the configured limit; the transaction stays pending
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Transaction settled with a completion of the wrong kind
    #[error("unexpected completion: {0}")]
    UnexpectedCompletion(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_keep_their_message() {
        let err = ClientError::from(SessionError::Server("not_found".into()));
        assert_eq!(err.to_string(), "not_found");
    }

    #[test]
    fn rejected_acceptance_reads_left() {
        assert_eq!(ClientError::from(AcceptanceError::Left).to_string(), "peer acceptance failed: left");
    }
}
