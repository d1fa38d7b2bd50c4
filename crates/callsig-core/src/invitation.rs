//! Invitation handshake objects.
//!
//! Both directions are correlated by an opaque server handle and live outside
//! the namespace and room trees. An [`IncomingInvitation`] listens for
//! `invite_cancelled` while it is open; accept, deny and cancellation each
//! close it, and whichever comes first wins. An [`OutgoingInvitation`] listens
//! for `invite_response` until its response settles, either by that push or by
//! a successful `invite_cancel`.

use callsig_proto::TransactionId;
use serde_json::Value;

use crate::{
    error::{InvitationError, SessionError},
    room::RoomKey,
    settlement::Settlement,
};

/// Lifecycle of an incoming invitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncomingState {
    /// Awaiting a local decision
    Open,
    /// Accepted; the joined room is recorded on the invitation
    Accepted,
    /// Denied
    Denied,
    /// Withdrawn by the inviter
    Cancelled,
}

impl IncomingState {
    /// Lowercase name used in error messages.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Accepted => "accepted",
            Self::Denied => "denied",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Invitation received from another user.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingInvitation {
    handle: String,
    user: String,
    status: Value,
    data: Value,
    state: IncomingState,
    room: Option<RoomKey>,
}

impl IncomingInvitation {
    pub(crate) fn new(handle: String, user: String, status: Value, data: Value) -> Self {
        Self { handle, user, status, data, state: IncomingState::Open, room: None }
    }

    /// Correlation handle.
    pub fn handle(&self) -> &str {
        &self.handle
    }

    /// Inviting user.
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Inviting user's status.
    pub fn status(&self) -> &Value {
        &self.status
    }

    /// Application payload.
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Current state.
    pub fn state(&self) -> IncomingState {
        self.state
    }

    /// Whether the inviter withdrew the invitation.
    pub fn cancelled(&self) -> bool {
        self.state == IncomingState::Cancelled
    }

    /// Room created by accepting.
    pub fn room(&self) -> Option<RoomKey> {
        self.room
    }

    /// Whether `invite_cancelled` for this handle is still handled.
    pub fn is_listening(&self) -> bool {
        self.state == IncomingState::Open
    }

    /// Close the invitation with a local decision.
    pub(crate) fn close(&mut self, next: IncomingState) -> Result<(), SessionError> {
        if self.state != IncomingState::Open {
            return Err(SessionError::InvitationClosed {
                handle: self.handle.clone(),
                state: self.state.as_str(),
            });
        }
        self.state = next;
        Ok(())
    }

    pub(crate) fn bind_room(&mut self, room: RoomKey) {
        self.room = Some(room);
    }

    /// Apply `invite_cancelled`. Returns `true` if it closed the invitation.
    pub(crate) fn cancel(&mut self) -> bool {
        self.close(IncomingState::Cancelled).is_ok()
    }
}

/// Response outcome of an outgoing invitation.
pub type InvitationResponse = Settlement<bool, InvitationError>;

/// Invitation this session sent.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingInvitation {
    handle: String,
    room: RoomKey,
    user: String,
    response: InvitationResponse,
    cancelling: Option<TransactionId>,
}

impl OutgoingInvitation {
    pub(crate) fn new(handle: String, room: RoomKey, user: String) -> Self {
        Self { handle, room, user, response: InvitationResponse::pending(), cancelling: None }
    }

    /// Correlation handle.
    pub fn handle(&self) -> &str {
        &self.handle
    }

    /// Room the user was invited into.
    pub fn room(&self) -> RoomKey {
        self.room
    }

    /// Invited user.
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Decision, or `Cancelled` if withdrawn first.
    pub fn response(&self) -> &InvitationResponse {
        &self.response
    }

    /// Whether `invite_response` for this handle is still handled.
    pub fn is_listening(&self) -> bool {
        !self.response.is_settled()
    }

    pub(crate) fn cancelling(&self) -> Option<TransactionId> {
        self.cancelling
    }

    pub(crate) fn set_cancelling(&mut self, tid: Option<TransactionId>) {
        self.cancelling = tid;
    }

    /// Apply `invite_response`. Returns `true` if it settled the response.
    pub(crate) fn respond(&mut self, accepted: bool) -> bool {
        self.response.resolve(accepted)
    }

    /// Apply a successful `invite_cancel`. Returns `true` if it settled the
    /// response.
    pub(crate) fn withdraw(&mut self) -> bool {
        self.cancelling = None;
        self.response.reject(InvitationError::Cancelled)
    }
}
