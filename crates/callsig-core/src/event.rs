//! Session actions, tickets and notifications.

use callsig_proto::TransactionId;
use serde_json::Value;
use thiserror::Error;

use crate::{error::SessionError, room::RoomKey};

/// Handle to the outcome of a session operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Ticket {
    /// Settles later through exactly one [`SessionAction::Completed`] with
    /// this transaction id.
    Pending(TransactionId),
    /// Settled without a new transaction (memoized or local).
    Ready(Result<Completion, SessionError>),
}

impl Ticket {
    /// Transaction id of a pending ticket.
    pub fn tid(&self) -> Option<TransactionId> {
        match self {
            Self::Pending(tid) => Some(*tid),
            Self::Ready(_) => None,
        }
    }
}

/// Successful outcome of a session operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// Server answered with this payload (`null` when absent).
    Data(Value),
    /// Namespace mirror is live and seeded.
    Subscribed {
        /// Namespace id
        namespace: String,
    },
    /// Namespace mirror has been torn down.
    Unsubscribed {
        /// Namespace id
        namespace: String,
    },
    /// Room is joined and bound to its server id.
    RoomConnected {
        /// Local room key
        room: RoomKey,
    },
    /// Room and all its peers are marked left.
    RoomLeft {
        /// Local room key
        room: RoomKey,
    },
    /// Invitation was delivered and can now be awaited.
    InvitationSent {
        /// Correlation handle
        handle: String,
    },
    /// Invitation was withdrawn.
    InvitationCancelled {
        /// Correlation handle
        handle: String,
    },
}

/// Actions the session produces while handling inbound messages.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    /// First `hello` arrived; the session is connected.
    Connected {
        /// Session id assigned by the server
        id: String,
        /// Opaque server descriptor
        server: Value,
    },

    /// A pending transaction settled.
    Completed {
        /// Transaction id of the settled ticket
        tid: TransactionId,
        /// Outcome
        result: Result<Completion, SessionError>,
    },

    /// State changed; deliver to listeners.
    Notify(Notification),

    /// Inbound message was dropped or absorbed. Never fatal.
    Warning(ProtocolWarning),
}

/// Entity inside a namespace mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamespaceEntity {
    /// Registered user
    User(String),
    /// Room visible in the namespace
    Room(String),
    /// Peer of a namespace room
    Peer {
        /// Room id
        room: String,
        /// Peer user id
        user: String,
    },
}

/// What happened to an entity.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// Entity was created
    Added,
    /// Entity status changed
    Updated,
    /// Peer moved from pending to admitted
    Accepted,
    /// Entity was removed; this is its last event
    Left,
    /// Application message addressed to a peer
    Message {
        /// Application event name
        event: String,
        /// Application payload
        data: Value,
    },
}

/// Container-level namespace events.
#[derive(Debug, Clone, PartialEq)]
pub enum NamespaceEvent {
    /// One entity changed; mirrored as [`Notification::NamespaceEntity`]
    Entity {
        /// Entity that changed
        entity: NamespaceEntity,
        /// What happened
        change: Change,
    },
    /// Aggregate event after any mutation
    Changed,
    /// Mirror torn down; no further events follow
    Unsubscribed,
}

/// Container-level room events.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    /// Room joined and bound to its server id
    Connected,
    /// Shared room status replaced
    StatusChanged,
    /// One peer changed; mirrored as [`Notification::RoomPeer`]
    Peer {
        /// Peer user id
        user: String,
        /// What happened
        change: Change,
    },
    /// Aggregate event after any peer mutation
    Changed,
    /// Room left; no further events follow
    Left,
}

/// Invitation lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvitationEvent {
    /// Withdrawn before a decision
    Cancelled,
    /// Invitee decided
    Responded {
        /// Decision
        accepted: bool,
    },
}

/// State-change notifications.
///
/// Entity changes are emitted twice: once on the container (namespace or
/// room) and once on the entity itself, so consumers may listen at either
/// level.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// Session-level: an invitation arrived.
    Invitation {
        /// Correlation handle
        handle: String,
        /// Inviting user
        user: String,
    },
    /// Namespace container event.
    Namespace {
        /// Namespace id
        namespace: String,
        /// Event
        event: NamespaceEvent,
    },
    /// Entity-level namespace event.
    NamespaceEntity {
        /// Namespace id
        namespace: String,
        /// Entity that changed
        entity: NamespaceEntity,
        /// What happened
        change: Change,
    },
    /// Room container event.
    Room {
        /// Local room key
        room: RoomKey,
        /// Event
        event: RoomEvent,
    },
    /// Entity-level room peer event.
    RoomPeer {
        /// Local room key
        room: RoomKey,
        /// Peer user id
        user: String,
        /// What happened
        change: Change,
    },
    /// Incoming invitation event.
    IncomingInvitation {
        /// Correlation handle
        handle: String,
        /// Event
        event: InvitationEvent,
    },
    /// Outgoing invitation event.
    OutgoingInvitation {
        /// Correlation handle
        handle: String,
        /// Event
        event: InvitationEvent,
    },
}

/// Non-fatal diagnostics for inbound traffic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolWarning {
    /// Message failed to decode
    #[error("dropped malformed message: {reason}")]
    Malformed {
        /// Decoder failure
        reason: String,
    },

    /// Answer with no id, or an id nothing is waiting for
    #[error("dropped answer for unknown transaction {tid:?}")]
    UnmatchedAnswer {
        /// Transaction id carried by the answer, if any
        tid: Option<TransactionId>,
    },

    /// `hello` after the session was already established
    #[error("ignored repeated hello")]
    DuplicateHello,

    /// Update or removal for an entity that is not tracked
    #[error("dropped {kind} event for unknown {entity}")]
    UnknownEntity {
        /// Wire type of the dropped event
        kind: &'static str,
        /// Entity id
        entity: String,
    },

    /// Add for an entity that is already tracked
    #[error("dropped {kind} event for existing {entity}")]
    DuplicateEntity {
        /// Wire type of the dropped event
        kind: &'static str,
        /// Entity id
        entity: String,
    },

    /// Update tried to make an admitted peer pending again
    #[error("ignored {kind} reopening admission of {entity}")]
    PendingReopened {
        /// Wire type of the update
        kind: &'static str,
        /// Peer id
        entity: String,
    },

    /// `room_leave` failed; the room was left locally anyway
    #[error("leave of {room} failed on the server: {reason}")]
    LeaveFailed {
        /// Local room key
        room: RoomKey,
        /// Server error
        reason: String,
    },

    /// Channel closed with transactions still pending
    #[error("channel closed with {orphaned} transactions pending")]
    ChannelClosed {
        /// Transactions that will never settle
        orphaned: usize,
    },
}

impl From<ProtocolWarning> for SessionAction {
    fn from(warning: ProtocolWarning) -> Self {
        tracing::warn!(%warning, "protocol warning");
        Self::Warning(warning)
    }
}

impl From<Notification> for SessionAction {
    fn from(notification: Notification) -> Self {
        Self::Notify(notification)
    }
}
