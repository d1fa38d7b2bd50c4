//! Core
//!
//! Sans-IO signaling state machine for multi-party call setup. Correlates
//! request/answer transactions and keeps namespace presence, rooms, peers and
//! invitations converged with the server over one shared message channel.
//!
//! # Architecture
//!
//! The [`Session`] never touches the channel. Operations return a
//! [`TransactionId`] or a [`Ticket`] and queue encoded requests, drained with
//! [`Session::take_outgoing`]. Inbound text is fed to
//! [`Session::handle_message`], which returns [`SessionAction`]s for the
//! caller to act on: handshake completion, settled transactions,
//! notifications and non-fatal protocol warnings.
//!
//! # Components
//!
//! - [`Session`]: owner of every other object; routes inbound messages by id
//! - [`Namespace`]: presence mirror of users, rooms and room peers
//! - [`Room`]: joined call room with peers and acceptance outcomes
//! - [`IncomingInvitation`] / [`OutgoingInvitation`]: handle-correlated
//!   invitation handshake
//! - [`Settlement`]: single-settlement outcome used for acceptance and
//!   invitation responses

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod correlator;
mod error;
mod event;
mod invitation;
mod namespace;
mod room;
mod session;
mod settlement;

pub use callsig_proto::{Request, ServerMessage, TransactionId};
pub use error::{AcceptanceError, InvitationError, SessionError};
pub use event::{
    Change, Completion, InvitationEvent, NamespaceEntity, NamespaceEvent, Notification,
    ProtocolWarning, RoomEvent, SessionAction, Ticket,
};
pub use invitation::{IncomingInvitation, IncomingState, InvitationResponse, OutgoingInvitation};
pub use namespace::{Namespace, NamespaceRoom, NamespaceRoomPeer, NamespaceUser};
pub use room::{Room, RoomKey, RoomOrigin, RoomPeer, RoomState};
pub use session::{Session, SessionState};
pub use settlement::{Acceptance, PeerPresence, Settlement};
