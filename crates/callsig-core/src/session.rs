//! Session state machine.
//!
//! The [`Session`] is the single owner of everything a signaling client
//! tracks: the transaction correlator, namespace mirrors, rooms and
//! invitations. It performs no I/O. Inbound channel text goes through
//! [`Session::handle_message`]; operations queue encoded requests that the
//! caller drains with [`Session::take_outgoing`] and sends in order.
//!
//! # Routing
//!
//! Every inbound message is processed in arrival order and dispatched by its
//! embedded id: answers by transaction id, `ns_*` pushes by namespace id,
//! `room_*` pushes by server room id, invitation pushes by handle. Each live
//! object counts as one listener until its terminal transition, after which
//! pushes for its id are ignored.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use callsig_proto::{
    InviteAnswer, JoinAnswer, NamespaceSnapshot, Request, ServerMessage, TransactionId,
    snapshot::decode_answer,
};
use serde_json::Value;

use crate::{
    correlator::{Continuation, Correlator},
    error::SessionError,
    event::{
        Completion, InvitationEvent, Notification, ProtocolWarning, SessionAction, Ticket,
    },
    invitation::{IncomingInvitation, IncomingState, OutgoingInvitation},
    namespace::Namespace,
    room::{Link, Room, RoomKey, RoomOrigin, RoomState},
};

/// Connection state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Nothing asked for yet
    #[default]
    Idle,
    /// `connect` called, waiting for `hello`
    Connecting,
    /// `hello` received
    Connected,
    /// Channel closed
    Closed,
}

type Outcome = Result<Option<Value>, SessionError>;

/// Client signaling session.
#[derive(Debug, Default)]
pub struct Session {
    state: SessionState,
    id: Option<String>,
    server: Option<Value>,
    correlator: Correlator,
    namespaces: BTreeMap<String, Namespace>,
    subscribing: BTreeSet<String>,
    rooms: BTreeMap<RoomKey, Room>,
    room_routes: HashMap<String, RoomKey>,
    incoming: BTreeMap<String, IncomingInvitation>,
    outgoing: BTreeMap<String, OutgoingInvitation>,
    next_room_key: u64,
    outbox: Vec<String>,
}

impl Session {
    /// Create an idle session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Connection state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Session id assigned by `hello`.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Server descriptor from `hello`.
    pub fn server(&self) -> Option<&Value> {
        self.server.as_ref()
    }

    /// Start waiting for the `hello` handshake.
    ///
    /// Returns the server descriptor when the handshake already happened;
    /// otherwise the caller waits for [`SessionAction::Connected`].
    pub fn connect(&mut self) -> Option<Value> {
        if self.state == SessionState::Idle {
            self.state = SessionState::Connecting;
        }
        self.server.clone()
    }

    /// Drain encoded requests in issue order.
    pub fn take_outgoing(&mut self) -> Vec<String> {
        std::mem::take(&mut self.outbox)
    }

    /// Id the next request will be stamped with.
    pub fn next_transaction_id(&self) -> TransactionId {
        self.correlator.next_tid()
    }

    /// Number of requests still awaiting an answer.
    pub fn pending_transactions(&self) -> usize {
        self.correlator.pending_count()
    }

    /// Whether `tid` is still awaiting an answer.
    pub fn is_pending(&self, tid: TransactionId) -> bool {
        self.correlator.is_pending(tid)
    }

    /// Live message listeners: the session itself, every subscribed
    /// namespace, every routed room and every open invitation.
    pub fn listener_count(&self) -> usize {
        1 + self.namespaces.len()
            + self.room_routes.len()
            + self.incoming.values().filter(|i| i.is_listening()).count()
            + self.outgoing.values().filter(|o| o.is_listening()).count()
    }

    /// Subscribed namespace.
    pub fn namespace(&self, id: &str) -> Option<&Namespace> {
        self.namespaces.get(id)
    }

    /// All subscribed namespaces.
    pub fn namespaces(&self) -> impl Iterator<Item = &Namespace> {
        self.namespaces.values()
    }

    /// Room by local key.
    pub fn get_room(&self, key: RoomKey) -> Option<&Room> {
        self.rooms.get(&key)
    }

    /// Room bound to a server room id.
    pub fn room_by_id(&self, id: &str) -> Option<&Room> {
        self.room_routes.get(id).and_then(|key| self.rooms.get(key))
    }

    /// All rooms, including left and failed ones not yet released.
    pub fn rooms(&self) -> impl Iterator<Item = &Room> {
        self.rooms.values()
    }

    /// Incoming invitation by handle.
    pub fn incoming_invitation(&self, handle: &str) -> Option<&IncomingInvitation> {
        self.incoming.get(handle)
    }

    /// All incoming invitations not yet released.
    pub fn incoming_invitations(&self) -> impl Iterator<Item = &IncomingInvitation> {
        self.incoming.values()
    }

    /// Outgoing invitation by handle.
    pub fn outgoing_invitation(&self, handle: &str) -> Option<&OutgoingInvitation> {
        self.outgoing.get(handle)
    }

    /// All outgoing invitations not yet released.
    pub fn outgoing_invitations(&self) -> impl Iterator<Item = &OutgoingInvitation> {
        self.outgoing.values()
    }

    // Operations

    /// Issue an arbitrary request whose answer is surfaced unchanged as
    /// [`Completion::Data`].
    ///
    /// # Errors
    ///
    /// - `SessionError::Encode` if the request cannot be encoded
    pub fn request(&mut self, request: Request) -> Result<TransactionId, SessionError> {
        self.issue(request, Continuation::Reply)
    }

    /// Subscribe to a namespace's presence.
    ///
    /// Completes with [`Completion::Subscribed`] once the mirror is seeded.
    ///
    /// # Errors
    ///
    /// - `SessionError::AlreadySubscribed` if a subscription is live or in flight
    pub fn subscribe(&mut self, namespace: &str) -> Result<TransactionId, SessionError> {
        if self.namespaces.contains_key(namespace) || self.subscribing.contains(namespace) {
            return Err(SessionError::AlreadySubscribed(namespace.to_string()));
        }

        let tid = self.issue(
            Request::NsSubscribe { namespace: namespace.to_string() },
            Continuation::Subscribe { namespace: namespace.to_string() },
        )?;
        self.subscribing.insert(namespace.to_string());
        Ok(tid)
    }

    /// Drop a namespace subscription. Repeated calls while in flight return
    /// the same transaction.
    ///
    /// # Errors
    ///
    /// - `SessionError::NotSubscribed` if no subscription is live
    pub fn unsubscribe(&mut self, namespace: &str) -> Result<TransactionId, SessionError> {
        let mirror = self
            .namespaces
            .get(namespace)
            .ok_or_else(|| SessionError::NotSubscribed(namespace.to_string()))?;
        if let Some(tid) = mirror.unsubscribing() {
            return Ok(tid);
        }

        let tid = self.issue(
            Request::NsUnsubscribe { namespace: namespace.to_string() },
            Continuation::Unsubscribe { namespace: namespace.to_string() },
        )?;
        if let Some(mirror) = self.namespaces.get_mut(namespace) {
            mirror.set_unsubscribing(Some(tid));
        }
        Ok(tid)
    }

    /// Register this session as a user of a namespace.
    pub fn register(&mut self, namespace: &str) -> Result<TransactionId, SessionError> {
        self.request(Request::NsUserRegister { namespace: namespace.to_string() })
    }

    /// Withdraw this session from a namespace.
    pub fn unregister(&mut self, namespace: &str) -> Result<TransactionId, SessionError> {
        self.request(Request::NsUserUnregister { namespace: namespace.to_string() })
    }

    /// Replace this session's global presence status.
    pub fn set_status(&mut self, status: Value) -> Result<TransactionId, SessionError> {
        self.request(Request::UserStatus { status })
    }

    /// Create an unconnected room. `None` asks the server to create one on
    /// connect.
    pub fn room(&mut self, requested: Option<String>) -> RoomKey {
        let key = self.allocate_room_key();
        self.rooms.insert(key, Room::new(key, RoomOrigin::Join { requested }, Value::Null));
        key
    }

    /// Join a room. Memoized: only the first call issues `room_join`.
    ///
    /// # Errors
    ///
    /// - `SessionError::UnknownRoom` if `key` does not name a room
    pub fn connect_room(&mut self, key: RoomKey) -> Result<Ticket, SessionError> {
        let room = self.rooms.get(&key).ok_or(SessionError::UnknownRoom(key))?;

        let requested = match (room.link(), room.origin()) {
            (Link::Connecting(tid), _) => return Ok(Ticket::Pending(*tid)),
            (Link::Connected | Link::Leaving(_) | Link::Left, _) => {
                return Ok(Ticket::Ready(Ok(Completion::RoomConnected { room: key })));
            },
            (Link::Failed(err), _) => return Ok(Ticket::Ready(Err(err.clone()))),
            (Link::Unconnected, RoomOrigin::Join { requested }) => requested.clone(),
            (Link::Unconnected, RoomOrigin::Invitation { .. }) => {
                return Err(SessionError::RoomNotConnected(key));
            },
        };

        let request = Request::RoomJoin { room: requested, status: room.own_status().clone() };
        let tid = self.issue(request, Continuation::Join { room: key })?;
        if let Some(room) = self.rooms.get_mut(&key) {
            room.begin_connect(tid);
        }
        Ok(Ticket::Pending(tid))
    }

    /// Set this session's peer status in a room.
    ///
    /// Before the join completes the status is only stored: it goes out with
    /// `room_join`, or in a `room_peer_status` issued as soon as an in-flight
    /// join completes.
    ///
    /// # Errors
    ///
    /// - `SessionError::RoomLeft` after leaving
    /// - `SessionError::RoomNotConnected` if the connect failed
    pub fn set_peer_status(&mut self, key: RoomKey, status: Value) -> Result<Ticket, SessionError> {
        let room = self.rooms.get_mut(&key).ok_or(SessionError::UnknownRoom(key))?;

        match room.state() {
            RoomState::Unconnected | RoomState::Connecting => {
                room.set_own_status(status);
                Ok(Ticket::Ready(Ok(Completion::Data(Value::Null))))
            },
            RoomState::Connected => {
                room.set_own_status(status.clone());
                let id = self.connected_room_id(key)?;
                let tid = self.request(Request::RoomPeerStatus { room: id, status })?;
                Ok(Ticket::Pending(tid))
            },
            RoomState::Leaving | RoomState::Left => Err(SessionError::RoomLeft(key)),
            RoomState::Failed => Err(SessionError::RoomNotConnected(key)),
        }
    }

    /// Set one key of the shared room status.
    pub fn set_room_status(
        &mut self,
        key: RoomKey,
        status_key: &str,
        value: Value,
    ) -> Result<TransactionId, SessionError> {
        let room = self.connected_room_id(key)?;
        self.request(Request::RoomStatus {
            room,
            key: status_key.to_string(),
            value,
            check: false,
            previous: None,
        })
    }

    /// Set one key of the shared room status if it still equals `previous`.
    /// The server rejects the transaction when the check fails.
    pub fn set_room_status_safe(
        &mut self,
        key: RoomKey,
        status_key: &str,
        value: Value,
        previous: Value,
    ) -> Result<TransactionId, SessionError> {
        let room = self.connected_room_id(key)?;
        self.request(Request::RoomStatus {
            room,
            key: status_key.to_string(),
            value,
            check: true,
            previous: Some(previous),
        })
    }

    /// Invite a user into a connected room.
    ///
    /// Completes with [`Completion::InvitationSent`]; the outgoing invitation
    /// is then tracked by its handle.
    pub fn invite(
        &mut self,
        key: RoomKey,
        user: &str,
        data: Value,
    ) -> Result<TransactionId, SessionError> {
        let room = self.connected_room_id(key)?;
        self.issue(
            Request::InviteSend { room, user: user.to_string(), data },
            Continuation::InviteSend { room: key, user: user.to_string() },
        )
    }

    /// Relay an application message to one peer of a connected room.
    pub fn send_to_peer(
        &mut self,
        key: RoomKey,
        user: &str,
        event: &str,
        data: Value,
    ) -> Result<TransactionId, SessionError> {
        let room = self.connected_room_id(key)?;
        self.request(Request::RoomPeerTo {
            room,
            user: user.to_string(),
            event: event.to_string(),
            data,
        })
    }

    /// Leave a connected room.
    ///
    /// The room and its peers are marked left when the answer arrives,
    /// whether or not the server reported an error.
    ///
    /// # Errors
    ///
    /// - `SessionError::RoomNotConnected` unless connected, leaving or left
    pub fn leave(&mut self, key: RoomKey) -> Result<Ticket, SessionError> {
        let room = self.rooms.get(&key).ok_or(SessionError::UnknownRoom(key))?;

        match room.link() {
            Link::Connected => {},
            Link::Leaving(tid) => return Ok(Ticket::Pending(*tid)),
            Link::Left => return Ok(Ticket::Ready(Ok(Completion::RoomLeft { room: key }))),
            Link::Unconnected | Link::Connecting(_) | Link::Failed(_) => {
                return Err(SessionError::RoomNotConnected(key));
            },
        }

        let id = room.id().ok_or(SessionError::RoomNotConnected(key))?.to_string();
        let tid = self.issue(Request::RoomLeave { room: id }, Continuation::Leave { room: key })?;
        if let Some(room) = self.rooms.get_mut(&key) {
            room.begin_leave(tid);
        }
        Ok(Ticket::Pending(tid))
    }

    /// Accept an incoming invitation.
    ///
    /// Creates a room that connects through the accept transaction; the
    /// returned transaction completes like [`Session::connect_room`].
    ///
    /// # Errors
    ///
    /// - `SessionError::InvitationClosed` if already accepted, denied or
    ///   cancelled
    pub fn accept(
        &mut self,
        handle: &str,
        status: Value,
    ) -> Result<(RoomKey, TransactionId), SessionError> {
        self.open_incoming(handle)?;

        let key = RoomKey::new(self.next_room_key);
        let tid = self.issue(
            Request::InviteAccept { handle: handle.to_string(), status: status.clone() },
            Continuation::Join { room: key },
        )?;
        self.next_room_key += 1;

        let mut room = Room::new(key, RoomOrigin::Invitation { handle: handle.to_string() }, status);
        room.begin_connect(tid);
        self.rooms.insert(key, room);

        if let Some(invitation) = self.incoming.get_mut(handle) {
            invitation.close(IncomingState::Accepted)?;
            invitation.bind_room(key);
        }
        Ok((key, tid))
    }

    /// Decline an incoming invitation.
    ///
    /// # Errors
    ///
    /// - `SessionError::InvitationClosed` if already accepted, denied or
    ///   cancelled
    pub fn deny(&mut self, handle: &str) -> Result<TransactionId, SessionError> {
        self.open_incoming(handle)?;

        let tid = self.request(Request::InviteDeny { handle: handle.to_string() })?;
        if let Some(invitation) = self.incoming.get_mut(handle) {
            invitation.close(IncomingState::Denied)?;
        }
        Ok(tid)
    }

    /// Withdraw an outgoing invitation. Repeated calls while in flight return
    /// the same transaction.
    ///
    /// # Errors
    ///
    /// - `SessionError::InvitationClosed` if the invitee already responded
    pub fn cancel_invitation(&mut self, handle: &str) -> Result<TransactionId, SessionError> {
        let invitation = self
            .outgoing
            .get(handle)
            .ok_or_else(|| SessionError::UnknownInvitation(handle.to_string()))?;
        if let Some(tid) = invitation.cancelling() {
            return Ok(tid);
        }
        if let Some(outcome) = invitation.response().outcome() {
            let state = match outcome {
                Ok(true) => "accepted",
                Ok(false) => "denied",
                Err(_) => "cancelled",
            };
            return Err(SessionError::InvitationClosed { handle: handle.to_string(), state });
        }

        let tid = self.issue(
            Request::InviteCancel { handle: handle.to_string() },
            Continuation::InviteCancel { handle: handle.to_string() },
        )?;
        if let Some(invitation) = self.outgoing.get_mut(handle) {
            invitation.set_cancelling(Some(tid));
        }
        Ok(tid)
    }

    /// Forget a left or failed room.
    ///
    /// # Errors
    ///
    /// - `SessionError::RoomActive` if the room is not terminal
    pub fn release_room(&mut self, key: RoomKey) -> Result<Room, SessionError> {
        let room = self.rooms.get(&key).ok_or(SessionError::UnknownRoom(key))?;
        if !matches!(room.state(), RoomState::Left | RoomState::Failed) {
            return Err(SessionError::RoomActive(key));
        }
        self.rooms.remove(&key).ok_or(SessionError::UnknownRoom(key))
    }

    /// Forget a handled incoming invitation or a settled outgoing one.
    ///
    /// # Errors
    ///
    /// - `SessionError::InvitationActive` while it still listens for pushes
    pub fn release_invitation(&mut self, handle: &str) -> Result<(), SessionError> {
        let listening = match (self.incoming.get(handle), self.outgoing.get(handle)) {
            (Some(incoming), _) => incoming.is_listening(),
            (None, Some(outgoing)) => outgoing.is_listening() || outgoing.cancelling().is_some(),
            (None, None) => return Err(SessionError::UnknownInvitation(handle.to_string())),
        };
        if listening {
            return Err(SessionError::InvitationActive(handle.to_string()));
        }

        if self.incoming.remove(handle).is_none() {
            self.outgoing.remove(handle);
        }
        Ok(())
    }

    // Inbound

    /// Handle one raw message from the channel.
    ///
    /// Never fails: undecodable input becomes a [`ProtocolWarning`].
    pub fn handle_message(&mut self, text: &str) -> Vec<SessionAction> {
        match ServerMessage::decode(text) {
            Ok(message) => self.handle_server_message(message),
            Err(err) => vec![ProtocolWarning::Malformed { reason: err.to_string() }.into()],
        }
    }

    /// Handle one decoded message from the channel.
    pub fn handle_server_message(&mut self, message: ServerMessage) -> Vec<SessionAction> {
        let kind = message.kind();

        match message {
            ServerMessage::Hello { id, server } => self.handle_hello(id, server),
            ServerMessage::Answer { tid, data, error } => self.handle_answer(tid, data, error),
            ServerMessage::InviteIncoming { handle, user, status, data } => {
                self.handle_invite_incoming(handle, user, status, data)
            },

            ServerMessage::NsUserAdd { namespace, user, status } => {
                self.with_namespace(&namespace, kind, |ns| ns.add_user(kind, user, status))
            },
            ServerMessage::NsUserUpdate { namespace, user, status } => {
                self.with_namespace(&namespace, kind, |ns| ns.update_user(user, status))
            },
            ServerMessage::NsUserRm { namespace, user } => {
                self.with_namespace(&namespace, kind, |ns| ns.remove_user(user))
            },
            ServerMessage::NsRoomAdd { namespace, room, status, peers } => {
                self.with_namespace(&namespace, kind, |ns| ns.add_room(kind, room, status, peers))
            },
            ServerMessage::NsRoomUpdate { namespace, room, status } => {
                self.with_namespace(&namespace, kind, |ns| ns.update_room(room, status))
            },
            ServerMessage::NsRoomRm { namespace, room } => {
                self.with_namespace(&namespace, kind, |ns| ns.remove_room(room))
            },
            ServerMessage::NsRoomPeerAdd { namespace, room, user, status, pending } => self
                .with_namespace(&namespace, kind, |ns| ns.add_peer(room, user, status, pending)),
            ServerMessage::NsRoomPeerUpdate { namespace, room, user, status, pending } => self
                .with_namespace(&namespace, kind, |ns| ns.update_peer(room, user, status, pending)),
            ServerMessage::NsRoomPeerRm { namespace, room, user } => {
                self.with_namespace(&namespace, kind, |ns| ns.remove_peer(room, user))
            },

            ServerMessage::RoomUpdate { room, status } => {
                self.with_room(&room, kind, |r| r.apply_status(status))
            },
            ServerMessage::RoomPeerAdd { room, user, status, pending } => {
                self.with_room(&room, kind, |r| r.add_peer(user, status, pending, true))
            },
            ServerMessage::RoomPeerUpdate { room, user, status, pending } => {
                self.with_room(&room, kind, |r| r.update_peer(user, status, pending))
            },
            ServerMessage::RoomPeerRm { room, user } => {
                self.with_room(&room, kind, |r| r.remove_peer(user))
            },
            ServerMessage::RoomPeerFrom { room, user, event, data } => {
                self.with_room(&room, kind, |r| r.peer_message(user, event, data))
            },

            ServerMessage::InviteCancelled { handle } => self.handle_invite_cancelled(handle),
            ServerMessage::InviteResponse { handle, accepted } => {
                self.handle_invite_response(handle, accepted)
            },
        }
    }

    /// Record that the channel closed.
    ///
    /// Pending transactions are not failed: nothing will answer them and
    /// nothing retries them.
    pub fn handle_closed(&mut self) -> Vec<SessionAction> {
        self.state = SessionState::Closed;
        vec![ProtocolWarning::ChannelClosed { orphaned: self.correlator.pending_count() }.into()]
    }

    fn handle_hello(&mut self, id: String, server: Value) -> Vec<SessionAction> {
        if self.id.is_some() {
            return vec![ProtocolWarning::DuplicateHello.into()];
        }

        tracing::info!(session = %id, "session established");
        self.id = Some(id.clone());
        self.server = Some(server.clone());
        self.state = SessionState::Connected;
        vec![SessionAction::Connected { id, server }]
    }

    fn handle_answer(
        &mut self,
        tid: Option<TransactionId>,
        data: Option<Value>,
        error: Option<String>,
    ) -> Vec<SessionAction> {
        let Some((tid, continuation)) = self.correlator.resolve(tid) else {
            return vec![ProtocolWarning::UnmatchedAnswer { tid }.into()];
        };

        let outcome = match error {
            Some(error) => Err(SessionError::Server(error)),
            None => Ok(data),
        };

        let mut actions = Vec::new();
        let result = match continuation {
            Continuation::Reply => outcome.map(|data| Completion::Data(data.unwrap_or(Value::Null))),
            Continuation::Subscribe { namespace } => {
                self.complete_subscribe(namespace, outcome, &mut actions)
            },
            Continuation::Unsubscribe { namespace } => {
                self.complete_unsubscribe(namespace, outcome, &mut actions)
            },
            Continuation::Join { room } => self.complete_join(room, outcome, &mut actions),
            Continuation::Leave { room } => self.complete_leave(room, outcome, &mut actions),
            Continuation::InviteSend { room, user } => self.complete_invite_send(room, user, outcome),
            Continuation::InviteCancel { handle } => {
                self.complete_invite_cancel(handle, outcome, &mut actions)
            },
        };

        actions.push(SessionAction::Completed { tid, result });
        actions
    }

    fn complete_subscribe(
        &mut self,
        namespace: String,
        outcome: Outcome,
        actions: &mut Vec<SessionAction>,
    ) -> Result<Completion, SessionError> {
        self.subscribing.remove(&namespace);

        let data = outcome?;
        let snapshot: NamespaceSnapshot = decode_answer(data.as_ref())?;

        let (mirror, seeded) = Namespace::seeded(namespace.clone(), snapshot);
        actions.extend(seeded);
        self.namespaces.insert(namespace.clone(), mirror);

        tracing::debug!(%namespace, "namespace subscribed");
        Ok(Completion::Subscribed { namespace })
    }

    fn complete_unsubscribe(
        &mut self,
        namespace: String,
        outcome: Outcome,
        actions: &mut Vec<SessionAction>,
    ) -> Result<Completion, SessionError> {
        if let Err(err) = outcome {
            if let Some(mirror) = self.namespaces.get_mut(&namespace) {
                mirror.set_unsubscribing(None);
            }
            return Err(err);
        }

        let mirror = self
            .namespaces
            .remove(&namespace)
            .ok_or_else(|| SessionError::NotSubscribed(namespace.clone()))?;
        actions.extend(mirror.tear_down());

        tracing::debug!(%namespace, "namespace unsubscribed");
        Ok(Completion::Unsubscribed { namespace })
    }

    fn complete_join(
        &mut self,
        key: RoomKey,
        outcome: Outcome,
        actions: &mut Vec<SessionAction>,
    ) -> Result<Completion, SessionError> {
        let result = self.bind_room(key, outcome, actions);
        if let Err(err) = &result {
            if let Some(room) = self.rooms.get_mut(&key) {
                room.fail(err.clone());
            }
        }
        result
    }

    fn bind_room(
        &mut self,
        key: RoomKey,
        outcome: Outcome,
        actions: &mut Vec<SessionAction>,
    ) -> Result<Completion, SessionError> {
        let data = outcome?;
        let answer: JoinAnswer = decode_answer(data.as_ref())?;

        if self.room_routes.contains_key(&answer.room) {
            return Err(SessionError::AlreadyJoined(answer.room));
        }
        let room = self.rooms.get_mut(&key).ok_or(SessionError::UnknownRoom(key))?;

        self.room_routes.insert(answer.room.clone(), key);
        let id = answer.room.clone();
        actions.extend(room.connected(answer));

        let flush = room
            .take_status_dirty()
            .then(|| Request::RoomPeerStatus { room: id.clone(), status: room.own_status().clone() });
        if let Some(request) = flush {
            if let Err(err) = self.request(request) {
                tracing::warn!(room = %key, %err, "could not publish peer status after join");
            }
        }

        tracing::debug!(room = %key, %id, "room connected");
        Ok(Completion::RoomConnected { room: key })
    }

    fn complete_leave(
        &mut self,
        key: RoomKey,
        outcome: Outcome,
        actions: &mut Vec<SessionAction>,
    ) -> Result<Completion, SessionError> {
        if let Err(err) = outcome {
            actions.push(ProtocolWarning::LeaveFailed { room: key, reason: err.to_string() }.into());
        }

        let room = self.rooms.get_mut(&key).ok_or(SessionError::UnknownRoom(key))?;
        if let Some(id) = room.id() {
            self.room_routes.remove(id);
        }
        actions.extend(room.depart());

        tracing::debug!(room = %key, "room left");
        Ok(Completion::RoomLeft { room: key })
    }

    fn complete_invite_send(
        &mut self,
        room: RoomKey,
        user: String,
        outcome: Outcome,
    ) -> Result<Completion, SessionError> {
        let data = outcome?;
        let InviteAnswer { handle } = decode_answer(data.as_ref())?;

        if self.outgoing.contains_key(&handle) {
            return Err(SessionError::Protocol(format!("duplicate invitation handle {handle}")));
        }

        self.outgoing.insert(handle.clone(), OutgoingInvitation::new(handle.clone(), room, user));
        Ok(Completion::InvitationSent { handle })
    }

    fn complete_invite_cancel(
        &mut self,
        handle: String,
        outcome: Outcome,
        actions: &mut Vec<SessionAction>,
    ) -> Result<Completion, SessionError> {
        let invitation = self
            .outgoing
            .get_mut(&handle)
            .ok_or_else(|| SessionError::UnknownInvitation(handle.clone()))?;

        if let Err(err) = outcome {
            invitation.set_cancelling(None);
            return Err(err);
        }

        if invitation.withdraw() {
            actions.push(
                Notification::OutgoingInvitation {
                    handle: handle.clone(),
                    event: InvitationEvent::Cancelled,
                }
                .into(),
            );
        }
        Ok(Completion::InvitationCancelled { handle })
    }

    fn handle_invite_incoming(
        &mut self,
        handle: String,
        user: String,
        status: Value,
        data: Value,
    ) -> Vec<SessionAction> {
        if self.incoming.contains_key(&handle) {
            return vec![
                ProtocolWarning::DuplicateEntity { kind: "invite_incoming", entity: handle }.into(),
            ];
        }

        self.incoming.insert(
            handle.clone(),
            IncomingInvitation::new(handle.clone(), user.clone(), status, data),
        );
        vec![Notification::Invitation { handle, user }.into()]
    }

    fn handle_invite_cancelled(&mut self, handle: String) -> Vec<SessionAction> {
        match self.incoming.get_mut(&handle).map(IncomingInvitation::cancel) {
            Some(true) => vec![
                Notification::IncomingInvitation { handle, event: InvitationEvent::Cancelled }
                    .into(),
            ],
            _ => {
                tracing::trace!(%handle, "ignoring invite_cancelled without open invitation");
                Vec::new()
            },
        }
    }

    fn handle_invite_response(&mut self, handle: String, accepted: bool) -> Vec<SessionAction> {
        match self.outgoing.get_mut(&handle).map(|invitation| invitation.respond(accepted)) {
            Some(true) => vec![
                Notification::OutgoingInvitation {
                    handle,
                    event: InvitationEvent::Responded { accepted },
                }
                .into(),
            ],
            _ => {
                tracing::trace!(%handle, "ignoring invite_response without pending invitation");
                Vec::new()
            },
        }
    }

    fn with_namespace(
        &mut self,
        namespace: &str,
        kind: &'static str,
        apply: impl FnOnce(&mut Namespace) -> Vec<SessionAction>,
    ) -> Vec<SessionAction> {
        match self.namespaces.get_mut(namespace) {
            Some(mirror) => apply(mirror),
            None => {
                tracing::trace!(namespace, kind, "ignoring event for unsubscribed namespace");
                Vec::new()
            },
        }
    }

    fn with_room(
        &mut self,
        id: &str,
        kind: &'static str,
        apply: impl FnOnce(&mut Room) -> Vec<SessionAction>,
    ) -> Vec<SessionAction> {
        match self.room_routes.get(id).and_then(|key| self.rooms.get_mut(key)) {
            Some(room) => apply(room),
            None => {
                tracing::trace!(room = id, kind, "ignoring event for unjoined room");
                Vec::new()
            },
        }
    }

    fn issue(
        &mut self,
        request: Request,
        continuation: Continuation,
    ) -> Result<TransactionId, SessionError> {
        let (tid, text) = self.correlator.issue(&request, continuation)?;
        self.outbox.push(text);
        Ok(tid)
    }

    fn allocate_room_key(&mut self) -> RoomKey {
        let key = RoomKey::new(self.next_room_key);
        self.next_room_key += 1;
        key
    }

    fn connected_room_id(&self, key: RoomKey) -> Result<String, SessionError> {
        let room = self.rooms.get(&key).ok_or(SessionError::UnknownRoom(key))?;
        match (room.state(), room.id()) {
            (RoomState::Connected, Some(id)) => Ok(id.to_string()),
            (RoomState::Leaving | RoomState::Left, _) => Err(SessionError::RoomLeft(key)),
            _ => Err(SessionError::RoomNotConnected(key)),
        }
    }

    fn open_incoming(&self, handle: &str) -> Result<(), SessionError> {
        let invitation = self
            .incoming
            .get(handle)
            .ok_or_else(|| SessionError::UnknownInvitation(handle.to_string()))?;
        match invitation.state() {
            IncomingState::Open => Ok(()),
            state => Err(SessionError::InvitationClosed {
                handle: handle.to_string(),
                state: state.as_str(),
            }),
        }
    }
}
