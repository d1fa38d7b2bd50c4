//! Async runtime over a signaling channel.
//!
//! The [`Runtime`] owns a [`Channel`] and a sans-IO [`Session`] and turns the
//! session's tickets into awaited results. It is single-threaded and
//! cooperative: an operation issues its request, flushes the outbox, then
//! pumps inbound messages strictly in arrival order until its outcome is
//! known. Every message pumped along the way updates the session and is
//! dispatched to listeners, whichever operation happened to be waiting.

use std::collections::BTreeSet;

use callsig_core::{
    AcceptanceError, Change, Completion, Notification, Request, RoomKey, RoomState, Session,
    SessionAction, SessionError, Ticket, TransactionId,
};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::{
    Channel, ClientError, RuntimeConfig,
    listener::{ListenerId, Listeners, Scope},
};

/// Async driver for one signaling session.
///
/// # Type Parameters
///
/// - `C`: transport carrying the session's messages
pub struct Runtime<C: Channel> {
    channel: C,
    session: Session,
    config: RuntimeConfig,
    listeners: Listeners,
    seen_invitations: BTreeSet<String>,
    opened: bool,
    closed: bool,
}

impl<C: Channel> Runtime<C> {
    /// Create a runtime with the default configuration.
    pub fn new(channel: C) -> Self {
        Self::with_config(channel, RuntimeConfig::default())
    }

    /// Create a runtime with an explicit configuration.
    pub fn with_config(channel: C, config: RuntimeConfig) -> Self {
        Self {
            channel,
            session: Session::new(),
            config,
            listeners: Listeners::default(),
            seen_invitations: BTreeSet::new(),
            opened: false,
            closed: false,
        }
    }

    /// Underlying session state.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Underlying channel.
    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Whether the channel has reported closure.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Receive notifications matching `scope`.
    pub fn listen(&mut self, scope: Scope) -> (ListenerId, mpsc::UnboundedReceiver<Notification>) {
        self.listeners.add(scope)
    }

    /// Stop delivering to a listener. Returns `false` if it was not
    /// registered.
    pub fn unlisten(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Number of registered notification listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Open the channel and wait for `hello`. Returns the server descriptor.
    ///
    /// # Errors
    ///
    /// - `ClientError::Channel` if the channel cannot be opened
    /// - `ClientError::ChannelClosed` if it closes before `hello`
    pub async fn connect(&mut self) -> Result<Value, ClientError> {
        if let Some(server) = self.session.connect() {
            return Ok(server);
        }
        if !self.opened {
            self.channel.connect().await.map_err(|e| ClientError::Channel(e.to_string()))?;
            self.opened = true;
        }
        self.drive(|session, _| session.server().cloned()).await
    }

    /// Issue an arbitrary request and return its answer payload.
    pub async fn request(&mut self, request: Request) -> Result<Value, ClientError> {
        let tid = self.session.request(request)?;
        self.complete(tid).await.map(into_data)
    }

    /// Subscribe to a namespace and wait until its mirror is seeded.
    pub async fn subscribe(&mut self, namespace: &str) -> Result<(), ClientError> {
        let tid = self.session.subscribe(namespace)?;
        self.complete(tid).await.map(drop)
    }

    /// Drop a namespace subscription.
    pub async fn unsubscribe(&mut self, namespace: &str) -> Result<(), ClientError> {
        let tid = self.session.unsubscribe(namespace)?;
        self.complete(tid).await.map(drop)
    }

    /// Register this session as a user of a namespace.
    pub async fn register(&mut self, namespace: &str) -> Result<Value, ClientError> {
        let tid = self.session.register(namespace)?;
        self.complete(tid).await.map(into_data)
    }

    /// Withdraw this session from a namespace.
    pub async fn unregister(&mut self, namespace: &str) -> Result<Value, ClientError> {
        let tid = self.session.unregister(namespace)?;
        self.complete(tid).await.map(into_data)
    }

    /// Replace this session's global presence status.
    pub async fn set_status(&mut self, status: Value) -> Result<Value, ClientError> {
        let tid = self.session.set_status(status)?;
        self.complete(tid).await.map(into_data)
    }

    /// Create an unconnected room.
    pub fn room(&mut self, requested: Option<String>) -> RoomKey {
        self.session.room(requested)
    }

    /// Join a room. Concurrent and repeated calls share one `room_join`.
    pub async fn connect_room(&mut self, key: RoomKey) -> Result<(), ClientError> {
        let ticket = self.session.connect_room(key)?;
        self.settle(ticket).await.map(drop)
    }

    /// Set this session's peer status in a room.
    pub async fn set_peer_status(&mut self, key: RoomKey, status: Value) -> Result<(), ClientError> {
        let ticket = self.session.set_peer_status(key, status)?;
        self.settle(ticket).await.map(drop)
    }

    /// Set one key of the shared room status.
    pub async fn set_room_status(
        &mut self,
        key: RoomKey,
        status_key: &str,
        value: Value,
    ) -> Result<Value, ClientError> {
        let tid = self.session.set_room_status(key, status_key, value)?;
        self.complete(tid).await.map(into_data)
    }

    /// Set one key of the shared room status if it still equals `previous`.
    pub async fn set_room_status_safe(
        &mut self,
        key: RoomKey,
        status_key: &str,
        value: Value,
        previous: Value,
    ) -> Result<Value, ClientError> {
        let tid = self.session.set_room_status_safe(key, status_key, value, previous)?;
        self.complete(tid).await.map(into_data)
    }

    /// Invite a user into a connected room. Returns the invitation handle.
    pub async fn invite(&mut self, key: RoomKey, user: &str, data: Value) -> Result<String, ClientError> {
        let tid = self.session.invite(key, user, data)?;
        match self.complete(tid).await? {
            Completion::InvitationSent { handle } => Ok(handle),
            other => Err(ClientError::UnexpectedCompletion(format!("{other:?}"))),
        }
    }

    /// Relay an application message to one peer.
    pub async fn send_to_peer(
        &mut self,
        key: RoomKey,
        user: &str,
        event: &str,
        data: Value,
    ) -> Result<Value, ClientError> {
        let tid = self.session.send_to_peer(key, user, event, data)?;
        self.complete(tid).await.map(into_data)
    }

    /// Leave a room. Succeeds even when the server reports an error.
    pub async fn leave(&mut self, key: RoomKey) -> Result<(), ClientError> {
        let ticket = self.session.leave(key)?;
        self.settle(ticket).await.map(drop)
    }

    /// Accept an incoming invitation and wait until its room is joined.
    pub async fn accept(&mut self, handle: &str, status: Value) -> Result<RoomKey, ClientError> {
        let (key, tid) = self.session.accept(handle, status)?;
        self.complete(tid).await?;
        Ok(key)
    }

    /// Decline an incoming invitation.
    pub async fn deny(&mut self, handle: &str) -> Result<(), ClientError> {
        let tid = self.session.deny(handle)?;
        self.complete(tid).await.map(drop)
    }

    /// Withdraw an outgoing invitation.
    pub async fn cancel_invitation(&mut self, handle: &str) -> Result<(), ClientError> {
        let tid = self.session.cancel_invitation(handle)?;
        self.complete(tid).await.map(drop)
    }

    /// Wait for an open incoming invitation not returned before. Returns its
    /// handle.
    pub async fn wait_invitation(&mut self) -> Result<String, ClientError> {
        let mut seen = std::mem::take(&mut self.seen_invitations);
        seen.retain(|handle| {
            self.session.incoming_invitation(handle).is_some_and(|i| i.is_listening())
        });

        let found = self
            .drive(|session, _| {
                session
                    .incoming_invitations()
                    .find(|i| i.is_listening() && !seen.contains(i.handle()))
                    .map(|i| i.handle().to_string())
            })
            .await;

        if let Ok(handle) = &found {
            seen.insert(handle.clone());
        }
        self.seen_invitations = seen;
        found
    }

    /// Wait for the invitee's decision on an outgoing invitation.
    ///
    /// # Errors
    ///
    /// - `ClientError::Invitation` if the invitation was cancelled first
    pub async fn wait_response(&mut self, handle: &str) -> Result<bool, ClientError> {
        self.drive(|session, _| match session.outgoing_invitation(handle) {
            None => Some(Err(ClientError::from(SessionError::UnknownInvitation(handle.to_string())))),
            Some(invitation) => {
                invitation.response().outcome().map(|outcome| (*outcome).map_err(ClientError::from))
            },
        })
        .await?
    }

    /// Wait until a room peer is admitted.
    ///
    /// # Errors
    ///
    /// - `ClientError::Acceptance` if the peer or this session leaves first
    pub async fn wait_peer_accepted(&mut self, key: RoomKey, user: &str) -> Result<(), ClientError> {
        self.drive(|session, actions| {
            let Some(room) = session.get_room(key) else {
                return Some(Err(ClientError::from(SessionError::UnknownRoom(key))));
            };
            let acceptance = match room.peer(user) {
                Some(peer) => Some(peer.accepted()),
                None => room.departed(user),
            };
            if let Some(outcome) = acceptance.and_then(|accepted| accepted.outcome()) {
                return Some((*outcome).map_err(ClientError::from));
            }

            let departed = actions.iter().any(|action| {
                matches!(
                    action,
                    SessionAction::Notify(Notification::RoomPeer { room, user: u, change: Change::Left })
                        if *room == key && u == user
                )
            });
            let terminal = matches!(room.state(), RoomState::Left | RoomState::Failed);
            (departed || terminal).then_some(Err(ClientError::from(AcceptanceError::Left)))
        })
        .await?
    }

    /// Receive and handle exactly one inbound message.
    ///
    /// # Errors
    ///
    /// - `ClientError::ChannelClosed` once the channel is closed
    pub async fn pump(&mut self) -> Result<Vec<SessionAction>, ClientError> {
        if self.closed {
            return Err(ClientError::ChannelClosed);
        }

        let Some(text) = self.channel.recv().await else {
            self.closed = true;
            let actions = self.session.handle_closed();
            self.dispatch(&actions);
            return Err(ClientError::ChannelClosed);
        };

        let actions = self.session.handle_message(&text);
        self.flush().await?;
        self.dispatch(&actions);
        Ok(actions)
    }

    async fn complete(&mut self, tid: TransactionId) -> Result<Completion, ClientError> {
        let result = self
            .drive(|_, actions| {
                actions.iter().find_map(|action| match action {
                    SessionAction::Completed { tid: settled, result } if *settled == tid => {
                        Some(result.clone())
                    },
                    _ => None,
                })
            })
            .await?;
        Ok(result?)
    }

    async fn settle(&mut self, ticket: Ticket) -> Result<Completion, ClientError> {
        match ticket {
            Ticket::Ready(result) => {
                self.flush().await?;
                Ok(result?)
            },
            Ticket::Pending(tid) => self.complete(tid).await,
        }
    }

    /// Flush, then pump until `probe` yields. `probe` sees the session after
    /// each message together with the actions that message produced; it is
    /// also consulted once up front with no actions.
    async fn drive<T>(
        &mut self,
        mut probe: impl FnMut(&Session, &[SessionAction]) -> Option<T>,
    ) -> Result<T, ClientError> {
        self.flush().await?;
        if let Some(found) = probe(&self.session, &[]) {
            return Ok(found);
        }

        match self.config.wait_timeout {
            None => self.pump_until(&mut probe).await,
            Some(limit) => tokio::time::timeout(limit, self.pump_until(&mut probe))
                .await
                .map_err(|_| ClientError::Timeout(limit))?,
        }
    }

    async fn pump_until<T>(
        &mut self,
        probe: &mut impl FnMut(&Session, &[SessionAction]) -> Option<T>,
    ) -> Result<T, ClientError> {
        loop {
            let actions = self.pump().await?;
            if let Some(found) = probe(&self.session, &actions) {
                return Ok(found);
            }
        }
    }

    async fn flush(&mut self) -> Result<(), ClientError> {
        for message in self.session.take_outgoing() {
            self.channel.send(message).await.map_err(|e| ClientError::Channel(e.to_string()))?;
        }
        Ok(())
    }

    fn dispatch(&mut self, actions: &[SessionAction]) {
        for action in actions {
            match action {
                SessionAction::Notify(notification) => self.listeners.dispatch(notification),
                SessionAction::Connected { id, .. } => tracing::debug!(%id, "handshake complete"),
                SessionAction::Completed { tid, .. } => tracing::trace!(tid, "transaction completed"),
                SessionAction::Warning(_) => {},
            }
        }
    }
}

fn into_data(completion: Completion) -> Value {
    match completion {
        Completion::Data(data) => data,
        _ => Value::Null,
    }
}
