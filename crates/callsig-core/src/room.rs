//! Call rooms.
//!
//! A [`Room`] exists locally before the server knows about it: the session
//! allocates a [`RoomKey`] when the room is created and binds the server room
//! id once the join (or invitation accept) answer arrives. From then on the
//! session routes `room_*` pushes carrying that id to this room until it is
//! left.
//!
//! # Lifecycle
//!
//! ```text
//! Unconnected ──connect──▶ Connecting ──answer ok──▶ Connected ──leave──▶ Leaving ──▶ Left
//!                              │
//!                              └──answer error──▶ Failed
//! ```
//!
//! `Left` and `Failed` are terminal. Connect is memoized: every state but
//! `Unconnected` hands back the in-flight or settled outcome instead of
//! issuing another `room_join`.

use std::{collections::BTreeMap, fmt};

use callsig_proto::{JoinAnswer, TransactionId};
use serde_json::Value;

use crate::{
    error::SessionError,
    event::{Change, Notification, ProtocolWarning, RoomEvent, SessionAction},
    settlement::{Acceptance, PeerPresence},
};

/// Session-local room identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomKey(u64);

impl RoomKey {
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw key value.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How the room came to exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomOrigin {
    /// `Session::room`; `None` asks the server to create a room.
    Join {
        /// Room id passed to `room_join`
        requested: Option<String>,
    },
    /// Accepting an incoming invitation.
    Invitation {
        /// Handle of the accepted invitation
        handle: String,
    },
}

/// Observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    /// Created, no join issued
    Unconnected,
    /// Join or accept in flight
    Connecting,
    /// Bound to a server room
    Connected,
    /// Leave in flight; pushes are still routed
    Leaving,
    /// Left; terminal
    Left,
    /// Join failed; terminal
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Link {
    Unconnected,
    Connecting(TransactionId),
    Connected,
    Leaving(TransactionId),
    Left,
    Failed(SessionError),
}

/// Peer of a joined room.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomPeer {
    id: String,
    first: bool,
    presence: PeerPresence,
}

impl RoomPeer {
    /// Peer user id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether the peer arrived through a `room_peer_add` push.
    pub fn first(&self) -> bool {
        self.first
    }

    /// Application status.
    pub fn status(&self) -> &Value {
        self.presence.status()
    }

    /// Whether the peer still awaits admission.
    pub fn pending(&self) -> bool {
        self.presence.pending()
    }

    /// Acceptance outcome.
    pub fn accepted(&self) -> &Acceptance {
        self.presence.accepted()
    }
}

/// Joined or joinable call room.
#[derive(Debug, Clone, PartialEq)]
pub struct Room {
    key: RoomKey,
    id: Option<String>,
    origin: RoomOrigin,
    status: Value,
    own_status: Value,
    status_dirty: bool,
    peers: BTreeMap<String, RoomPeer>,
    departed: BTreeMap<String, Acceptance>,
    link: Link,
}

impl Room {
    pub(crate) fn new(key: RoomKey, origin: RoomOrigin, own_status: Value) -> Self {
        Self {
            key,
            id: None,
            origin,
            status: Value::Null,
            own_status,
            status_dirty: false,
            peers: BTreeMap::new(),
            departed: BTreeMap::new(),
            link: Link::Unconnected,
        }
    }

    /// Local key.
    pub fn key(&self) -> RoomKey {
        self.key
    }

    /// Server room id, once connected.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// How the room was created.
    pub fn origin(&self) -> &RoomOrigin {
        &self.origin
    }

    /// Shared room status.
    pub fn status(&self) -> &Value {
        &self.status
    }

    /// This session's peer status in the room.
    pub fn own_status(&self) -> &Value {
        &self.own_status
    }

    /// Peers by user id.
    pub fn peers(&self) -> &BTreeMap<String, RoomPeer> {
        &self.peers
    }

    /// Look up a peer.
    pub fn peer(&self, user: &str) -> Option<&RoomPeer> {
        self.peers.get(user)
    }

    /// Acceptance outcome of a peer that left while this session stayed.
    ///
    /// Cleared when the peer joins again.
    pub fn departed(&self, user: &str) -> Option<&Acceptance> {
        self.departed.get(user)
    }

    /// Connection state.
    pub fn state(&self) -> RoomState {
        match self.link {
            Link::Unconnected => RoomState::Unconnected,
            Link::Connecting(_) => RoomState::Connecting,
            Link::Connected => RoomState::Connected,
            Link::Leaving(_) => RoomState::Leaving,
            Link::Left => RoomState::Left,
            Link::Failed(_) => RoomState::Failed,
        }
    }

    /// Error that failed the connect, if any.
    pub fn failure(&self) -> Option<&SessionError> {
        match &self.link {
            Link::Failed(err) => Some(err),
            _ => None,
        }
    }

    pub(crate) fn link(&self) -> &Link {
        &self.link
    }

    pub(crate) fn begin_connect(&mut self, tid: TransactionId) {
        self.link = Link::Connecting(tid);
    }

    pub(crate) fn begin_leave(&mut self, tid: TransactionId) {
        self.link = Link::Leaving(tid);
    }

    pub(crate) fn fail(&mut self, err: SessionError) {
        tracing::debug!(room = %self.key, %err, "room connect failed");
        self.link = Link::Failed(err);
    }

    /// Store the local peer status. Returns `true` when it must be pushed to
    /// the server once the in-flight join completes.
    pub(crate) fn set_own_status(&mut self, status: Value) -> bool {
        self.own_status = status;
        self.status_dirty = matches!(self.link, Link::Connecting(_));
        self.status_dirty
    }

    pub(crate) fn take_status_dirty(&mut self) -> bool {
        std::mem::take(&mut self.status_dirty)
    }

    /// Bind to the server room described by a join or accept answer.
    ///
    /// Snapshot peers were present before this session and are added with
    /// `first = false`.
    pub(crate) fn connected(&mut self, answer: JoinAnswer) -> Vec<SessionAction> {
        self.id = Some(answer.room);
        self.status = answer.status;
        self.link = Link::Connected;

        let mut actions =
            vec![Notification::Room { room: self.key, event: RoomEvent::Connected }.into()];
        for (user, peer) in answer.peers {
            actions.extend(self.add_peer(user, peer.status, peer.pending, false));
        }
        actions
    }

    pub(crate) fn apply_status(&mut self, status: Value) -> Vec<SessionAction> {
        self.status = status;
        vec![Notification::Room { room: self.key, event: RoomEvent::StatusChanged }.into()]
    }

    pub(crate) fn add_peer(
        &mut self,
        user: String,
        status: Value,
        pending: bool,
        first: bool,
    ) -> Vec<SessionAction> {
        if self.peers.contains_key(&user) {
            return vec![ProtocolWarning::DuplicateEntity { kind: "room_peer_add", entity: user }.into()];
        }

        let peer = RoomPeer { id: user.clone(), first, presence: PeerPresence::new(status, pending) };
        self.departed.remove(&user);
        self.peers.insert(user.clone(), peer);
        self.peer_change(user, Change::Added)
    }

    pub(crate) fn update_peer(
        &mut self,
        user: String,
        status: Option<Value>,
        pending: Option<bool>,
    ) -> Vec<SessionAction> {
        let Some(peer) = self.peers.get_mut(&user) else {
            return vec![ProtocolWarning::UnknownEntity { kind: "room_peer_update", entity: user }.into()];
        };

        let change = peer.presence.update(status, pending);

        let mut actions = Vec::new();
        if change.reopen_ignored {
            actions.push(
                ProtocolWarning::PendingReopened { kind: "room_peer_update", entity: user.clone() }
                    .into(),
            );
        }
        actions.extend(self.peer_change(user.clone(), Change::Updated));
        if change.accepted {
            actions.extend(self.peer_change(user, Change::Accepted));
        }
        actions
    }

    pub(crate) fn remove_peer(&mut self, user: String) -> Vec<SessionAction> {
        let Some(mut peer) = self.peers.remove(&user) else {
            return vec![ProtocolWarning::UnknownEntity { kind: "room_peer_rm", entity: user }.into()];
        };

        peer.presence.depart();
        self.departed.insert(user.clone(), peer.presence.accepted().clone());
        self.peer_change(user, Change::Left)
    }

    pub(crate) fn peer_message(&self, user: String, event: String, data: Value) -> Vec<SessionAction> {
        if !self.peers.contains_key(&user) {
            return vec![ProtocolWarning::UnknownEntity { kind: "room_peer_from", entity: user }.into()];
        }

        vec![
            Notification::RoomPeer { room: self.key, user, change: Change::Message { event, data } }
                .into(),
        ]
    }

    /// Mark every peer and then the room itself as left.
    ///
    /// Pending peers have their acceptance rejected. Each peer gets exactly
    /// one `Left`, and the room gets exactly one `Left` after its peers. The
    /// peer map is kept frozen so settled outcomes stay readable.
    pub(crate) fn depart(&mut self) -> Vec<SessionAction> {
        let mut actions = Vec::new();

        let users: Vec<String> = self.peers.keys().cloned().collect();
        for user in users {
            if let Some(peer) = self.peers.get_mut(&user) {
                peer.presence.depart();
            }
            actions.extend(self.peer_change(user, Change::Left));
        }

        self.link = Link::Left;
        self.status_dirty = false;
        actions.push(Notification::Room { room: self.key, event: RoomEvent::Left }.into());
        actions
    }

    fn peer_change(&self, user: String, change: Change) -> Vec<SessionAction> {
        vec![
            Notification::Room {
                room: self.key,
                event: RoomEvent::Peer { user: user.clone(), change: change.clone() },
            }
            .into(),
            Notification::Room { room: self.key, event: RoomEvent::Changed }.into(),
            Notification::RoomPeer { room: self.key, user, change }.into(),
        ]
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use callsig_proto::PeerSnapshot;
    use serde_json::json;

    use super::*;
    use crate::error::AcceptanceError;

    fn joined() -> Room {
        let mut room = Room::new(RoomKey::new(0), RoomOrigin::Join { requested: None }, json!(null));
        room.begin_connect(0);
        room.connected(JoinAnswer {
            room: "r1".into(),
            status: json!({"topic": "standup"}),
            peers: BTreeMap::from([(
                "u1".to_string(),
                PeerSnapshot { status: json!("ready"), pending: false },
            )]),
        });
        room
    }

    #[test]
    fn key_displays_with_hash() {
        assert_eq!(RoomKey::new(7).to_string(), "#7");
        assert_eq!(RoomKey::new(7).get(), 7);
    }

    #[test]
    fn snapshot_peers_are_not_first() {
        let room = joined();

        assert_eq!(room.state(), RoomState::Connected);
        assert_eq!(room.id(), Some("r1"));
        assert!(!room.peer("u1").unwrap().first());
    }

    #[test]
    fn pushed_peers_are_first() {
        let mut room = joined();
        room.add_peer("u2".into(), json!(null), true, true);

        assert!(room.peer("u2").unwrap().first());
        assert!(room.peer("u2").unwrap().pending());
    }

    #[test]
    fn own_status_is_dirty_only_while_connecting() {
        let mut room = Room::new(RoomKey::new(1), RoomOrigin::Join { requested: None }, json!(null));
        assert!(!room.set_own_status(json!("early")));

        room.begin_connect(3);
        assert!(room.set_own_status(json!("late")));
        assert!(room.take_status_dirty());
        assert!(!room.take_status_dirty());
        assert_eq!(room.own_status(), &json!("late"));
    }

    #[test]
    fn peer_message_targets_peer_only() {
        let room = joined();
        let actions = room.peer_message("u1".into(), "offer".into(), json!({"sdp": "x"}));

        assert_eq!(actions, vec![SessionAction::Notify(Notification::RoomPeer {
            room: RoomKey::new(0),
            user: "u1".into(),
            change: Change::Message { event: "offer".into(), data: json!({"sdp": "x"}) },
        })]);
    }

    #[test]
    fn depart_rejects_pending_peers_and_ends_with_room_left() {
        let mut room = joined();
        room.add_peer("u2".into(), json!(null), true, true);

        let actions = room.depart();

        assert_eq!(room.state(), RoomState::Left);
        assert_eq!(room.peer("u1").unwrap().accepted().outcome(), Some(&Ok(())));
        assert_eq!(
            room.peer("u2").unwrap().accepted().outcome(),
            Some(&Err(AcceptanceError::Left))
        );
        assert_eq!(
            actions.last(),
            Some(&SessionAction::Notify(Notification::Room {
                room: RoomKey::new(0),
                event: RoomEvent::Left
            }))
        );

        let peer_left = actions
            .iter()
            .filter(|a| {
                matches!(a, SessionAction::Notify(Notification::RoomPeer { change: Change::Left, .. }))
            })
            .count();
        assert_eq!(peer_left, 2);
    }

    #[test]
    fn removed_pending_peer_keeps_left_outcome_until_rejoin() {
        let mut room = joined();
        room.add_peer("u2".into(), json!(null), true, true);

        room.remove_peer("u2".into());
        assert!(room.peer("u2").is_none());
        assert_eq!(
            room.departed("u2").and_then(Acceptance::outcome),
            Some(&Err(AcceptanceError::Left))
        );

        room.add_peer("u2".into(), json!(null), true, true);
        assert!(room.departed("u2").is_none());
        assert!(!room.peer("u2").unwrap().accepted().is_settled());
    }

    #[test]
    fn reopening_admitted_peer_warns() {
        let mut room = joined();

        let actions = room.update_peer("u1".into(), None, Some(true));

        assert!(matches!(
            actions.first(),
            Some(SessionAction::Warning(ProtocolWarning::PendingReopened { kind: "room_peer_update", .. }))
        ));
        assert!(!room.peer("u1").unwrap().pending());
    }

    #[test]
    fn removed_peer_is_gone_and_reported_once() {
        let mut room = joined();

        let actions = room.remove_peer("u1".into());
        let again = room.remove_peer("u1".into());

        assert!(room.peer("u1").is_none());
        assert_eq!(actions.len(), 3);
        assert!(matches!(
            again.as_slice(),
            [SessionAction::Warning(ProtocolWarning::UnknownEntity { kind: "room_peer_rm", .. })]
        ));
    }
}
