//! Namespace presence mirror.
//!
//! A [`Namespace`] holds the server-authoritative set of users and rooms of
//! one namespace id. It is created seeded from the `ns_subscribe` answer and
//! then converged by push events; the session only forwards events whose
//! `namespace` field matches this mirror's id.
//!
//! Every mutation goes through one insert/update/remove method, and removal
//! from a map is the entity's destruction. Each mutation emits the entity
//! event on the namespace, the aggregate `Changed`, and the same entity event
//! on the entity itself.

use std::collections::BTreeMap;

use callsig_proto::{NamespaceSnapshot, PeerSnapshot, TransactionId};
use serde_json::Value;

use crate::{
    event::{Change, NamespaceEntity, NamespaceEvent, Notification, ProtocolWarning, SessionAction},
    settlement::{Acceptance, PeerPresence},
};

/// User registered in a namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct NamespaceUser {
    id: String,
    status: Value,
}

impl NamespaceUser {
    /// User id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Application status.
    pub fn status(&self) -> &Value {
        &self.status
    }
}

/// Peer of a namespace room.
#[derive(Debug, Clone, PartialEq)]
pub struct NamespaceRoomPeer {
    id: String,
    presence: PeerPresence,
}

impl NamespaceRoomPeer {
    fn new(id: String, status: Value, pending: bool) -> Self {
        Self { id, presence: PeerPresence::new(status, pending) }
    }

    /// Peer user id.
    pub fn id(&self) -> &str {
        &self.id
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

/// Room visible in a namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct NamespaceRoom {
    id: String,
    status: Value,
    peers: BTreeMap<String, NamespaceRoomPeer>,
}

impl NamespaceRoom {
    /// Room id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Application status.
    pub fn status(&self) -> &Value {
        &self.status
    }

    /// Peers by user id.
    pub fn peers(&self) -> &BTreeMap<String, NamespaceRoomPeer> {
        &self.peers
    }

    /// Look up a peer.
    pub fn peer(&self, user: &str) -> Option<&NamespaceRoomPeer> {
        self.peers.get(user)
    }
}

/// Subscribed presence view of one namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct Namespace {
    id: String,
    users: BTreeMap<String, NamespaceUser>,
    rooms: BTreeMap<String, NamespaceRoom>,
    unsubscribing: Option<TransactionId>,
}

impl Namespace {
    fn new(id: String) -> Self {
        Self { id, users: BTreeMap::new(), rooms: BTreeMap::new(), unsubscribing: None }
    }

    /// Build a mirror from a subscribe answer.
    ///
    /// Snapshot entries go through the same add path as push events.
    pub(crate) fn seeded(id: String, snapshot: NamespaceSnapshot) -> (Self, Vec<SessionAction>) {
        let mut namespace = Self::new(id);
        let mut actions = Vec::new();

        for (user, status) in snapshot.users {
            actions.extend(namespace.add_user("ns_subscribe", user, status));
        }
        for (room, room_snapshot) in snapshot.rooms {
            actions.extend(namespace.add_room(
                "ns_subscribe",
                room,
                room_snapshot.status,
                room_snapshot.peers,
            ));
        }

        (namespace, actions)
    }

    /// Namespace id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Users by id.
    pub fn users(&self) -> &BTreeMap<String, NamespaceUser> {
        &self.users
    }

    /// Look up a user.
    pub fn user(&self, id: &str) -> Option<&NamespaceUser> {
        self.users.get(id)
    }

    /// Rooms by id.
    pub fn rooms(&self) -> &BTreeMap<String, NamespaceRoom> {
        &self.rooms
    }

    /// Look up a room.
    pub fn room(&self, id: &str) -> Option<&NamespaceRoom> {
        self.rooms.get(id)
    }

    pub(crate) fn unsubscribing(&self) -> Option<TransactionId> {
        self.unsubscribing
    }

    pub(crate) fn set_unsubscribing(&mut self, tid: Option<TransactionId>) {
        self.unsubscribing = tid;
    }

    pub(crate) fn add_user(
        &mut self,
        kind: &'static str,
        user: String,
        status: Value,
    ) -> Vec<SessionAction> {
        if self.users.contains_key(&user) {
            return vec![ProtocolWarning::DuplicateEntity { kind, entity: user }.into()];
        }

        self.users.insert(user.clone(), NamespaceUser { id: user.clone(), status });
        self.entity_change(NamespaceEntity::User(user), Change::Added)
    }

    pub(crate) fn update_user(&mut self, user: String, status: Value) -> Vec<SessionAction> {
        let Some(entry) = self.users.get_mut(&user) else {
            return vec![ProtocolWarning::UnknownEntity { kind: "ns_user_update", entity: user }.into()];
        };

        entry.status = status;
        self.entity_change(NamespaceEntity::User(user), Change::Updated)
    }

    pub(crate) fn remove_user(&mut self, user: String) -> Vec<SessionAction> {
        if self.users.remove(&user).is_none() {
            return vec![ProtocolWarning::UnknownEntity { kind: "ns_user_rm", entity: user }.into()];
        }

        self.entity_change(NamespaceEntity::User(user), Change::Left)
    }

    pub(crate) fn add_room(
        &mut self,
        kind: &'static str,
        room: String,
        status: Value,
        peers: BTreeMap<String, PeerSnapshot>,
    ) -> Vec<SessionAction> {
        if self.rooms.contains_key(&room) {
            return vec![ProtocolWarning::DuplicateEntity { kind, entity: room }.into()];
        }

        let peers = peers
            .into_iter()
            .map(|(user, peer)| {
                (user.clone(), NamespaceRoomPeer::new(user, peer.status, peer.pending))
            })
            .collect();

        self.rooms.insert(room.clone(), NamespaceRoom { id: room.clone(), status, peers });
        self.entity_change(NamespaceEntity::Room(room), Change::Added)
    }

    pub(crate) fn update_room(&mut self, room: String, status: Value) -> Vec<SessionAction> {
        let Some(entry) = self.rooms.get_mut(&room) else {
            return vec![ProtocolWarning::UnknownEntity { kind: "ns_room_update", entity: room }.into()];
        };

        entry.status = status;
        self.entity_change(NamespaceEntity::Room(room), Change::Updated)
    }

    pub(crate) fn remove_room(&mut self, room: String) -> Vec<SessionAction> {
        let Some(entry) = self.rooms.remove(&room) else {
            return vec![ProtocolWarning::UnknownEntity { kind: "ns_room_rm", entity: room }.into()];
        };

        let mut actions = self.depart_peers(entry);
        actions.extend(self.entity_change(NamespaceEntity::Room(room), Change::Left));
        actions
    }

    pub(crate) fn add_peer(
        &mut self,
        room: String,
        user: String,
        status: Value,
        pending: bool,
    ) -> Vec<SessionAction> {
        let Some(entry) = self.rooms.get_mut(&room) else {
            return vec![ProtocolWarning::UnknownEntity { kind: "ns_room_peer_add", entity: room }.into()];
        };
        if entry.peers.contains_key(&user) {
            return vec![ProtocolWarning::DuplicateEntity { kind: "ns_room_peer_add", entity: user }.into()];
        }

        entry.peers.insert(user.clone(), NamespaceRoomPeer::new(user.clone(), status, pending));
        self.entity_change(NamespaceEntity::Peer { room, user }, Change::Added)
    }

    pub(crate) fn update_peer(
        &mut self,
        room: String,
        user: String,
        status: Option<Value>,
        pending: Option<bool>,
    ) -> Vec<SessionAction> {
        let Some(peer) = self.rooms.get_mut(&room).and_then(|r| r.peers.get_mut(&user)) else {
            return vec![ProtocolWarning::UnknownEntity {
                kind: "ns_room_peer_update",
                entity: format!("{room}/{user}"),
            }
            .into()];
        };

        let change = peer.presence.update(status, pending);

        let mut actions = Vec::new();
        if change.reopen_ignored {
            actions.push(
                ProtocolWarning::PendingReopened {
                    kind: "ns_room_peer_update",
                    entity: format!("{room}/{user}"),
                }
                .into(),
            );
        }
        let entity = NamespaceEntity::Peer { room, user };
        actions.extend(self.entity_change(entity.clone(), Change::Updated));
        if change.accepted {
            actions.extend(self.entity_change(entity, Change::Accepted));
        }
        actions
    }

    pub(crate) fn remove_peer(&mut self, room: String, user: String) -> Vec<SessionAction> {
        let Some(mut peer) = self.rooms.get_mut(&room).and_then(|r| r.peers.remove(&user)) else {
            return vec![ProtocolWarning::UnknownEntity {
                kind: "ns_room_peer_rm",
                entity: format!("{room}/{user}"),
            }
            .into()];
        };

        peer.presence.depart();
        self.entity_change(NamespaceEntity::Peer { room, user }, Change::Left)
    }

    /// Force every tracked entity into its terminal state and clear the
    /// mirror. Consumes the namespace: nothing is tracked afterwards.
    pub(crate) fn tear_down(mut self) -> Vec<SessionAction> {
        let mut actions = Vec::new();

        for user in std::mem::take(&mut self.users).into_keys() {
            actions.extend(self.entity_change(NamespaceEntity::User(user), Change::Left));
        }

        for (room, entry) in std::mem::take(&mut self.rooms) {
            actions.extend(self.depart_peers(entry));
            actions.extend(self.entity_change(NamespaceEntity::Room(room), Change::Left));
        }

        actions.push(
            Notification::Namespace { namespace: self.id, event: NamespaceEvent::Unsubscribed }
                .into(),
        );
        actions
    }

    fn depart_peers(&self, mut room: NamespaceRoom) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        for (user, mut peer) in std::mem::take(&mut room.peers) {
            peer.presence.depart();
            actions.extend(
                self.entity_change(NamespaceEntity::Peer { room: room.id.clone(), user }, Change::Left),
            );
        }
        actions
    }

    fn entity_change(&self, entity: NamespaceEntity, change: Change) -> Vec<SessionAction> {
        vec![
            Notification::Namespace {
                namespace: self.id.clone(),
                event: NamespaceEvent::Entity { entity: entity.clone(), change: change.clone() },
            }
            .into(),
            Notification::Namespace { namespace: self.id.clone(), event: NamespaceEvent::Changed }
                .into(),
            Notification::NamespaceEntity { namespace: self.id.clone(), entity, change }.into(),
        ]
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use callsig_proto::RoomSnapshot;
    use serde_json::json;

    use super::*;
    use crate::error::AcceptanceError;

    fn empty(id: &str) -> Namespace {
        Namespace::seeded(id.to_string(), NamespaceSnapshot::default()).0
    }

    fn notifications(actions: &[SessionAction]) -> Vec<&Notification> {
        actions
            .iter()
            .filter_map(|a| match a {
                SessionAction::Notify(n) => Some(n),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn seeding_uses_add_path() {
        let snapshot = NamespaceSnapshot {
            users: BTreeMap::from([("u1".to_string(), json!("online"))]),
            rooms: BTreeMap::from([(
                "r1".to_string(),
                RoomSnapshot {
                    status: json!({"topic": "standup"}),
                    peers: BTreeMap::from([(
                        "u1".to_string(),
                        PeerSnapshot { status: json!(null), pending: true },
                    )]),
                },
            )]),
        };

        let (namespace, actions) = Namespace::seeded("ns1".into(), snapshot);

        assert_eq!(namespace.user("u1").unwrap().status(), &json!("online"));
        assert!(namespace.room("r1").unwrap().peer("u1").unwrap().pending());
        // user added + room added, three notifications each
        assert_eq!(notifications(&actions).len(), 6);
    }

    #[test]
    fn user_update_emits_dual_notification() {
        let mut namespace = empty("ns1");
        namespace.add_user("ns_user_add", "u1".into(), json!("online"));

        let actions = namespace.update_user("u1".into(), json!("away"));

        assert_eq!(notifications(&actions), vec![
            &Notification::Namespace {
                namespace: "ns1".into(),
                event: NamespaceEvent::Entity {
                    entity: NamespaceEntity::User("u1".into()),
                    change: Change::Updated,
                },
            },
            &Notification::Namespace { namespace: "ns1".into(), event: NamespaceEvent::Changed },
            &Notification::NamespaceEntity {
                namespace: "ns1".into(),
                entity: NamespaceEntity::User("u1".into()),
                change: Change::Updated,
            },
        ]);
        assert_eq!(namespace.user("u1").unwrap().status(), &json!("away"));
    }

    #[test]
    fn unknown_user_update_is_a_warning() {
        let mut namespace = empty("ns1");
        let actions = namespace.update_user("ghost".into(), json!(1));

        assert!(matches!(
            actions.as_slice(),
            [SessionAction::Warning(ProtocolWarning::UnknownEntity { kind: "ns_user_update", .. })]
        ));
        assert!(namespace.users().is_empty());
    }

    #[test]
    fn duplicate_user_add_is_dropped() {
        let mut namespace = empty("ns1");
        namespace.add_user("ns_user_add", "u1".into(), json!("online"));

        let actions = namespace.add_user("ns_user_add", "u1".into(), json!("other"));

        assert!(matches!(
            actions.as_slice(),
            [SessionAction::Warning(ProtocolWarning::DuplicateEntity { .. })]
        ));
        assert_eq!(namespace.user("u1").unwrap().status(), &json!("online"));
    }

    #[test]
    fn peer_admission_settles_acceptance() {
        let mut namespace = empty("ns1");
        namespace.add_room("ns_room_add", "r1".into(), json!(null), BTreeMap::new());
        namespace.add_peer("r1".into(), "u2".into(), json!(null), true);

        let actions = namespace.update_peer("r1".into(), "u2".into(), None, Some(false));

        let peer = namespace.room("r1").unwrap().peer("u2").unwrap();
        assert_eq!(peer.accepted().outcome(), Some(&Ok(())));
        assert!(notifications(&actions).contains(&&Notification::NamespaceEntity {
            namespace: "ns1".into(),
            entity: NamespaceEntity::Peer { room: "r1".into(), user: "u2".into() },
            change: Change::Accepted,
        }));
    }

    #[test]
    fn reopening_admitted_peer_warns() {
        let mut namespace = empty("ns1");
        namespace.add_room("ns_room_add", "r1".into(), json!(null), BTreeMap::new());
        namespace.add_peer("r1".into(), "u2".into(), json!(null), false);

        let actions = namespace.update_peer("r1".into(), "u2".into(), None, Some(true));

        assert_eq!(
            actions.first(),
            Some(&SessionAction::Warning(ProtocolWarning::PendingReopened {
                kind: "ns_room_peer_update",
                entity: "r1/u2".into(),
            }))
        );
        assert!(!namespace.room("r1").unwrap().peer("u2").unwrap().pending());
    }

    #[test]
    fn removing_peer_reports_left_once() {
        let mut namespace = empty("ns1");
        namespace.add_room("ns_room_add", "r1".into(), json!(null), BTreeMap::new());
        namespace.add_peer("r1".into(), "u2".into(), json!(null), true);

        let actions = namespace.remove_peer("r1".into(), "u2".into());
        let again = namespace.remove_peer("r1".into(), "u2".into());

        assert!(namespace.room("r1").unwrap().peer("u2").is_none());
        assert_eq!(notifications(&actions).len(), 3);
        assert!(matches!(
            again.as_slice(),
            [SessionAction::Warning(ProtocolWarning::UnknownEntity { .. })]
        ));
    }

    #[test]
    fn departing_peer_outcome_is_left() {
        let mut presence = PeerPresence::new(json!(null), true);
        presence.depart();
        assert_eq!(presence.accepted().outcome(), Some(&Err(AcceptanceError::Left)));
    }

    #[test]
    fn tear_down_reports_every_user_left() {
        let mut namespace = empty("ns1");
        namespace.add_user("ns_user_add", "u1".into(), json!(1));
        namespace.add_user("ns_user_add", "u2".into(), json!(2));

        let actions = namespace.tear_down();
        let left: Vec<_> = notifications(&actions)
            .into_iter()
            .filter(|n| {
                matches!(n, Notification::NamespaceEntity { change: Change::Left, .. })
            })
            .collect();

        assert_eq!(left.len(), 2);
        assert_eq!(
            notifications(&actions).last(),
            Some(&&Notification::Namespace {
                namespace: "ns1".into(),
                event: NamespaceEvent::Unsubscribed
            })
        );
    }
}
