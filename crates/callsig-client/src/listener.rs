//! Typed notification listeners.
//!
//! Listeners subscribe to a [`Scope`] and receive matching
//! [`Notification`]s on an unbounded tokio channel. Container scopes see the
//! container-level copy of an entity change and entity scopes see the
//! entity-level copy, so a consumer picks its level without double delivery.

use std::collections::BTreeMap;

use callsig_core::{NamespaceEntity, Notification, RoomKey};
use tokio::sync::mpsc;

/// Identifies a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Which notifications a listener receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Everything
    All,
    /// Session-level events: invitation arrival
    Session,
    /// Container events of one namespace
    Namespace(String),
    /// One namespace user
    NamespaceUser {
        /// Namespace id
        namespace: String,
        /// User id
        user: String,
    },
    /// One namespace room
    NamespaceRoom {
        /// Namespace id
        namespace: String,
        /// Room id
        room: String,
    },
    /// One peer of a namespace room
    NamespaceRoomPeer {
        /// Namespace id
        namespace: String,
        /// Room id
        room: String,
        /// Peer user id
        user: String,
    },
    /// Container events of one joined room
    Room(RoomKey),
    /// One peer of a joined room
    RoomPeer {
        /// Local room key
        room: RoomKey,
        /// Peer user id
        user: String,
    },
    /// One invitation, either direction
    Invitation(String),
}

impl Scope {
    /// Whether `notification` falls inside this scope.
    pub fn matches(&self, notification: &Notification) -> bool {
        match (self, notification) {
            (Self::All, _) => true,
            (Self::Session, Notification::Invitation { .. }) => true,
            (Self::Namespace(id), Notification::Namespace { namespace, .. }) => id == namespace,
            (
                Self::NamespaceUser { namespace: ns, user: u },
                Notification::NamespaceEntity { namespace, entity: NamespaceEntity::User(user), .. },
            ) => ns == namespace && u == user,
            (
                Self::NamespaceRoom { namespace: ns, room: r },
                Notification::NamespaceEntity { namespace, entity: NamespaceEntity::Room(room), .. },
            ) => ns == namespace && r == room,
            (
                Self::NamespaceRoomPeer { namespace: ns, room: r, user: u },
                Notification::NamespaceEntity {
                    namespace,
                    entity: NamespaceEntity::Peer { room, user },
                    ..
                },
            ) => ns == namespace && r == room && u == user,
            (Self::Room(key), Notification::Room { room, .. }) => key == room,
            (Self::RoomPeer { room: key, user: u }, Notification::RoomPeer { room, user, .. }) => {
                key == room && u == user
            },
            (
                Self::Invitation(h),
                Notification::IncomingInvitation { handle, .. }
                | Notification::OutgoingInvitation { handle, .. },
            ) => h == handle,
            _ => false,
        }
    }
}

/// Registry of live listeners.
#[derive(Debug, Default)]
pub(crate) struct Listeners {
    next_id: u64,
    entries: BTreeMap<ListenerId, (Scope, mpsc::UnboundedSender<Notification>)>,
}

impl Listeners {
    pub(crate) fn add(&mut self, scope: Scope) -> (ListenerId, mpsc::UnboundedReceiver<Notification>) {
        let id = ListenerId(self.next_id);
        self.next_id += 1;

        let (tx, rx) = mpsc::unbounded_channel();
        self.entries.insert(id, (scope, tx));
        (id, rx)
    }

    pub(crate) fn remove(&mut self, id: ListenerId) -> bool {
        self.entries.remove(&id).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Deliver to every matching listener. Listeners whose receiver was
    /// dropped are removed.
    pub(crate) fn dispatch(&mut self, notification: &Notification) {
        self.entries.retain(|id, (scope, tx)| {
            if !scope.matches(notification) {
                return true;
            }
            let delivered = tx.send(notification.clone()).is_ok();
            if !delivered {
                tracing::debug!(?id, "dropping listener with closed receiver");
            }
            delivered
        });
    }
}
