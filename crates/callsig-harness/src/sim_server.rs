//! In-memory signaling server for simulation.
//!
//! `SimServer` is the authoritative side of the protocol. It owns namespace
//! registrations, rooms and invitations, answers every request, and pushes
//! presence changes to the sessions observing them. Each connected user gets
//! an unbounded queue of encoded messages; requests are handled synchronously
//! when a channel sends them, so every answer and push is queued before
//! `send` returns.
//!
//! A room created with `room_join` is published in every namespace its
//! creator was registered in at creation time.

use std::collections::{BTreeMap, BTreeSet};

use callsig_proto::{
    InviteAnswer, JoinAnswer, NamespaceSnapshot, PeerSnapshot, Request, RoomSnapshot,
    ServerMessage,
};
use serde::Serialize;
use serde_json::{Map, Value, json};
use thiserror::Error;
use tokio::sync::mpsc;

const NOT_FOUND: &str = "not_found";
const NOT_MEMBER: &str = "not_member";
const NOT_SUBSCRIBED: &str = "not_subscribed";
const ALREADY_JOINED: &str = "already_joined";
const ALREADY_REGISTERED: &str = "already_registered";
const CONFLICT: &str = "conflict";

/// How joiners are admitted into rooms that already have peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Admission {
    /// Joiners are admitted immediately.
    #[default]
    Open,
    /// Joiners stay pending until [`SimServer::admit`].
    Manual,
}

/// Simulated server configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimConfig {
    /// Admission policy
    pub admission: Admission,
}

/// Errors from the simulated server and its channels.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SimError {
    /// Another channel already connected under this user id
    #[error("user {0} is already connected")]
    NameTaken(String),
    /// Channel used before `connect` or after disconnection
    #[error("user {0} is not connected")]
    NotConnected(String),
    /// Room id unknown to the server
    #[error("room {0} does not exist")]
    UnknownRoom(String),
    /// User is not a peer of the room
    #[error("user {user} is not in room {room}")]
    UnknownPeer {
        /// Room id
        room: String,
        /// User id
        user: String,
    },
    /// A thread panicked while holding the shared server
    #[error("simulated server lock poisoned")]
    Poisoned,
}

type Reply = Result<Value, &'static str>;

#[derive(Debug)]
struct SimClient {
    tx: mpsc::UnboundedSender<String>,
    status: Value,
    registered: BTreeSet<String>,
    subscribed: BTreeSet<String>,
    rooms: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct SimNamespace {
    users: BTreeSet<String>,
    subscribers: BTreeSet<String>,
    rooms: BTreeSet<String>,
}

#[derive(Debug)]
struct SimPeer {
    status: Value,
    pending: bool,
}

#[derive(Debug)]
struct SimRoom {
    status: Map<String, Value>,
    peers: BTreeMap<String, SimPeer>,
    namespaces: BTreeSet<String>,
}

impl SimRoom {
    fn status_value(&self) -> Value {
        Value::Object(self.status.clone())
    }

    fn peer_snapshots(&self) -> BTreeMap<String, PeerSnapshot> {
        self.peers
            .iter()
            .map(|(id, peer)| {
                (id.clone(), PeerSnapshot { status: peer.status.clone(), pending: peer.pending })
            })
            .collect()
    }
}

#[derive(Debug)]
struct SimInvitation {
    room: String,
    from: String,
    to: String,
}

/// Authoritative in-memory signaling server.
#[derive(Debug, Default)]
pub struct SimServer {
    config: SimConfig,
    clients: BTreeMap<String, SimClient>,
    namespaces: BTreeMap<String, SimNamespace>,
    rooms: BTreeMap<String, SimRoom>,
    invitations: BTreeMap<String, SimInvitation>,
    next_room: u64,
    next_handle: u64,
    queued: Vec<(String, ServerMessage)>,
}

impl SimServer {
    /// Create a server with no users, rooms or namespaces.
    pub fn new(config: SimConfig) -> Self {
        Self { config, ..Self::default() }
    }

    /// Active configuration.
    pub fn config(&self) -> SimConfig {
        self.config
    }

    /// Connect a user and greet it with `hello`. Returns the queue of
    /// messages addressed to it.
    ///
    /// # Errors
    ///
    /// - `SimError::NameTaken` if the user is already connected
    pub fn connect(&mut self, user: &str) -> Result<mpsc::UnboundedReceiver<String>, SimError> {
        if self.clients.contains_key(user) {
            return Err(SimError::NameTaken(user.to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.clients.insert(
            user.to_string(),
            SimClient {
                tx,
                status: Value::Null,
                registered: BTreeSet::new(),
                subscribed: BTreeSet::new(),
                rooms: BTreeSet::new(),
            },
        );

        let server = json!({"name": "callsig-sim", "version": env!("CARGO_PKG_VERSION")});
        self.push(user, ServerMessage::Hello { id: user.to_string(), server });
        self.flush();

        tracing::debug!(user, "client connected");
        Ok(rx)
    }

    /// Drop a user: it leaves its rooms, unregisters everywhere, and its
    /// open invitations are cancelled or denied. Its queue is closed.
    pub fn disconnect(&mut self, user: &str) {
        let Some(client) = self.clients.get(user) else {
            return;
        };
        let rooms: Vec<String> = client.rooms.iter().cloned().collect();
        let registered: Vec<String> = client.registered.iter().cloned().collect();

        for room in rooms {
            self.leave_room(&room, user);
        }
        for namespace in registered {
            self.unregister_user(&namespace, user);
        }
        for namespace in self.namespaces.values_mut() {
            namespace.subscribers.remove(user);
        }

        let handles: Vec<String> = self
            .invitations
            .iter()
            .filter(|(_, invitation)| invitation.from == user || invitation.to == user)
            .map(|(handle, _)| handle.clone())
            .collect();
        for handle in handles {
            if let Some(invitation) = self.invitations.remove(&handle) {
                if invitation.from == user {
                    self.push(&invitation.to, ServerMessage::InviteCancelled { handle });
                } else {
                    self.push(&invitation.from, ServerMessage::InviteResponse {
                        handle,
                        accepted: false,
                    });
                }
            }
        }

        self.clients.remove(user);
        self.flush();
        tracing::debug!(user, "client disconnected");
    }

    /// Whether a user is connected.
    pub fn is_connected(&self, user: &str) -> bool {
        self.clients.contains_key(user)
    }

    /// Ids of all open rooms.
    pub fn room_ids(&self) -> impl Iterator<Item = &str> {
        self.rooms.keys().map(String::as_str)
    }

    /// Peers of a room still awaiting admission.
    pub fn pending_peers(&self, room: &str) -> Vec<String> {
        self.rooms
            .get(room)
            .map(|room| {
                room.peers.iter().filter(|(_, peer)| peer.pending).map(|(id, _)| id.clone()).collect()
            })
            .unwrap_or_default()
    }

    /// Admit a pending peer. Returns `false` if it was already admitted.
    ///
    /// # Errors
    ///
    /// - `SimError::UnknownRoom` or `SimError::UnknownPeer` for unknown ids
    pub fn admit(&mut self, room: &str, user: &str) -> Result<bool, SimError> {
        let peer = self
            .rooms
            .get_mut(room)
            .ok_or_else(|| SimError::UnknownRoom(room.to_string()))?
            .peers
            .get_mut(user)
            .ok_or_else(|| SimError::UnknownPeer { room: room.to_string(), user: user.to_string() })?;
        if !peer.pending {
            return Ok(false);
        }
        peer.pending = false;

        self.to_room(room, Some(user), &ServerMessage::RoomPeerUpdate {
            room: room.to_string(),
            user: user.to_string(),
            status: None,
            pending: Some(false),
        });
        self.to_room_namespaces(room, |namespace| ServerMessage::NsRoomPeerUpdate {
            namespace,
            room: room.to_string(),
            user: user.to_string(),
            status: None,
            pending: Some(false),
        });
        self.flush();

        tracing::debug!(room, user, "peer admitted");
        Ok(true)
    }

    /// Handle one encoded request from `user`. The answer is queued first,
    /// followed by every push the request caused.
    ///
    /// Undecodable requests are logged and dropped without an answer.
    ///
    /// # Errors
    ///
    /// - `SimError::NotConnected` if the user is not connected
    pub fn handle(&mut self, user: &str, text: &str) -> Result<(), SimError> {
        if !self.clients.contains_key(user) {
            return Err(SimError::NotConnected(user.to_string()));
        }

        let (tid, request) = match Request::decode(text) {
            Ok(decoded) => decoded,
            Err(err) => {
                tracing::warn!(user, %err, "dropping malformed request");
                return Ok(());
            },
        };
        tracing::debug!(user, tid, kind = request.kind(), "request");

        let answer = match self.dispatch(user, request) {
            Ok(data) => ServerMessage::Answer { tid: Some(tid), data: Some(data), error: None },
            Err(error) => {
                tracing::debug!(user, tid, error, "request rejected");
                self.queued.clear();
                ServerMessage::Answer { tid: Some(tid), data: None, error: Some(error.to_string()) }
            },
        };

        self.deliver(user, &answer);
        self.flush();
        Ok(())
    }

    fn dispatch(&mut self, user: &str, request: Request) -> Reply {
        match request {
            Request::NsSubscribe { namespace } => self.subscribe(user, namespace),
            Request::NsUnsubscribe { namespace } => self.unsubscribe(user, &namespace),
            Request::NsUserRegister { namespace } => self.register(user, namespace),
            Request::NsUserUnregister { namespace } => {
                if self.unregister_user(&namespace, user) { Ok(Value::Null) } else { Err(NOT_FOUND) }
            },
            Request::UserStatus { status } => self.set_user_status(user, status),
            Request::RoomJoin { room, status } => self.join(user, room, status),
            Request::RoomLeave { room } => {
                if self.leave_room(&room, user) { Ok(Value::Null) } else { Err(NOT_FOUND) }
            },
            Request::RoomPeerStatus { room, status } => self.set_peer_status(user, &room, status),
            Request::RoomStatus { room, key, value, check, previous } => {
                let expected = check.then(|| previous.unwrap_or(Value::Null));
                self.set_room_status(user, &room, key, value, expected)
            },
            Request::InviteSend { room, user: invitee, data } => {
                self.invite(user, room, invitee, data)
            },
            Request::InviteCancel { handle } => self.cancel_invitation(user, handle),
            Request::InviteAccept { handle, status } => self.accept(user, &handle, status),
            Request::InviteDeny { handle } => self.deny(user, handle),
            Request::RoomPeerTo { room, user: target, event, data } => {
                self.relay(user, room, &target, event, data)
            },
        }
    }

    // Namespaces

    fn subscribe(&mut self, user: &str, namespace: String) -> Reply {
        let snapshot = self.namespace_snapshot(&namespace);

        self.namespaces.entry(namespace.clone()).or_default().subscribers.insert(user.to_string());
        if let Some(client) = self.clients.get_mut(user) {
            client.subscribed.insert(namespace);
        }
        encode(&snapshot)
    }

    fn unsubscribe(&mut self, user: &str, namespace: &str) -> Reply {
        let removed = self
            .namespaces
            .get_mut(namespace)
            .is_some_and(|entry| entry.subscribers.remove(user));
        if !removed {
            return Err(NOT_SUBSCRIBED);
        }

        if let Some(client) = self.clients.get_mut(user) {
            client.subscribed.remove(namespace);
        }
        Ok(Value::Null)
    }

    fn register(&mut self, user: &str, namespace: String) -> Reply {
        if !self.namespaces.entry(namespace.clone()).or_default().users.insert(user.to_string()) {
            return Err(ALREADY_REGISTERED);
        }
        if let Some(client) = self.clients.get_mut(user) {
            client.registered.insert(namespace.clone());
        }

        let status = self.user_status(user);
        self.to_subscribers(&namespace, &ServerMessage::NsUserAdd {
            namespace: namespace.clone(),
            user: user.to_string(),
            status,
        });
        Ok(Value::Null)
    }

    fn unregister_user(&mut self, namespace: &str, user: &str) -> bool {
        let removed =
            self.namespaces.get_mut(namespace).is_some_and(|entry| entry.users.remove(user));
        if !removed {
            return false;
        }

        if let Some(client) = self.clients.get_mut(user) {
            client.registered.remove(namespace);
        }
        self.to_subscribers(namespace, &ServerMessage::NsUserRm {
            namespace: namespace.to_string(),
            user: user.to_string(),
        });
        true
    }

    fn set_user_status(&mut self, user: &str, status: Value) -> Reply {
        let Some(client) = self.clients.get_mut(user) else {
            return Err(NOT_FOUND);
        };
        client.status = status.clone();
        let registered: Vec<String> = client.registered.iter().cloned().collect();

        for namespace in registered {
            self.to_subscribers(&namespace, &ServerMessage::NsUserUpdate {
                namespace: namespace.clone(),
                user: user.to_string(),
                status: status.clone(),
            });
        }
        Ok(Value::Null)
    }

    fn namespace_snapshot(&self, namespace: &str) -> NamespaceSnapshot {
        let Some(entry) = self.namespaces.get(namespace) else {
            return NamespaceSnapshot::default();
        };

        let users = entry.users.iter().map(|user| (user.clone(), self.user_status(user))).collect();
        let rooms = entry
            .rooms
            .iter()
            .filter_map(|id| {
                let room = self.rooms.get(id)?;
                Some((id.clone(), RoomSnapshot {
                    status: room.status_value(),
                    peers: room.peer_snapshots(),
                }))
            })
            .collect();
        NamespaceSnapshot { users, rooms }
    }

    fn user_status(&self, user: &str) -> Value {
        self.clients.get(user).map(|client| client.status.clone()).unwrap_or_default()
    }

    // Rooms

    fn join(&mut self, user: &str, requested: Option<String>, status: Value) -> Reply {
        match requested {
            Some(room) => self.enter(user, &room, status, false),
            None => {
                self.next_room += 1;
                let room = format!("r{}", self.next_room);
                let namespaces =
                    self.clients.get(user).map(|client| client.registered.clone()).unwrap_or_default();

                for namespace in &namespaces {
                    self.namespaces.entry(namespace.clone()).or_default().rooms.insert(room.clone());
                }
                self.rooms.insert(room.clone(), SimRoom {
                    status: Map::new(),
                    peers: BTreeMap::new(),
                    namespaces,
                });
                tracing::debug!(user, %room, "room created");

                self.enter(user, &room, status, true)
            },
        }
    }

    fn enter(&mut self, user: &str, room_id: &str, status: Value, created: bool) -> Reply {
        let manual = self.config.admission == Admission::Manual;
        let room = self.rooms.get_mut(room_id).ok_or(NOT_FOUND)?;
        if room.peers.contains_key(user) {
            return Err(ALREADY_JOINED);
        }

        let pending = manual && !room.peers.is_empty();
        let answer = JoinAnswer {
            room: room_id.to_string(),
            status: room.status_value(),
            peers: room.peer_snapshots(),
        };
        room.peers.insert(user.to_string(), SimPeer { status: status.clone(), pending });
        let room_status = room.status_value();
        let peers = room.peer_snapshots();

        if let Some(client) = self.clients.get_mut(user) {
            client.rooms.insert(room_id.to_string());
        }

        if created {
            self.to_room_namespaces(room_id, |namespace| ServerMessage::NsRoomAdd {
                namespace,
                room: room_id.to_string(),
                status: room_status.clone(),
                peers: peers.clone(),
            });
        } else {
            self.to_room(room_id, Some(user), &ServerMessage::RoomPeerAdd {
                room: room_id.to_string(),
                user: user.to_string(),
                status: status.clone(),
                pending,
            });
            self.to_room_namespaces(room_id, |namespace| ServerMessage::NsRoomPeerAdd {
                namespace,
                room: room_id.to_string(),
                user: user.to_string(),
                status: status.clone(),
                pending,
            });
        }
        encode(&answer)
    }

    fn leave_room(&mut self, room_id: &str, user: &str) -> bool {
        let Some(room) = self.rooms.get_mut(room_id) else {
            return false;
        };
        if room.peers.remove(user).is_none() {
            return false;
        }
        let empty = room.peers.is_empty();

        if let Some(client) = self.clients.get_mut(user) {
            client.rooms.remove(room_id);
        }
        self.to_room(room_id, None, &ServerMessage::RoomPeerRm {
            room: room_id.to_string(),
            user: user.to_string(),
        });

        if !empty {
            self.to_room_namespaces(room_id, |namespace| ServerMessage::NsRoomPeerRm {
                namespace,
                room: room_id.to_string(),
                user: user.to_string(),
            });
            return true;
        }

        self.to_room_namespaces(room_id, |namespace| ServerMessage::NsRoomRm {
            namespace,
            room: room_id.to_string(),
        });
        if let Some(room) = self.rooms.remove(room_id) {
            for namespace in room.namespaces {
                if let Some(entry) = self.namespaces.get_mut(&namespace) {
                    entry.rooms.remove(room_id);
                }
            }
        }

        let orphaned: Vec<String> = self
            .invitations
            .iter()
            .filter(|(_, invitation)| invitation.room == room_id)
            .map(|(handle, _)| handle.clone())
            .collect();
        for handle in orphaned {
            if let Some(invitation) = self.invitations.remove(&handle) {
                self.push(&invitation.to, ServerMessage::InviteCancelled { handle });
            }
        }

        tracing::debug!(room = room_id, "room closed");
        true
    }

    fn member_room(&mut self, user: &str, room: &str) -> Result<&mut SimRoom, &'static str> {
        let room = self.rooms.get_mut(room).ok_or(NOT_FOUND)?;
        if room.peers.contains_key(user) { Ok(room) } else { Err(NOT_MEMBER) }
    }

    fn set_peer_status(&mut self, user: &str, room_id: &str, status: Value) -> Reply {
        let room = self.member_room(user, room_id)?;
        if let Some(peer) = room.peers.get_mut(user) {
            peer.status = status.clone();
        }

        self.to_room(room_id, Some(user), &ServerMessage::RoomPeerUpdate {
            room: room_id.to_string(),
            user: user.to_string(),
            status: Some(status.clone()),
            pending: None,
        });
        self.to_room_namespaces(room_id, |namespace| ServerMessage::NsRoomPeerUpdate {
            namespace,
            room: room_id.to_string(),
            user: user.to_string(),
            status: Some(status.clone()),
            pending: None,
        });
        Ok(Value::Null)
    }

    fn set_room_status(
        &mut self,
        user: &str,
        room_id: &str,
        key: String,
        value: Value,
        expected: Option<Value>,
    ) -> Reply {
        let room = self.member_room(user, room_id)?;
        if let Some(expected) = expected {
            let current = room.status.get(&key).cloned().unwrap_or_default();
            if current != expected {
                return Err(CONFLICT);
            }
        }
        room.status.insert(key, value);
        let status = room.status_value();

        self.to_room(room_id, None, &ServerMessage::RoomUpdate {
            room: room_id.to_string(),
            status: status.clone(),
        });
        self.to_room_namespaces(room_id, |namespace| ServerMessage::NsRoomUpdate {
            namespace,
            room: room_id.to_string(),
            status: status.clone(),
        });
        Ok(status)
    }

    fn relay(&mut self, user: &str, room_id: String, target: &str, event: String, data: Value) -> Reply {
        let room = self.member_room(user, &room_id)?;
        if !room.peers.contains_key(target) {
            return Err(NOT_FOUND);
        }

        self.push(target, ServerMessage::RoomPeerFrom {
            room: room_id,
            user: user.to_string(),
            event,
            data,
        });
        Ok(Value::Null)
    }

    // Invitations

    fn invite(&mut self, user: &str, room: String, invitee: String, data: Value) -> Reply {
        self.member_room(user, &room)?;
        if !self.clients.contains_key(&invitee) {
            return Err(NOT_FOUND);
        }

        self.next_handle += 1;
        let handle = format!("h{}", self.next_handle);
        self.invitations.insert(handle.clone(), SimInvitation {
            room,
            from: user.to_string(),
            to: invitee.clone(),
        });

        let status = self.user_status(user);
        self.push(&invitee, ServerMessage::InviteIncoming {
            handle: handle.clone(),
            user: user.to_string(),
            status,
            data,
        });
        encode(&InviteAnswer { handle })
    }

    fn take_invitation(
        &mut self,
        handle: &str,
        owner: impl Fn(&SimInvitation) -> &str,
        user: &str,
    ) -> Result<SimInvitation, &'static str> {
        match self.invitations.get(handle) {
            Some(invitation) if owner(invitation) == user => {
                self.invitations.remove(handle).ok_or(NOT_FOUND)
            },
            _ => Err(NOT_FOUND),
        }
    }

    fn cancel_invitation(&mut self, user: &str, handle: String) -> Reply {
        let invitation = self.take_invitation(&handle, |i| i.from.as_str(), user)?;
        self.push(&invitation.to, ServerMessage::InviteCancelled { handle });
        Ok(Value::Null)
    }

    fn accept(&mut self, user: &str, handle: &str, status: Value) -> Reply {
        let invitation = self.take_invitation(handle, |i| i.to.as_str(), user)?;
        match self.enter(user, &invitation.room, status, false) {
            Ok(answer) => {
                self.push(&invitation.from, ServerMessage::InviteResponse {
                    handle: handle.to_string(),
                    accepted: true,
                });
                Ok(answer)
            },
            Err(error) => {
                // a failed accept leaves the invitation open for deny
                self.invitations.insert(handle.to_string(), invitation);
                Err(error)
            },
        }
    }

    fn deny(&mut self, user: &str, handle: String) -> Reply {
        let invitation = self.take_invitation(&handle, |i| i.to.as_str(), user)?;
        self.push(&invitation.from, ServerMessage::InviteResponse { handle, accepted: false });
        Ok(Value::Null)
    }

    // Delivery

    fn push(&mut self, user: &str, message: ServerMessage) {
        self.queued.push((user.to_string(), message));
    }

    fn to_subscribers(&mut self, namespace: &str, message: &ServerMessage) {
        let subscribers: Vec<String> = self
            .namespaces
            .get(namespace)
            .map(|entry| entry.subscribers.iter().cloned().collect())
            .unwrap_or_default();
        for subscriber in subscribers {
            self.push(&subscriber, message.clone());
        }
    }

    fn to_room(&mut self, room: &str, except: Option<&str>, message: &ServerMessage) {
        let peers: Vec<String> = self
            .rooms
            .get(room)
            .map(|room| room.peers.keys().filter(|id| Some(id.as_str()) != except).cloned().collect())
            .unwrap_or_default();
        for peer in peers {
            self.push(&peer, message.clone());
        }
    }

    fn to_room_namespaces(&mut self, room: &str, message: impl Fn(String) -> ServerMessage) {
        let namespaces: Vec<String> = self
            .rooms
            .get(room)
            .map(|room| room.namespaces.iter().cloned().collect())
            .unwrap_or_default();
        for namespace in namespaces {
            self.to_subscribers(&namespace, &message(namespace.clone()));
        }
    }

    fn flush(&mut self) {
        for (user, message) in std::mem::take(&mut self.queued) {
            self.deliver(&user, &message);
        }
    }

    fn deliver(&self, user: &str, message: &ServerMessage) {
        let Some(client) = self.clients.get(user) else {
            tracing::trace!(user, "dropping message for disconnected user");
            return;
        };
        match serde_json::to_string(message) {
            Ok(text) => {
                if client.tx.send(text).is_err() {
                    tracing::trace!(user, "client queue closed");
                }
            },
            Err(err) => tracing::warn!(user, %err, "failed to encode server message"),
        }
    }
}

fn encode<T: Serialize>(payload: &T) -> Reply {
    serde_json::to_value(payload).map_err(|err| {
        tracing::warn!(%err, "failed to encode answer payload");
        "internal"
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn next(rx: &mut mpsc::UnboundedReceiver<String>) -> ServerMessage {
        ServerMessage::decode(&rx.try_recv().unwrap()).unwrap()
    }

    fn request(server: &mut SimServer, user: &str, tid: u64, request: &Request) {
        server.handle(user, &request.encode(tid).unwrap()).unwrap();
    }

    #[test]
    fn connect_greets_with_hello() {
        let mut server = SimServer::new(SimConfig::default());
        let mut rx = server.connect("alice").unwrap();

        let ServerMessage::Hello { id, .. } = next(&mut rx) else { unreachable!("expected hello") };
        assert_eq!(id, "alice");
        assert_eq!(server.connect("alice").unwrap_err(), SimError::NameTaken("alice".into()));
    }

    #[test]
    fn rejected_request_sends_no_pushes() {
        let mut server = SimServer::new(SimConfig::default());
        let mut rx = server.connect("alice").unwrap();
        next(&mut rx);

        request(&mut server, "alice", 0, &Request::RoomLeave { room: "r9".into() });

        assert_eq!(next(&mut rx), ServerMessage::Answer {
            tid: Some(0),
            data: None,
            error: Some("not_found".into()),
        });
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn last_peer_leaving_closes_room() {
        let mut server = SimServer::new(SimConfig::default());
        let mut rx = server.connect("alice").unwrap();
        next(&mut rx);

        request(&mut server, "alice", 0, &Request::RoomJoin { room: None, status: Value::Null });
        next(&mut rx);
        assert_eq!(server.room_ids().collect::<Vec<_>>(), ["r1"]);

        request(&mut server, "alice", 1, &Request::RoomLeave { room: "r1".into() });
        assert_eq!(server.room_ids().count(), 0);
    }

    #[test]
    fn malformed_request_is_dropped() {
        let mut server = SimServer::new(SimConfig::default());
        let mut rx = server.connect("alice").unwrap();
        next(&mut rx);

        server.handle("alice", "{\"type\": \"room_join\"}").unwrap();

        assert!(rx.try_recv().is_err());
        assert_eq!(
            server.handle("mallory", "{}").unwrap_err(),
            SimError::NotConnected("mallory".into())
        );
    }
}
