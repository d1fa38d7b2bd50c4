//! Fuzz target for session state under interleaved operations and pushes
//!
//! # Strategy
//!
//! - Local operations: subscribe, join, leave, invite, accept, deny, cancel
//! - Answers: success or error for any issued transaction, in any order
//! - Pushes: presence, room and invitation messages drawn from small id pools
//!   so they collide with live objects
//!
//! # Invariants
//!
//! - No input panics the session
//! - Pending transactions never exceed issued transactions
//! - One listener per namespace, routed room and listening invitation, plus
//!   the session itself
//! - A pending peer is never accepted

#![no_main]

use arbitrary::Arbitrary;
use callsig_core::{RoomKey, RoomState, ServerMessage, Session};
use callsig_proto::PeerSnapshot;
use libfuzzer_sys::fuzz_target;
use serde_json::{Value, json};

const NAMESPACES: [&str; 2] = ["lobby", "ops"];
const ROOMS: [&str; 3] = ["r1", "r2", "r3"];
const USERS: [&str; 3] = ["alice", "bob", "carol"];
const HANDLES: [&str; 2] = ["h1", "h2"];

#[derive(Debug, Arbitrary)]
enum Step {
    Subscribe(u8),
    Unsubscribe(u8),
    Join(Option<u8>),
    Leave(u8),
    Release(u8),
    Invite { room: u8, user: u8 },
    Accept(u8),
    Deny(u8),
    Cancel(u8),
    Answer { tid: u8, reply: Reply },
    Push(Push),
    Closed,
}

#[derive(Debug, Arbitrary)]
enum Reply {
    Empty,
    Error,
    Joined { room: u8, peers: Vec<(u8, bool)> },
    Handle(u8),
}

#[derive(Debug, Arbitrary)]
enum Push {
    UserAdd { ns: u8, user: u8 },
    UserRm { ns: u8, user: u8 },
    RoomAdd { ns: u8, room: u8, peers: Vec<(u8, bool)> },
    RoomRm { ns: u8, room: u8 },
    NsPeerAdd { ns: u8, room: u8, user: u8, pending: bool },
    NsPeerUpdate { ns: u8, room: u8, user: u8, pending: Option<bool> },
    PeerAdd { room: u8, user: u8, pending: bool },
    PeerUpdate { room: u8, user: u8, pending: Option<bool> },
    PeerRm { room: u8, user: u8 },
    PeerFrom { room: u8, user: u8 },
    Incoming { handle: u8, user: u8 },
    Cancelled(u8),
    Response { handle: u8, accepted: bool },
}

fn pick<'a>(pool: &[&'a str], index: u8) -> &'a str {
    pool[usize::from(index) % pool.len()]
}

fn peers(entries: &[(u8, bool)]) -> std::collections::BTreeMap<String, PeerSnapshot> {
    entries
        .iter()
        .map(|&(user, pending)| {
            (pick(&USERS, user).to_string(), PeerSnapshot { status: Value::Null, pending })
        })
        .collect()
}

fn answer(tid: u64, reply: &Reply) -> ServerMessage {
    let (data, error) = match reply {
        Reply::Empty => (Some(Value::Null), None),
        Reply::Error => (None, Some("not_found".to_string())),
        Reply::Joined { room, peers: entries } => (
            Some(json!({
                "room": pick(&ROOMS, *room),
                "status": {},
                "peers": serde_json::to_value(peers(entries)).unwrap_or_default(),
            })),
            None,
        ),
        Reply::Handle(handle) => (Some(json!({"handle": pick(&HANDLES, *handle)})), None),
    };
    ServerMessage::Answer { tid: Some(tid), data, error }
}

fn push(push: &Push) -> ServerMessage {
    let ns = |i: u8| pick(&NAMESPACES, i).to_string();
    let room = |i: u8| pick(&ROOMS, i).to_string();
    let user = |i: u8| pick(&USERS, i).to_string();
    let handle = |i: u8| pick(&HANDLES, i).to_string();

    match *push {
        Push::UserAdd { ns: n, user: u } => {
            ServerMessage::NsUserAdd { namespace: ns(n), user: user(u), status: Value::Null }
        },
        Push::UserRm { ns: n, user: u } => ServerMessage::NsUserRm { namespace: ns(n), user: user(u) },
        Push::RoomAdd { ns: n, room: r, peers: ref entries } => ServerMessage::NsRoomAdd {
            namespace: ns(n),
            room: room(r),
            status: json!({}),
            peers: peers(entries),
        },
        Push::RoomRm { ns: n, room: r } => ServerMessage::NsRoomRm { namespace: ns(n), room: room(r) },
        Push::NsPeerAdd { ns: n, room: r, user: u, pending } => ServerMessage::NsRoomPeerAdd {
            namespace: ns(n),
            room: room(r),
            user: user(u),
            status: Value::Null,
            pending,
        },
        Push::NsPeerUpdate { ns: n, room: r, user: u, pending } => ServerMessage::NsRoomPeerUpdate {
            namespace: ns(n),
            room: room(r),
            user: user(u),
            status: None,
            pending,
        },
        Push::PeerAdd { room: r, user: u, pending } => ServerMessage::RoomPeerAdd {
            room: room(r),
            user: user(u),
            status: Value::Null,
            pending,
        },
        Push::PeerUpdate { room: r, user: u, pending } => {
            ServerMessage::RoomPeerUpdate { room: room(r), user: user(u), status: None, pending }
        },
        Push::PeerRm { room: r, user: u } => ServerMessage::RoomPeerRm { room: room(r), user: user(u) },
        Push::PeerFrom { room: r, user: u } => ServerMessage::RoomPeerFrom {
            room: room(r),
            user: user(u),
            event: "offer".to_string(),
            data: Value::Null,
        },
        Push::Incoming { handle: h, user: u } => ServerMessage::InviteIncoming {
            handle: handle(h),
            user: user(u),
            status: Value::Null,
            data: Value::Null,
        },
        Push::Cancelled(h) => ServerMessage::InviteCancelled { handle: handle(h) },
        Push::Response { handle: h, accepted } => {
            ServerMessage::InviteResponse { handle: handle(h), accepted }
        },
    }
}

fn room_key(session: &Session, index: u8) -> Option<RoomKey> {
    let keys: Vec<RoomKey> = session.rooms().map(|room| room.key()).collect();
    (!keys.is_empty()).then(|| keys[usize::from(index) % keys.len()])
}

fn check(session: &Session) {
    let issued = session.next_transaction_id();
    assert!(u64::try_from(session.pending_transactions()).unwrap() <= issued);

    let routed = session
        .rooms()
        .filter(|room| matches!(room.state(), RoomState::Connected | RoomState::Leaving))
        .count();
    let invitations = session.incoming_invitations().filter(|i| i.is_listening()).count()
        + session.outgoing_invitations().filter(|i| i.is_listening()).count();
    assert_eq!(session.listener_count(), 1 + session.namespaces().count() + routed + invitations);

    for room in session.rooms() {
        for peer in room.peers().values() {
            assert!(!(peer.pending() && peer.accepted().outcome().is_some_and(Result::is_ok)));
        }
    }
}

fuzz_target!(|steps: Vec<Step>| {
    let mut session = Session::new();
    session.connect();
    let _ = session.handle_server_message(ServerMessage::Hello {
        id: "alice".to_string(),
        server: Value::Null,
    });

    for step in steps {
        match step {
            Step::Subscribe(ns) => {
                let _ = session.subscribe(pick(&NAMESPACES, ns));
            },
            Step::Unsubscribe(ns) => {
                let _ = session.unsubscribe(pick(&NAMESPACES, ns));
            },
            Step::Join(requested) => {
                let key = session.room(requested.map(|r| pick(&ROOMS, r).to_string()));
                let _ = session.connect_room(key);
            },
            Step::Leave(index) => {
                if let Some(key) = room_key(&session, index) {
                    let _ = session.leave(key);
                }
            },
            Step::Release(index) => {
                if let Some(key) = room_key(&session, index) {
                    let _ = session.release_room(key);
                }
            },
            Step::Invite { room, user } => {
                if let Some(key) = room_key(&session, room) {
                    let _ = session.invite(key, pick(&USERS, user), Value::Null);
                }
            },
            Step::Accept(handle) => {
                let _ = session.accept(pick(&HANDLES, handle), Value::Null);
            },
            Step::Deny(handle) => {
                let _ = session.deny(pick(&HANDLES, handle));
            },
            Step::Cancel(handle) => {
                let _ = session.cancel_invitation(pick(&HANDLES, handle));
            },
            Step::Answer { tid, reply } => {
                let tid = u64::from(tid) % session.next_transaction_id().max(1);
                let _ = session.handle_server_message(answer(tid, &reply));
            },
            Step::Push(message) => {
                let _ = session.handle_server_message(push(&message));
            },
            Step::Closed => {
                let _ = session.handle_closed();
            },
        }
        let _ = session.take_outgoing();
        check(&session);
    }
});
