//! Property-based tests for the session state machine.
//!
//! Arbitrary operation and push sequences must keep transaction ids gapless,
//! leave unmatched answers without effect, converge namespace mirrors with
//! the pushes applied, and settle every peer acceptance at most once.

use std::collections::BTreeMap;

use callsig_core::{
    Change, Notification, RoomEvent, RoomKey, Session, SessionAction, TransactionId,
};
use proptest::prelude::*;
use serde_json::{Value, json};

/// Operations that each issue exactly one request.
#[derive(Debug, Clone)]
enum Op {
    Register(u8),
    Unregister(u8),
    Status(u8),
    Raw(u8),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..4).prop_map(Op::Register),
        (0u8..4).prop_map(Op::Unregister),
        any::<u8>().prop_map(Op::Status),
        (0u8..4).prop_map(Op::Raw),
    ]
}

fn issue(session: &mut Session, op: &Op) -> TransactionId {
    let result = match op {
        Op::Register(n) => session.register(&format!("ns{n}")),
        Op::Unregister(n) => session.unregister(&format!("ns{n}")),
        Op::Status(s) => session.set_status(json!(s)),
        Op::Raw(n) => session.request(callsig_core::Request::NsUserRegister {
            namespace: format!("raw{n}"),
        }),
    };
    result.unwrap()
}

/// Namespace user pushes over a small id space so adds, updates and removals
/// collide often.
#[derive(Debug, Clone)]
enum UserPush {
    Add(u8, u8),
    Update(u8, u8),
    Remove(u8),
}

fn user_push_strategy() -> impl Strategy<Value = UserPush> {
    prop_oneof![
        (0u8..5, any::<u8>()).prop_map(|(u, s)| UserPush::Add(u, s)),
        (0u8..5, any::<u8>()).prop_map(|(u, s)| UserPush::Update(u, s)),
        (0u8..5).prop_map(UserPush::Remove),
    ]
}

fn user_push_message(namespace: &str, push: &UserPush) -> Value {
    match push {
        UserPush::Add(u, s) => {
            json!({"type": "ns_user_add", "namespace": namespace, "user": format!("u{u}"), "status": s})
        },
        UserPush::Update(u, s) => {
            json!({"type": "ns_user_update", "namespace": namespace, "user": format!("u{u}"), "status": s})
        },
        UserPush::Remove(u) => {
            json!({"type": "ns_user_rm", "namespace": namespace, "user": format!("u{u}")})
        },
    }
}

fn apply_to_model(model: &mut BTreeMap<String, Value>, push: &UserPush) {
    match push {
        UserPush::Add(u, s) => {
            model.entry(format!("u{u}")).or_insert_with(|| json!(s));
        },
        UserPush::Update(u, s) => {
            if let Some(status) = model.get_mut(&format!("u{u}")) {
                *status = json!(s);
            }
        },
        UserPush::Remove(u) => {
            model.remove(&format!("u{u}"));
        },
    }
}

/// Pushes affecting one peer of a joined room.
#[derive(Debug, Clone, Copy)]
enum PeerPush {
    Admit,
    Unadmit,
    Remove,
    Rejoin,
}

fn peer_push_strategy() -> impl Strategy<Value = PeerPush> {
    prop_oneof![
        Just(PeerPush::Admit),
        Just(PeerPush::Unadmit),
        Just(PeerPush::Remove),
        Just(PeerPush::Rejoin),
    ]
}

fn peer_push_message(push: PeerPush) -> Value {
    match push {
        PeerPush::Admit => {
            json!({"type": "room_peer_update", "room": "r1", "user": "u2", "pending": false})
        },
        PeerPush::Unadmit => {
            json!({"type": "room_peer_update", "room": "r1", "user": "u2", "pending": true})
        },
        PeerPush::Remove => json!({"type": "room_peer_rm", "room": "r1", "user": "u2"}),
        PeerPush::Rejoin => json!({
            "type": "room_peer_add", "room": "r1", "user": "u2", "status": null, "pending": true
        }),
    }
}

fn joined_room(session: &mut Session, peers: Value) -> RoomKey {
    let key = session.room(Some("r1".into()));
    let tid = session.connect_room(key).unwrap().tid().unwrap();
    session.handle_message(
        &json!({"type": "answer", "tid": tid, "data": {"room": "r1", "status": {}, "peers": peers}})
            .to_string(),
    );
    key
}

fn peer_changes(actions: &[SessionAction], user: &str) -> Vec<Change> {
    actions
        .iter()
        .filter_map(|action| match action {
            SessionAction::Notify(Notification::RoomPeer { user: u, change, .. }) if u == user => {
                Some(change.clone())
            },
            _ => None,
        })
        .collect()
}

proptest! {
    #[test]
    fn prop_transaction_ids_are_gapless(ops in prop::collection::vec(op_strategy(), 0..40)) {
        let mut session = Session::new();

        let ids: Vec<TransactionId> = ops.iter().map(|op| issue(&mut session, op)).collect();

        let expected: Vec<TransactionId> = (0..ops.len() as TransactionId).collect();
        prop_assert_eq!(ids, expected);
        prop_assert_eq!(session.pending_transactions(), ops.len());
        prop_assert_eq!(session.take_outgoing().len(), ops.len());
    }

    #[test]
    fn prop_answers_settle_each_transaction_once(
        count in 1usize..20,
        answers in prop::collection::vec(0u64..40, 0..60),
    ) {
        let mut session = Session::new();
        for n in 0..count {
            session.register(&format!("ns{n}")).unwrap();
        }

        let mut settled = std::collections::BTreeSet::new();
        for tid in answers {
            let actions = session.handle_message(
                &json!({"type": "answer", "tid": tid, "data": null}).to_string(),
            );
            let completed = actions
                .iter()
                .filter(|a| matches!(a, SessionAction::Completed { .. }))
                .count();

            let fresh = (tid as usize) < count && settled.insert(tid);
            prop_assert_eq!(completed, usize::from(fresh));
        }

        prop_assert_eq!(session.pending_transactions(), count - settled.len());
    }

    #[test]
    fn prop_namespace_converges_with_pushes(
        seed in prop::collection::btree_map(0u8..5, any::<u8>(), 0..5),
        pushes in prop::collection::vec(user_push_strategy(), 0..60),
        foreign in prop::collection::vec(user_push_strategy(), 0..10),
    ) {
        let mut session = Session::new();
        let tid = session.subscribe("ns1").unwrap();

        let mut model: BTreeMap<String, Value> =
            seed.iter().map(|(u, s)| (format!("u{u}"), json!(s))).collect();
        session.handle_message(
            &json!({"type": "answer", "tid": tid, "data": {"users": model.clone()}}).to_string(),
        );

        for push in &pushes {
            session.handle_message(&user_push_message("ns1", push).to_string());
            apply_to_model(&mut model, push);
        }
        for push in &foreign {
            session.handle_message(&user_push_message("ns2", push).to_string());
        }

        let namespace = session.namespace("ns1").unwrap();
        let mirrored: BTreeMap<String, Value> = namespace
            .users()
            .iter()
            .map(|(id, user)| (id.clone(), user.status().clone()))
            .collect();
        prop_assert_eq!(mirrored, model);
    }

    #[test]
    fn prop_acceptance_settles_at_most_once_per_peer(
        pushes in prop::collection::vec(peer_push_strategy(), 0..30),
    ) {
        let mut session = Session::new();
        let key = joined_room(&mut session, json!({"u2": {"status": null, "pending": true}}));

        let mut present = true;
        let mut admitted = false;
        for push in pushes {
            let changes = peer_changes(
                &session.handle_message(&peer_push_message(push).to_string()),
                "u2",
            );
            let accepted = changes.iter().filter(|c| **c == Change::Accepted).count();

            match push {
                PeerPush::Admit if present && !admitted => {
                    prop_assert_eq!(accepted, 1);
                    admitted = true;
                },
                PeerPush::Remove if present => {
                    prop_assert_eq!(changes, vec![Change::Left]);
                    present = false;
                    admitted = false;
                },
                PeerPush::Rejoin if !present => {
                    prop_assert_eq!(changes, vec![Change::Added]);
                    present = true;
                },
                _ => prop_assert_eq!(accepted, 0),
            }

            let room = session.get_room(key).unwrap();
            match room.peer("u2") {
                Some(peer) => {
                    prop_assert!(present);
                    prop_assert_eq!(peer.pending(), !admitted);
                    prop_assert_eq!(peer.accepted().is_settled(), admitted);
                },
                None => prop_assert!(!present),
            }
        }
    }

    #[test]
    fn prop_leave_emits_one_left_per_peer(
        peers in prop::collection::btree_map("[a-z]{1,4}", any::<bool>(), 0..6),
        server_error in any::<bool>(),
    ) {
        let snapshot: serde_json::Map<String, Value> = peers
            .iter()
            .map(|(user, pending)| (user.clone(), json!({"status": null, "pending": pending})))
            .collect();
        let mut session = Session::new();
        let key = joined_room(&mut session, Value::Object(snapshot));

        let tid = session.leave(key).unwrap().tid().unwrap();
        let answer = if server_error {
            json!({"type": "answer", "tid": tid, "error": "gone"})
        } else {
            json!({"type": "answer", "tid": tid})
        };
        let actions = session.handle_message(&answer.to_string());

        for user in peers.keys() {
            prop_assert_eq!(peer_changes(&actions, user), vec![Change::Left]);
        }
        let room_left = actions
            .iter()
            .filter(|a| {
                matches!(a, SessionAction::Notify(Notification::Room { event: RoomEvent::Left, .. }))
            })
            .count();
        prop_assert_eq!(room_left, 1);

        let room = session.get_room(key).unwrap();
        for peer in room.peers().values() {
            prop_assert!(peer.accepted().is_settled());
            prop_assert_eq!(peer.accepted().outcome().is_some_and(Result::is_err), peer.pending());
        }
        prop_assert_eq!(session.listener_count(), 1);
    }
}
