//! Scripted exchanges against the public session API.
//!
//! Each test plays the server by hand: it reads the session's outbox and
//! feeds back the exact messages a server would send.

use callsig_core::{
    Completion, Notification, Request, Session, SessionAction, SessionError, Ticket,
    TransactionId,
};
use serde_json::{Value, json};

fn feed(session: &mut Session, message: Value) -> Vec<SessionAction> {
    session.handle_message(&message.to_string())
}

fn drain(session: &mut Session) -> Vec<Request> {
    session
        .take_outgoing()
        .iter()
        .map(|text| Request::decode(text).unwrap().1)
        .collect()
}

fn completed(actions: &[SessionAction], tid: TransactionId) -> Option<&Result<Completion, SessionError>> {
    actions.iter().find_map(|a| match a {
        SessionAction::Completed { tid: t, result } if *t == tid => Some(result),
        _ => None,
    })
}

#[test]
fn hello_then_connect() {
    let mut session = Session::new();
    session.connect();

    feed(&mut session, json!({"type": "hello", "id": "S1", "server": {"v": 1}}));

    assert_eq!(session.connect(), Some(json!({"v": 1})));
}

#[test]
fn call_setup_and_invitation_response() {
    let mut session = Session::new();
    feed(&mut session, json!({"type": "hello", "id": "S1", "server": {}}));

    let room = session.room(None);
    let Ticket::Pending(join) = session.connect_room(room).unwrap() else {
        unreachable!("first connect must issue a join")
    };
    let invite_before_join = session.invite(room, "bob", json!(null));
    assert_eq!(invite_before_join, Err(SessionError::RoomNotConnected(room)));

    feed(&mut session, json!({"type": "answer", "tid": join, "data": {"room": "r1", "status": {}}}));
    let invite = session.invite(room, "bob", json!({"video": true})).unwrap();

    insta::assert_debug_snapshot!(drain(&mut session), @r#"
    [
        RoomJoin {
            room: None,
            status: Null,
        },
        InviteSend {
            room: "r1",
            user: "bob",
            data: Object {
                "video": Bool(true),
            },
        },
    ]
    "#);

    let actions = feed(&mut session, json!({"type": "answer", "tid": invite, "data": {"handle": "h1"}}));
    assert_eq!(
        completed(&actions, invite),
        Some(&Ok(Completion::InvitationSent { handle: "h1".into() }))
    );

    let actions = feed(&mut session, json!({"type": "invite_response", "handle": "h1", "accepted": true}));
    assert_eq!(actions.len(), 1);
    assert!(matches!(&actions[0], SessionAction::Notify(Notification::OutgoingInvitation { .. })));
    assert_eq!(
        session.outgoing_invitation("h1").unwrap().response().outcome(),
        Some(&Ok(true))
    );
}

#[test]
fn unregister_not_found() {
    let mut session = Session::new();
    let tid = session.unregister("ns1").unwrap();

    let actions = feed(&mut session, json!({"type": "answer", "tid": tid, "error": "not_found"}));

    let Some(Err(err)) = completed(&actions, tid) else { unreachable!("expected a rejection") };
    assert_eq!(err.to_string(), "not_found");
}

#[test]
fn answer_that_never_arrives_stays_pending() {
    let mut session = Session::new();
    let tid = session.register("ns1").unwrap();

    feed(&mut session, json!({"type": "answer", "tid": tid + 1, "data": null}));
    feed(&mut session, json!({"type": "ns_user_add", "namespace": "ns1", "user": "u1", "status": 1}));
    session.handle_closed();

    assert!(session.is_pending(tid));
    assert_eq!(session.pending_transactions(), 1);
}

#[test]
fn subscribe_and_invitation_share_one_channel() {
    let mut session = Session::new();
    let subscribe = session.subscribe("ns1").unwrap();

    feed(&mut session, json!({"type": "invite_incoming", "handle": "h9", "user": "carol", "status": "online", "data": {"topic": "sync"}}));
    feed(&mut session, json!({"type": "answer", "tid": subscribe, "data": {"users": {"carol": "online"}}}));
    let actions = feed(&mut session, json!({"event": "ns_user_update", "namespace": "ns1", "user": "carol", "status": "busy"}));

    assert_eq!(actions.len(), 3);
    assert_eq!(session.namespace("ns1").unwrap().user("carol").unwrap().status(), &json!("busy"));
    assert_eq!(session.incoming_invitation("h9").unwrap().data(), &json!({"topic": "sync"}));
    assert_eq!(session.listener_count(), 3);
}
