//! Runtime tests against scripted servers over a memory channel.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use callsig_client::{ClientError, MemoryChannel, MemoryPeer, Runtime, RuntimeConfig, Scope};
use callsig_core::{AcceptanceError, Request, SessionError, TransactionId};
use serde_json::{Value, json};

/// Answer every request the client sends with the messages `reply` returns.
fn serve<F>(mut peer: MemoryPeer, mut reply: F)
where
    F: FnMut(TransactionId, Request) -> Vec<Value> + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(text) = peer.recv().await {
            let (tid, request) = Request::decode(&text).unwrap();
            for message in reply(tid, request) {
                if peer.send(message.to_string()).is_err() {
                    return;
                }
            }
        }
    });
}

fn ok(tid: TransactionId, data: Value) -> Value {
    json!({"type": "answer", "tid": tid, "data": data})
}

fn err(tid: TransactionId, error: &str) -> Value {
    json!({"type": "answer", "tid": tid, "error": error})
}

fn hello(peer: &MemoryPeer) {
    peer.send(json!({"type": "hello", "id": "S1", "server": {"v": 1}}).to_string()).unwrap();
}

#[tokio::test]
async fn connect_returns_server_descriptor() {
    let (channel, peer) = MemoryChannel::pair();
    hello(&peer);
    let mut runtime = Runtime::new(channel);

    assert_eq!(runtime.connect().await.unwrap(), json!({"v": 1}));
    assert_eq!(runtime.connect().await.unwrap(), json!({"v": 1}));
    assert_eq!(runtime.session().id(), Some("S1"));
}

#[tokio::test]
async fn unregister_rejects_with_server_error() {
    let (channel, peer) = MemoryChannel::pair();
    serve(peer, |tid, _| vec![err(tid, "not_found")]);
    let mut runtime = Runtime::new(channel);

    let error = runtime.unregister("ns1").await.unwrap_err();

    assert_eq!(error, ClientError::Session(SessionError::Server("not_found".into())));
    assert_eq!(error.to_string(), "not_found");
}

#[tokio::test]
async fn invitation_response_resolves_true() {
    let (channel, peer) = MemoryChannel::pair();
    serve(peer, |tid, request| match request {
        Request::RoomJoin { .. } => vec![ok(tid, json!({"room": "r1", "status": {}}))],
        Request::InviteSend { .. } => vec![
            ok(tid, json!({"handle": "h1"})),
            json!({"type": "invite_response", "handle": "h1", "accepted": true}),
        ],
        _ => vec![err(tid, "unsupported")],
    });
    let mut runtime = Runtime::new(channel);

    let room = runtime.room(None);
    runtime.connect_room(room).await.unwrap();
    let handle = runtime.invite(room, "bob", json!(null)).await.unwrap();

    assert_eq!(handle, "h1");
    assert!(runtime.wait_response(&handle).await.unwrap());
}

#[tokio::test]
async fn cancelled_invitation_rejects_response() {
    let (channel, peer) = MemoryChannel::pair();
    serve(peer, |tid, request| match request {
        Request::RoomJoin { .. } => vec![ok(tid, json!({"room": "r1", "status": {}}))],
        Request::InviteSend { .. } => vec![ok(tid, json!({"handle": "h1"}))],
        Request::InviteCancel { .. } => vec![ok(tid, Value::Null)],
        _ => vec![err(tid, "unsupported")],
    });
    let mut runtime = Runtime::new(channel);

    let room = runtime.room(None);
    runtime.connect_room(room).await.unwrap();
    let handle = runtime.invite(room, "bob", json!(null)).await.unwrap();
    runtime.cancel_invitation(&handle).await.unwrap();

    assert_eq!(
        runtime.wait_response(&handle).await,
        Err(ClientError::Invitation(callsig_core::InvitationError::Cancelled))
    );
}

#[tokio::test]
async fn connect_room_issues_one_join() {
    let joins = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&joins);
    let (channel, peer) = MemoryChannel::pair();
    serve(peer, move |tid, request| match request {
        Request::RoomJoin { .. } => {
            counter.fetch_add(1, Ordering::SeqCst);
            vec![ok(tid, json!({"room": "r1", "status": {}}))]
        },
        _ => vec![err(tid, "unsupported")],
    });
    let mut runtime = Runtime::new(channel);

    let room = runtime.room(Some("r1".into()));
    runtime.connect_room(room).await.unwrap();
    runtime.connect_room(room).await.unwrap();

    assert_eq!(joins.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn listeners_receive_their_level_of_dual_emission() {
    let (channel, peer) = MemoryChannel::pair();
    serve(peer, |tid, request| match request {
        Request::NsSubscribe { .. } => vec![
            ok(tid, json!({"users": {"u1": "online"}, "rooms": {}})),
            json!({"type": "ns_user_update", "namespace": "ns1", "user": "u1", "status": "away"}),
        ],
        _ => vec![err(tid, "unsupported")],
    });
    let mut runtime = Runtime::new(channel);
    let (_, mut container) = runtime.listen(Scope::Namespace("ns1".into()));
    let (_, mut user) =
        runtime.listen(Scope::NamespaceUser { namespace: "ns1".into(), user: "u1".into() });

    runtime.subscribe("ns1").await.unwrap();
    runtime.pump().await.unwrap();

    let mut container_events = 0;
    while container.try_recv().is_ok() {
        container_events += 1;
    }
    let mut user_events = 0;
    while user.try_recv().is_ok() {
        user_events += 1;
    }

    // seed add and update: entity + changed on the container, entity on the user
    assert_eq!(container_events, 4);
    assert_eq!(user_events, 2);
    assert_eq!(
        runtime.session().namespace("ns1").unwrap().user("u1").unwrap().status(),
        &json!("away")
    );
}

#[tokio::test]
async fn wait_peer_accepted_follows_admission() {
    let (channel, peer) = MemoryChannel::pair();
    serve(peer, |tid, request| match request {
        Request::RoomJoin { .. } => vec![
            ok(tid, json!({"room": "r1", "status": {}})),
            json!({"type": "room_peer_add", "room": "r1", "user": "u2", "status": null, "pending": true}),
            json!({"type": "room_peer_update", "room": "r1", "user": "u2", "pending": false}),
        ],
        _ => vec![err(tid, "unsupported")],
    });
    let mut runtime = Runtime::new(channel);

    let room = runtime.room(Some("r1".into()));
    runtime.connect_room(room).await.unwrap();

    assert_eq!(runtime.wait_peer_accepted(room, "u2").await, Ok(()));
}

#[tokio::test]
async fn wait_peer_accepted_sees_peer_that_already_left() {
    let (channel, peer) = MemoryChannel::pair();
    serve(peer, |tid, request| match request {
        Request::RoomJoin { .. } => vec![
            ok(tid, json!({"room": "r1", "status": {}})),
            json!({"type": "room_peer_add", "room": "r1", "user": "u2", "status": null, "pending": true}),
            json!({"type": "room_peer_rm", "room": "r1", "user": "u2"}),
        ],
        _ => vec![err(tid, "unsupported")],
    });
    let config = RuntimeConfig::default().with_wait_timeout(Duration::from_millis(200));
    let mut runtime = Runtime::with_config(channel, config);

    let room = runtime.room(Some("r1".into()));
    runtime.connect_room(room).await.unwrap();
    runtime.pump().await.unwrap();
    runtime.pump().await.unwrap();

    assert_eq!(
        runtime.wait_peer_accepted(room, "u2").await,
        Err(ClientError::Acceptance(AcceptanceError::Left))
    );
}

#[tokio::test]
async fn leave_succeeds_despite_server_error() {
    let (channel, peer) = MemoryChannel::pair();
    serve(peer, |tid, request| match request {
        Request::RoomJoin { .. } => vec![ok(
            tid,
            json!({"room": "r1", "status": {}, "peers": {"u2": {"status": null, "pending": true}}}),
        )],
        Request::RoomLeave { .. } => vec![err(tid, "gone")],
        _ => vec![err(tid, "unsupported")],
    });
    let mut runtime = Runtime::new(channel);

    let room = runtime.room(Some("r1".into()));
    runtime.connect_room(room).await.unwrap();
    runtime.leave(room).await.unwrap();

    assert_eq!(
        runtime.wait_peer_accepted(room, "u2").await,
        Err(ClientError::Acceptance(AcceptanceError::Left))
    );
    assert_eq!(runtime.session().listener_count(), 1);
}

#[tokio::test]
async fn bounded_wait_times_out_and_leaves_transaction_pending() {
    let (channel, peer) = MemoryChannel::pair();
    serve(peer, |_, _| Vec::new());
    let config = RuntimeConfig::default().with_wait_timeout(Duration::from_millis(20));
    let mut runtime = Runtime::with_config(channel, config);

    let error = runtime.register("ns1").await.unwrap_err();

    assert_eq!(error, ClientError::Timeout(Duration::from_millis(20)));
    assert!(runtime.session().is_pending(0));
}

#[tokio::test]
async fn closed_channel_fails_waits() {
    let (channel, peer) = MemoryChannel::pair();
    hello(&peer);
    drop(peer);
    let mut runtime = Runtime::new(channel);

    runtime.pump().await.unwrap();

    assert_eq!(runtime.pump().await.unwrap_err(), ClientError::ChannelClosed);
    assert!(runtime.is_closed());
    assert_eq!(runtime.pump().await.unwrap_err(), ClientError::ChannelClosed);
}
