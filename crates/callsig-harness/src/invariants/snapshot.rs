//! Observable session state for invariant checking.

use std::collections::BTreeMap;

use callsig_core::{AcceptanceError, RoomState, Session, TransactionId};

/// Snapshot of every simulated client.
#[derive(Debug, Clone, Default)]
pub struct SystemSnapshot {
    /// Per-client snapshots
    pub clients: Vec<ClientSnapshot>,
}

impl SystemSnapshot {
    /// Snapshot with a single client.
    pub fn single(client: ClientSnapshot) -> Self {
        Self { clients: vec![client] }
    }
}

/// Observable state of one session.
#[derive(Debug, Clone)]
pub struct ClientSnapshot {
    /// Client name
    pub name: String,
    /// Listener count reported by the session
    pub listener_count: usize,
    /// Subscribed namespace mirrors
    pub namespaces: usize,
    /// Rooms bound to a server id: connected or leaving
    pub routed_rooms: usize,
    /// Invitations still waiting for a push
    pub listening_invitations: usize,
    /// Every peer presence, in namespace rooms and joined rooms
    pub presences: Vec<PresenceSnapshot>,
    /// Next transaction id to be issued
    pub issued: TransactionId,
    /// Transactions awaiting an answer
    pub pending: usize,
    /// `issued` at every capture so far, oldest first
    pub tid_history: Vec<TransactionId>,
}

impl ClientSnapshot {
    /// Snapshot of a session with no objects: one session listener.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            listener_count: 1,
            namespaces: 0,
            routed_rooms: 0,
            listening_invitations: 0,
            presences: Vec::new(),
            issued: 0,
            pending: 0,
            tid_history: Vec::new(),
        }
    }

    /// Extract the observable state of `session`.
    pub fn from_session(name: impl Into<String>, session: &Session) -> Self {
        let mut presences = Vec::new();
        for namespace in session.namespaces() {
            for room in namespace.rooms().values() {
                for peer in room.peers().values() {
                    presences.push(PresenceSnapshot {
                        location: format!("{}/{}/{}", namespace.id(), room.id(), peer.id()),
                        pending: peer.pending(),
                        accepted: peer.accepted().outcome().copied(),
                    });
                }
            }
        }
        for room in session.rooms() {
            for peer in room.peers().values() {
                presences.push(PresenceSnapshot {
                    location: format!("{}/{}", room.key(), peer.id()),
                    pending: peer.pending(),
                    accepted: peer.accepted().outcome().copied(),
                });
            }
        }

        let routed_rooms = session
            .rooms()
            .filter(|room| matches!(room.state(), RoomState::Connected | RoomState::Leaving))
            .count();
        let listening_invitations = session.incoming_invitations().filter(|i| i.is_listening()).count()
            + session.outgoing_invitations().filter(|i| i.is_listening()).count();

        Self {
            name: name.into(),
            listener_count: session.listener_count(),
            namespaces: session.namespaces().count(),
            routed_rooms,
            listening_invitations,
            presences,
            issued: session.next_transaction_id(),
            pending: session.pending_transactions(),
            tid_history: Vec::new(),
        }
    }
}

/// Admission state of one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceSnapshot {
    /// `namespace/room/user` or `#key/user`
    pub location: String,
    /// Whether the peer still awaits admission
    pub pending: bool,
    /// Acceptance outcome, if settled
    pub accepted: Option<Result<(), AcceptanceError>>,
}

/// Captures snapshots and keeps per-client transaction history across
/// captures.
#[derive(Debug, Default)]
pub struct SnapshotRecorder {
    history: BTreeMap<String, Vec<TransactionId>>,
}

impl SnapshotRecorder {
    /// Snapshot every `(name, session)` pair and extend its history.
    pub fn capture<'a>(
        &mut self,
        sessions: impl IntoIterator<Item = (&'a str, &'a Session)>,
    ) -> SystemSnapshot {
        let clients = sessions
            .into_iter()
            .map(|(name, session)| {
                let mut client = ClientSnapshot::from_session(name, session);
                let history = self.history.entry(name.to_string()).or_default();
                history.push(client.issued);
                client.tid_history.clone_from(history);
                client
            })
            .collect();
        SystemSnapshot { clients }
    }
}
