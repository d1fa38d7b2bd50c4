//! Seeded multi-client call scenario.
//!
//! Every client connects, subscribes to and registers in one namespace. The
//! first client then creates a room and invites each other client in turn;
//! invitees accept or deny by a seeded coin flip. Accepted peers trade an
//! offer and an answer with the caller and race it for the room topic,
//! then everyone leaves and withdraws from the namespace. Invariants are
//! checked between phases.

use std::sync::Arc;

use callsig_client::{ClientError, Runtime, Scope};
use callsig_core::{Change, Notification, RoomKey, RoomState, SessionError};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::{
    invariants::{InvariantRegistry, SnapshotRecorder, Violation},
    sim_channel::{SimChannel, shared},
    sim_server::{Admission, SimConfig, SimError, SimServer},
};

const MOODS: [&str; 4] = ["available", "busy", "away", "focused"];
const ACCEPT_PROBABILITY: f64 = 0.75;

type SimRuntime = Runtime<SimChannel>;

/// Scenario parameters.
#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    /// Number of clients, including the caller
    pub clients: usize,
    /// Namespace every client joins
    pub namespace: String,
    /// Seed for statuses and invitation decisions
    pub seed: u64,
    /// Server admission policy
    pub admission: Admission,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self { clients: 3, namespace: "lobby".into(), seed: 0, admission: Admission::Open }
    }
}

/// What happened during a scenario run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScenarioReport {
    /// Server id of the call room
    pub room: String,
    /// Invitees that accepted
    pub accepted: Vec<String>,
    /// Invitees that denied
    pub denied: Vec<String>,
    /// Peer messages delivered
    pub messages: usize,
    /// Topic updates rejected by the optimistic check
    pub conflicts: usize,
}

/// Scenario failures.
#[derive(Error, Debug)]
pub enum ScenarioError {
    /// A call needs a caller and at least one invitee
    #[error("a call needs at least two clients, got {0}")]
    TooFewClients(usize),
    /// Client operation failed
    #[error(transparent)]
    Client(#[from] ClientError),
    /// Simulated server failed
    #[error(transparent)]
    Sim(#[from] SimError),
    /// Joined room has no server id
    #[error("room {0} was never bound to a server id")]
    Unbound(RoomKey),
    /// Invariants failed between phases
    #[error("invariant violations after {phase}: {violations:?}")]
    Invariants {
        /// Phase that just completed
        phase: &'static str,
        /// Every violation found
        violations: Vec<Violation>,
    },
}

/// Run the call scenario against a fresh simulated server.
///
/// # Errors
///
/// - `ScenarioError::TooFewClients` for fewer than two clients
/// - `ScenarioError::Invariants` if a phase leaves any session inconsistent
/// - `ScenarioError::Client` or `ScenarioError::Sim` for unexpected failures
pub async fn run_call(config: &ScenarioConfig) -> Result<ScenarioReport, ScenarioError> {
    if config.clients < 2 {
        return Err(ScenarioError::TooFewClients(config.clients));
    }

    let server = shared(SimServer::new(SimConfig { admission: config.admission }));
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut checker = Checker::new();
    let mut report = ScenarioReport::default();

    let mut clients = Vec::with_capacity(config.clients);
    for index in 0..config.clients {
        let name = format!("user{index}");
        let mut runtime = Runtime::new(SimChannel::new(Arc::clone(&server), name.clone()));

        runtime.connect().await?;
        runtime.subscribe(&config.namespace).await?;
        runtime.register(&config.namespace).await?;
        let mood = MOODS[rng.gen_range(0..MOODS.len())];
        runtime.set_status(json!({"mood": mood})).await?;

        clients.push((name, runtime));
    }
    checker.check("presence", &clients)?;

    let Some(((caller_name, caller), callees)) = clients.split_first_mut() else {
        return Err(ScenarioError::TooFewClients(0));
    };
    let caller_name = caller_name.clone();

    let room = caller.room(None);
    caller.connect_room(room).await?;
    report.room = caller
        .session()
        .get_room(room)
        .and_then(|r| r.id())
        .ok_or(ScenarioError::Unbound(room))?
        .to_string();
    tracing::info!(caller = %caller_name, room = %report.room, "call room open");

    let mut joined = Vec::new();
    for (index, (name, callee)) in callees.iter_mut().enumerate() {
        let handle = caller.invite(room, name, json!({"video": true})).await?;
        let accept = rng.gen_bool(ACCEPT_PROBABILITY);

        let (response, decision) =
            tokio::join!(caller.wait_response(&handle), answer_invitation(callee, accept));
        let decision = decision?;

        match (response?, decision) {
            (true, Some(key)) => {
                if config.admission == Admission::Manual {
                    server.lock().map_err(|_| SimError::Poisoned)?.admit(&report.room, name)?;
                }
                caller.wait_peer_accepted(room, name).await?;
                tracing::debug!(%handle, peer = %name, "invitation accepted");
                report.accepted.push(name.clone());
                joined.push((index, key));
            },
            _ => {
                tracing::debug!(%handle, peer = %name, "invitation denied");
                report.denied.push(name.clone());
            },
        }
    }

    for &(index, key) in &joined {
        let (name, callee) = &mut callees[index];

        let (listener, mut inbox) =
            callee.listen(Scope::RoomPeer { room: key, user: caller_name.clone() });
        caller.send_to_peer(room, name, "offer", json!({"sdp": format!("offer-{name}")})).await?;
        wait_message(callee, &mut inbox).await?;
        callee.unlisten(listener);

        let (listener, mut inbox) = caller.listen(Scope::RoomPeer { room, user: name.clone() });
        callee.send_to_peer(key, &caller_name, "answer", json!({"sdp": format!("answer-{name}")})).await?;
        wait_message(caller, &mut inbox).await?;
        caller.unlisten(listener);

        report.messages += 2;
    }

    caller.set_room_status_safe(room, "topic", json!("standup"), Value::Null).await?;
    if let Some(&(index, key)) = joined.first() {
        let contender = &mut callees[index].1;
        match contender.set_room_status_safe(key, "topic", json!("retro"), Value::Null).await {
            Err(ClientError::Session(SessionError::Server(reason))) if reason == "conflict" => {
                report.conflicts += 1;
            },
            Err(err) => return Err(err.into()),
            Ok(_) => {},
        }
    }
    checker.check("call", &clients)?;

    for (_, runtime) in clients.iter_mut().rev() {
        let connected: Vec<RoomKey> = runtime
            .session()
            .rooms()
            .filter(|r| matches!(r.state(), RoomState::Connected))
            .map(|r| r.key())
            .collect();
        for key in connected {
            runtime.leave(key).await?;
        }
    }
    checker.check("leave", &clients)?;

    for (_, runtime) in &mut clients {
        runtime.unregister(&config.namespace).await?;
        runtime.unsubscribe(&config.namespace).await?;
    }
    checker.check("teardown", &clients)?;

    tracing::info!(
        accepted = report.accepted.len(),
        denied = report.denied.len(),
        messages = report.messages,
        "scenario complete"
    );
    Ok(report)
}

async fn answer_invitation(
    callee: &mut SimRuntime,
    accept: bool,
) -> Result<Option<RoomKey>, ClientError> {
    let handle = callee.wait_invitation().await?;
    if accept {
        callee.accept(&handle, json!({"audio": true})).await.map(Some)
    } else {
        callee.deny(&handle).await.map(|()| None)
    }
}

/// Pump until `inbox` yields a peer message. Returns its payload.
async fn wait_message(
    runtime: &mut SimRuntime,
    inbox: &mut UnboundedReceiver<Notification>,
) -> Result<Value, ClientError> {
    loop {
        while let Ok(notification) = inbox.try_recv() {
            if let Notification::RoomPeer { change: Change::Message { data, .. }, .. } = notification {
                return Ok(data);
            }
        }
        runtime.pump().await?;
    }
}

struct Checker {
    registry: InvariantRegistry,
    recorder: SnapshotRecorder,
}

impl Checker {
    fn new() -> Self {
        Self { registry: InvariantRegistry::standard(), recorder: SnapshotRecorder::default() }
    }

    fn check(&mut self, phase: &'static str, clients: &[(String, SimRuntime)]) -> Result<(), ScenarioError> {
        let snapshot = self
            .recorder
            .capture(clients.iter().map(|(name, runtime)| (name.as_str(), runtime.session())));
        self.registry
            .check_all(&snapshot)
            .map_err(|violations| ScenarioError::Invariants { phase, violations })?;

        tracing::debug!(phase, clients = clients.len(), "invariants hold");
        Ok(())
    }
}
