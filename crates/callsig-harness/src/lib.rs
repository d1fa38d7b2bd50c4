//! Simulation harness for callsig sessions.
//!
//! An in-memory [`SimServer`] plays the authoritative side of the signaling
//! protocol, and [`SimChannel`] connects async runtimes to it, so whole
//! multi-client calls run in one process with no network.
//!
//! # Invariant Testing
//!
//! The `invariants` module checks behavioral properties of live sessions:
//! listener balance, acceptance consistency, transaction-id monotonicity.
//! Use [`InvariantRegistry::standard()`] for all of them.
//!
//! # Scenarios
//!
//! [`run_call`] drives a seeded call: presence, invitations, peer messages,
//! contended room status, and teardown. The `callsig-sim` binary runs it
//! from the command line.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod invariants;
pub mod scenario;
pub mod sim_channel;
pub mod sim_server;

pub use invariants::{
    AcceptanceConsistency, ClientSnapshot, Invariant, InvariantRegistry, InvariantResult,
    ListenerBalance, PresenceSnapshot, SnapshotRecorder, SystemSnapshot, TransactionMonotonicity,
    Violation,
};
pub use scenario::{ScenarioConfig, ScenarioError, ScenarioReport, run_call};
pub use sim_channel::{SharedServer, SimChannel, shared};
pub use sim_server::{Admission, SimConfig, SimError, SimServer};
