//! Session invariants for simulated calls.
//!
//! A check never touches a live [`callsig_core::Session`]. The
//! [`SnapshotRecorder`] first copies what it needs from every client into a
//! [`SystemSnapshot`], carrying transaction-id history across captures, and
//! the registry then evaluates each [`Invariant`] against that copy.
//!
//! ```ignore
//! let mut recorder = SnapshotRecorder::default();
//! let snapshot = recorder.capture([("alice", alice.session()), ("bob", bob.session())]);
//! InvariantRegistry::standard().check_all(&snapshot)?;
//! ```

mod checks;
mod snapshot;

use std::fmt;

pub use checks::{AcceptanceConsistency, ListenerBalance, TransactionMonotonicity};
pub use snapshot::{ClientSnapshot, PresenceSnapshot, SnapshotRecorder, SystemSnapshot};

/// Outcome of one invariant over one snapshot.
pub type InvariantResult = Result<(), Violation>;

/// A broken invariant, named, with what was observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// `Invariant::name` of the check that failed
    pub invariant: &'static str,
    /// Observed state, naming the client and object involved
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.invariant, self.message)
    }
}

impl std::error::Error for Violation {}

/// Session property evaluated against a [`SystemSnapshot`].
pub trait Invariant: Send + Sync {
    /// Stable name, used as [`Violation::invariant`].
    fn name(&self) -> &'static str;

    /// Evaluate against every client in `state`.
    fn check(&self, state: &SystemSnapshot) -> InvariantResult;
}

/// Ordered set of invariants run together.
#[derive(Default)]
pub struct InvariantRegistry {
    checks: Vec<Box<dyn Invariant>>,
}

impl InvariantRegistry {
    /// Registry with no checks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding [`ListenerBalance`], [`AcceptanceConsistency`] and
    /// [`TransactionMonotonicity`].
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.add(ListenerBalance);
        registry.add(AcceptanceConsistency);
        registry.add(TransactionMonotonicity);
        registry
    }

    /// Append a check. Checks run in insertion order.
    pub fn add<I: Invariant + 'static>(&mut self, invariant: I) {
        self.checks.push(Box::new(invariant));
    }

    /// Run every check, collecting all failures rather than stopping at the
    /// first.
    pub fn check_all(&self, state: &SystemSnapshot) -> Result<(), Vec<Violation>> {
        let mut violations = Vec::new();
        for check in &self.checks {
            if let Err(violation) = check.check(state) {
                violations.push(violation);
            }
        }

        if violations.is_empty() { Ok(()) } else { Err(violations) }
    }

    /// [`Self::check_all`] for tests: panics listing every failure, prefixed
    /// with `context`.
    #[allow(clippy::panic)]
    pub fn assert_all(&self, state: &SystemSnapshot, context: &str) {
        let Err(violations) = self.check_all(state) else {
            return;
        };
        let lines: String = violations.iter().map(|v| format!("\n  {v}")).collect();
        panic!("{context}: {} session invariant(s) broken{lines}", violations.len());
    }

    /// Number of checks.
    pub fn len(&self) -> usize {
        self.checks.len()
    }

    /// Whether no checks are registered.
    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}
