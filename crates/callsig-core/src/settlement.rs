//! Single-settlement outcomes.
//!
//! A [`Settlement`] is written at most once: the first `settle` wins and every
//! later attempt is ignored. Owners mutate it; anyone holding a reference to
//! the owner may read the outcome.

use serde_json::Value;

use crate::error::AcceptanceError;

/// Outcome that settles exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement<T, E> {
    outcome: Option<Result<T, E>>,
}

impl<T, E> Default for Settlement<T, E> {
    fn default() -> Self {
        Self::pending()
    }
}

impl<T, E> Settlement<T, E> {
    /// Unsettled outcome.
    pub const fn pending() -> Self {
        Self { outcome: None }
    }

    /// Outcome settled at construction.
    pub const fn settled(outcome: Result<T, E>) -> Self {
        Self { outcome: Some(outcome) }
    }

    /// Settle with `outcome` unless already settled.
    ///
    /// Returns `true` if this call settled it.
    pub fn settle(&mut self, outcome: Result<T, E>) -> bool {
        if self.outcome.is_some() {
            return false;
        }
        self.outcome = Some(outcome);
        true
    }

    /// Settle successfully unless already settled.
    pub fn resolve(&mut self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Settle with an error unless already settled.
    pub fn reject(&mut self, error: E) -> bool {
        self.settle(Err(error))
    }

    /// Outcome, once settled.
    pub fn outcome(&self) -> Option<&Result<T, E>> {
        self.outcome.as_ref()
    }

    /// Whether an outcome has been recorded.
    pub fn is_settled(&self) -> bool {
        self.outcome.is_some()
    }
}

/// Acceptance outcome of a peer: resolves when admitted, rejects if the peer
/// goes away while still pending.
pub type Acceptance = Settlement<(), AcceptanceError>;

/// Presence shared by namespace-room peers and joined-room peers.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerPresence {
    status: Value,
    pending: bool,
    accepted: Acceptance,
}

/// What a peer update changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct PresenceChange {
    /// Update carried a status
    pub status: bool,
    /// Update moved the peer from pending to admitted
    pub accepted: bool,
    /// Update asked to make an admitted peer pending again
    pub reopen_ignored: bool,
}

impl PeerPresence {
    /// Peers that arrive already admitted have a resolved acceptance.
    pub(crate) fn new(status: Value, pending: bool) -> Self {
        let accepted = if pending { Acceptance::pending() } else { Acceptance::settled(Ok(())) };
        Self { status, pending, accepted }
    }

    /// Apply a partial update.
    ///
    /// `pending` only moves from `true` to `false`; a settled acceptance is
    /// never reopened.
    pub(crate) fn update(&mut self, status: Option<Value>, pending: Option<bool>) -> PresenceChange {
        let mut change = PresenceChange::default();

        if let Some(status) = status {
            self.status = status;
            change.status = true;
        }

        match pending {
            Some(false) if self.pending => {
                self.pending = false;
                change.accepted = self.accepted.resolve(());
            },
            Some(true) if !self.pending => change.reopen_ignored = true,
            _ => {},
        }

        change
    }

    /// Peer is going away. Rejects the acceptance if still pending.
    ///
    /// Returns `true` if the acceptance was rejected by this call.
    pub(crate) fn depart(&mut self) -> bool {
        self.accepted.reject(AcceptanceError::Left)
    }

    /// Application status.
    pub fn status(&self) -> &Value {
        &self.status
    }

    /// Whether the peer still awaits admission.
    pub fn pending(&self) -> bool {
        self.pending
    }

    /// Acceptance outcome.
    pub fn accepted(&self) -> &Acceptance {
        &self.accepted
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn first_settlement_wins() {
        let mut settlement: Settlement<bool, &str> = Settlement::pending();

        assert!(settlement.resolve(true));
        assert!(!settlement.reject("late"));
        assert_eq!(settlement.outcome(), Some(&Ok(true)));
    }

    #[test]
    fn admitted_peer_starts_accepted() {
        let presence = PeerPresence::new(json!("hi"), false);
        assert_eq!(presence.accepted().outcome(), Some(&Ok(())));
    }

    #[test]
    fn pending_to_admitted_resolves_once() {
        let mut presence = PeerPresence::new(json!(null), true);

        let change = presence.update(None, Some(false));
        assert!(change.accepted);
        assert!(!presence.pending());

        let change = presence.update(None, Some(false));
        assert!(!change.accepted);
    }

    #[test]
    fn departure_after_admission_keeps_resolution() {
        let mut presence = PeerPresence::new(json!(null), true);
        presence.update(None, Some(false));

        assert!(!presence.depart());
        assert_eq!(presence.accepted().outcome(), Some(&Ok(())));
    }

    #[test]
    fn departure_while_pending_rejects() {
        let mut presence = PeerPresence::new(json!(null), true);

        assert!(presence.depart());
        assert_eq!(presence.accepted().outcome(), Some(&Err(AcceptanceError::Left)));

        let change = presence.update(None, Some(false));
        assert!(!change.accepted);
    }

    #[test]
    fn pending_does_not_reopen() {
        let mut presence = PeerPresence::new(json!(null), false);
        let change = presence.update(Some(json!("away")), Some(true));

        assert!(change.reopen_ignored);
        assert!(!presence.pending());
        assert_eq!(presence.status(), &json!("away"));
    }
}
