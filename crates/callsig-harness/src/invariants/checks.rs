//! Standard session invariants.

use super::{Invariant, InvariantResult, SystemSnapshot, Violation};

/// Every live object holds exactly one channel listener.
///
/// A session always listens for session-scoped messages. On top of that,
/// each subscribed namespace, each routed room and each invitation still
/// waiting for a push holds one. A mismatch means a terminal transition
/// forgot to unregister, or an object listens after it was torn down.
pub struct ListenerBalance;

impl Invariant for ListenerBalance {
    fn name(&self) -> &'static str {
        "listener_balance"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            let expected =
                1 + client.namespaces + client.routed_rooms + client.listening_invitations;
            if client.listener_count != expected {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "client {}: {} listeners, expected {expected} ({} namespaces, {} rooms, \
                         {} invitations)",
                        client.name,
                        client.listener_count,
                        client.namespaces,
                        client.routed_rooms,
                        client.listening_invitations
                    ),
                });
            }
        }
        Ok(())
    }
}

/// A peer's admission flag agrees with its acceptance outcome.
///
/// Admitted peers have a resolved acceptance. Pending peers are either
/// unsettled or were rejected because they left first.
pub struct AcceptanceConsistency;

impl Invariant for AcceptanceConsistency {
    fn name(&self) -> &'static str {
        "acceptance_consistency"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            for presence in &client.presences {
                let consistent = if presence.pending {
                    !matches!(presence.accepted, Some(Ok(())))
                } else {
                    presence.accepted == Some(Ok(()))
                };
                if !consistent {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "client {} peer {}: pending={} but acceptance {:?}",
                            client.name, presence.location, presence.pending, presence.accepted
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Transaction ids are issued in order and never reused.
///
/// The next id never decreases between captures, and a session cannot
/// await more answers than it has issued requests.
pub struct TransactionMonotonicity;

impl Invariant for TransactionMonotonicity {
    fn name(&self) -> &'static str {
        "transaction_monotonicity"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            for window in client.tid_history.windows(2) {
                if window[1] < window[0] {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "client {}: next transaction id decreased {} → {}",
                            client.name, window[0], window[1]
                        ),
                    });
                }
            }

            if !u64::try_from(client.pending).is_ok_and(|pending| pending <= client.issued) {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "client {}: {} pending transactions but only {} issued",
                        client.name, client.pending, client.issued
                    ),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use callsig_core::AcceptanceError;

    use super::*;
    use crate::invariants::{ClientSnapshot, PresenceSnapshot};

    fn presence(pending: bool, accepted: Option<Result<(), AcceptanceError>>) -> PresenceSnapshot {
        PresenceSnapshot { location: "ns1/r1/u1".into(), pending, accepted }
    }

    fn with_presence(presence: PresenceSnapshot) -> SystemSnapshot {
        let mut client = ClientSnapshot::new("alice");
        client.presences.push(presence);
        SystemSnapshot::single(client)
    }

    #[test]
    fn listener_balance_counts_live_objects() {
        let client = ClientSnapshot {
            listener_count: 4,
            namespaces: 1,
            routed_rooms: 1,
            listening_invitations: 1,
            ..ClientSnapshot::new("alice")
        };
        assert!(ListenerBalance.check(&SystemSnapshot::single(client.clone())).is_ok());

        let leaked = ClientSnapshot { listener_count: 5, ..client };
        assert!(ListenerBalance.check(&SystemSnapshot::single(leaked)).is_err());
    }

    #[test]
    fn pending_peer_may_be_unsettled_or_left() {
        assert!(AcceptanceConsistency.check(&with_presence(presence(true, None))).is_ok());
        assert!(
            AcceptanceConsistency
                .check(&with_presence(presence(true, Some(Err(AcceptanceError::Left)))))
                .is_ok()
        );
        assert!(AcceptanceConsistency.check(&with_presence(presence(true, Some(Ok(()))))).is_err());
    }

    #[test]
    fn admitted_peer_must_be_resolved() {
        assert!(AcceptanceConsistency.check(&with_presence(presence(false, Some(Ok(()))))).is_ok());
        assert!(AcceptanceConsistency.check(&with_presence(presence(false, None))).is_err());
    }

    #[test]
    fn decreasing_transaction_id_is_a_violation() {
        let mut client = ClientSnapshot::new("alice");
        client.issued = 3;
        client.tid_history = vec![1, 4, 3];

        let violation = TransactionMonotonicity.check(&SystemSnapshot::single(client)).unwrap_err();
        assert_eq!(violation.invariant, "transaction_monotonicity");
    }

    #[test]
    fn more_pending_than_issued_is_a_violation() {
        let mut client = ClientSnapshot::new("alice");
        client.issued = 1;
        client.pending = 2;

        assert!(TransactionMonotonicity.check(&SystemSnapshot::single(client)).is_err());
    }
}
