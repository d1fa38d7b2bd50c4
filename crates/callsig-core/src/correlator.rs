//! Transaction correlation.
//!
//! Every outgoing request is stamped with the next sequential transaction id
//! and parked in the pending table together with a [`Continuation`] describing
//! what to do with the answer. An answer removes its entry exactly once; an
//! answer for an unknown or absent id finds nothing and changes nothing.
//!
//! There is no timeout: an entry whose answer never arrives stays pending for
//! the lifetime of the session.

use std::collections::HashMap;

use callsig_proto::{ProtocolError, Request, TransactionId};

use crate::room::RoomKey;

/// Follow-up work attached to a pending transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Continuation {
    /// Surface the answer to the caller unchanged.
    Reply,
    /// Build and seed a namespace mirror.
    Subscribe { namespace: String },
    /// Tear down a namespace mirror.
    Unsubscribe { namespace: String },
    /// Bind a room to its server id (join or invitation accept).
    Join { room: RoomKey },
    /// Mark a room and its peers as left, whatever the answer.
    Leave { room: RoomKey },
    /// Wrap the returned handle in an outgoing invitation.
    InviteSend { room: RoomKey, user: String },
    /// Force-reject an outgoing invitation's response.
    InviteCancel { handle: String },
}

/// Pending transaction table.
#[derive(Debug, Default)]
pub(crate) struct Correlator {
    next_tid: TransactionId,
    pending: HashMap<TransactionId, Continuation>,
}

impl Correlator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Stamp `request` with a fresh id, encode it and park `continuation`.
    ///
    /// The id is consumed only if encoding succeeds, so issued ids stay
    /// gapless.
    pub(crate) fn issue(
        &mut self,
        request: &Request,
        continuation: Continuation,
    ) -> Result<(TransactionId, String), ProtocolError> {
        let tid = self.next_tid;
        let text = request.encode(tid)?;

        self.next_tid += 1;
        self.pending.insert(tid, continuation);

        tracing::debug!(tid, kind = request.kind(), "transaction issued");
        Ok((tid, text))
    }

    /// Remove and return the continuation registered for `tid`.
    pub(crate) fn resolve(
        &mut self,
        tid: Option<TransactionId>,
    ) -> Option<(TransactionId, Continuation)> {
        let tid = tid?;
        let continuation = self.pending.remove(&tid)?;
        tracing::debug!(tid, "transaction settled");
        Some((tid, continuation))
    }

    /// Id the next request will receive.
    pub(crate) fn next_tid(&self) -> TransactionId {
        self.next_tid
    }

    /// Number of transactions awaiting an answer.
    pub(crate) fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Whether `tid` is awaiting an answer.
    pub(crate) fn is_pending(&self, tid: TransactionId) -> bool {
        self.pending.contains_key(&tid)
    }
}
