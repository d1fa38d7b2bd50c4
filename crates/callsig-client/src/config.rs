//! Runtime configuration.

use std::time::Duration;

/// Runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Upper bound on any single wait for a server-driven outcome.
    ///
    /// `None` waits forever: transactions have no timeout of their own. An
    /// expired wait does not cancel the transaction, which stays pending in
    /// the session and may still settle later.
    pub wait_timeout: Option<Duration>,
}

impl RuntimeConfig {
    /// Bound every wait by `limit`.
    pub fn with_wait_timeout(mut self, limit: Duration) -> Self {
        self.wait_timeout = Some(limit);
        self
    }
}
