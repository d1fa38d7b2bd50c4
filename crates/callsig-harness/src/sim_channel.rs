//! Channel bound to a shared [`SimServer`].
//!
//! Sending hands the request straight to the server under its lock; the
//! server queues its answer and pushes on the user's inbox before `send`
//! returns. Dropping a connected channel disconnects its user.

use std::sync::{Arc, Mutex, MutexGuard};

use callsig_client::Channel;
use tokio::sync::mpsc;

use crate::sim_server::{SimError, SimServer};

/// Server shared by every simulated channel.
pub type SharedServer = Arc<Mutex<SimServer>>;

/// Create a shared server.
pub fn shared(server: SimServer) -> SharedServer {
    Arc::new(Mutex::new(server))
}

/// Simulated transport for one user.
#[derive(Debug)]
pub struct SimChannel {
    server: SharedServer,
    user: String,
    inbox: Option<mpsc::UnboundedReceiver<String>>,
}

impl SimChannel {
    /// Create a channel that connects as `user`.
    pub fn new(server: SharedServer, user: impl Into<String>) -> Self {
        Self { server, user: user.into(), inbox: None }
    }

    /// User id this channel connects as.
    pub fn user(&self) -> &str {
        &self.user
    }

    fn lock(&self) -> Result<MutexGuard<'_, SimServer>, SimError> {
        self.server.lock().map_err(|_| SimError::Poisoned)
    }
}

impl Channel for SimChannel {
    type Error = SimError;

    async fn connect(&mut self) -> Result<(), SimError> {
        if self.inbox.is_none() {
            let inbox = self.lock()?.connect(&self.user)?;
            self.inbox = Some(inbox);
        }
        Ok(())
    }

    async fn send(&mut self, message: String) -> Result<(), SimError> {
        if self.inbox.is_none() {
            return Err(SimError::NotConnected(self.user.clone()));
        }
        self.lock()?.handle(&self.user, &message)
    }

    async fn recv(&mut self) -> Option<String> {
        match &mut self.inbox {
            Some(inbox) => inbox.recv().await,
            None => None,
        }
    }
}

impl Drop for SimChannel {
    fn drop(&mut self) {
        if self.inbox.is_none() {
            return;
        }
        if let Ok(mut server) = self.server.lock() {
            server.disconnect(&self.user);
        }
    }
}
