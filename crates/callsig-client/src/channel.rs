//! Channel trait for abstracting the signaling transport.
//!
//! The [`Channel`] trait decouples the [`crate::Runtime`] from any concrete
//! transport. A channel carries whole JSON messages in both directions,
//! reliably and in order. Implementations exist for in-process testing
//! ([`MemoryChannel`]) and for the simulated server in `callsig-harness`; a
//! WebSocket transport would implement the same three methods.

use std::future::Future;

use thiserror::Error;
use tokio::sync::mpsc;

/// Duplex, ordered, message-based transport.
pub trait Channel: Send {
    /// Transport-specific error type.
    type Error: std::error::Error + Send + 'static;

    /// Open the transport. The server greets with `hello` once open.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot be opened.
    fn connect(&mut self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Send one encoded message.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport is closed or the send fails.
    fn send(&mut self, message: String) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Receive the next message, or `None` once the transport is closed.
    fn recv(&mut self) -> impl Future<Output = Option<String>> + Send;
}

/// The other end of a [`MemoryChannel`] has gone away.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("memory channel closed")]
pub struct MemoryClosed;

/// In-process channel backed by unbounded tokio queues.
#[derive(Debug)]
pub struct MemoryChannel {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
}

/// Server end of a [`MemoryChannel`], driven by tests or scripted servers.
#[derive(Debug)]
pub struct MemoryPeer {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
}

impl MemoryChannel {
    /// Create a connected channel and its peer end.
    pub fn pair() -> (Self, MemoryPeer) {
        let (client_tx, peer_rx) = mpsc::unbounded_channel();
        let (peer_tx, client_rx) = mpsc::unbounded_channel();
        (Self { tx: client_tx, rx: client_rx }, MemoryPeer { tx: peer_tx, rx: peer_rx })
    }
}

impl Channel for MemoryChannel {
    type Error = MemoryClosed;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        if self.tx.is_closed() { Err(MemoryClosed) } else { Ok(()) }
    }

    async fn send(&mut self, message: String) -> Result<(), Self::Error> {
        self.tx.send(message).map_err(|_| MemoryClosed)
    }

    async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

impl MemoryPeer {
    /// Push a message to the client.
    ///
    /// # Errors
    ///
    /// Returns `MemoryClosed` if the client end was dropped.
    pub fn send(&self, message: impl Into<String>) -> Result<(), MemoryClosed> {
        self.tx.send(message.into()).map_err(|_| MemoryClosed)
    }

    /// Next message sent by the client, or `None` once it is dropped.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Next message sent by the client if one is queued.
    pub fn try_recv(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }
}
