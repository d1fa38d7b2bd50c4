//! Client
//!
//! Async runtime for the callsig signaling protocol. Drives a sans-IO
//! [`callsig_core::Session`] over any [`Channel`] and exposes each session
//! operation as an awaitable method.
//!
//! # Components
//!
//! - [`Runtime`]: owns the channel and session; pumps inbound messages in
//!   arrival order until the awaited outcome settles
//! - [`Channel`]: transport abstraction (`connect`, `send`, `recv`)
//! - [`MemoryChannel`]: in-process channel for tests and scripted servers
//! - [`Scope`]: typed listener selection over session notifications
//! - [`RuntimeConfig`]: optional bound on waits

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod channel;
mod config;
mod error;
mod listener;
mod runtime;

pub use channel::{Channel, MemoryChannel, MemoryClosed, MemoryPeer};
pub use config::RuntimeConfig;
pub use error::ClientError;
pub use listener::{ListenerId, Scope};
pub use runtime::Runtime;
