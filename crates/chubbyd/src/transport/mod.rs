//! Socket listener for the lock service endpoints.
//!
//! The transport module binds the configured endpoint and hands every
//! accepted connection to a [`ConnectionHandler`] on its own thread. It knows
//! nothing of the JSONL protocol; the dispatch module supplies the handler.

mod errors;
mod handler;
mod listener;
#[cfg(test)]
mod listener_tests;

pub use self::errors::ListenerError;
pub(crate) use self::handler::{ConnectionHandler, ConnectionStream};
pub(crate) use self::listener::{ListenerHandle, SocketListener};

const LISTENER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");
