//! Coarse-grained lock service in the style of Chubby.
//!
//! Clients open handles on slash-separated paths, read and write small
//! contents, and take exclusive advisory locks on those paths. The crate is
//! split into a coordination core and the server around it:
//!
//! - [`path`] validates path syntax;
//! - [`registry`] issues handles and authenticates every handle a client
//!   presents;
//! - [`coordinator`] grants locks and keeps a FIFO queue of blocked
//!   `acquire` calls per path;
//! - [`service`] ties those to a [`store::BackingStore`] and answers each
//!   call exactly once through a [`session::Transport`].
//!
//! The binary serves the core over JSONL sessions on a TCP or Unix socket
//! configured via [`chubby_config`]. Bootstrap loads configuration,
//! initialises structured telemetry, prepares the socket filesystem, and
//! builds the service over the in-memory store; [`run_daemon`] then serves
//! sessions until a termination signal arrives.
//!
//! ## Deferred replies
//!
//! A contended `acquire` gets no reply when it is made. The call is parked
//! and answered by whichever `release` hands the lock to it, which is why
//! replies carry the session and call identifiers they answer.

mod bootstrap;
pub mod coordinator;
mod dispatch;
pub mod handle;
mod health;
pub mod path;
mod process;
pub mod registry;
pub mod service;
pub mod session;
pub mod store;
pub mod telemetry;
mod transport;

pub use bootstrap::{
    BootstrapError, ConfigLoader, Server, StaticConfigLoader, SystemConfigLoader, bootstrap_with,
};
pub use dispatch::{Call, CallRequest, ResponseWriter, ServerMessage};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use process::{LaunchError, ShutdownError, ShutdownSignal, SystemShutdownSignal, run_daemon};
pub use telemetry::{TelemetryError, TelemetryHandle};
pub use transport::ListenerError;

#[cfg(test)]
mod tests;
