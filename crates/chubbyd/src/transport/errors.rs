//! Failures while opening or running the lock server's socket.

use std::io;

use thiserror::Error;

/// Errors surfaced while binding or running the socket listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The TCP host did not resolve to a usable address.
    #[error("cannot resolve {endpoint}: {source}")]
    Resolve {
        /// Configured endpoint.
        endpoint: String,
        /// Resolver failure, or `AddrNotAvailable` for an empty result.
        #[source]
        source: io::Error,
    },
    /// The socket could not be bound or switched to non-blocking accepts.
    #[error("cannot listen on {endpoint}: {source}")]
    Bind {
        /// Configured endpoint.
        endpoint: String,
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },
    /// Unix endpoints were configured on a platform without them.
    #[cfg(not(unix))]
    #[error("unix sockets are unsupported for endpoint {endpoint}")]
    UnsupportedUnix {
        /// Configured endpoint.
        endpoint: String,
    },
    /// A live chubbyd already answers on the socket path.
    #[cfg(unix)]
    #[error("another lock server already serves {path}")]
    InUse {
        /// Socket path.
        path: String,
    },
    /// Something other than a socket occupies the socket path.
    #[cfg(unix)]
    #[error("{path} exists and is not a socket")]
    NotASocket {
        /// Socket path.
        path: String,
    },
    /// A leftover socket file could not be checked or removed.
    #[cfg(unix)]
    #[error("cannot replace leftover socket {path}: {source}")]
    StaleSocket {
        /// Socket path.
        path: String,
        /// Underlying filesystem or connect error.
        #[source]
        source: io::Error,
    },
    /// The accept thread could not be started.
    #[error("cannot start the accept thread: {source}")]
    Spawn {
        /// Underlying spawn error.
        #[source]
        source: io::Error,
    },
    /// The accept thread panicked.
    #[error("accept thread panicked")]
    AcceptPanicked,
}
