//! Accept loop for the lock server's socket.
//!
//! One background thread polls a non-blocking listener and starts a
//! `chubbyd-conn-N` thread per accepted connection. A connection that cannot
//! get a thread is refused through [`ConnectionHandler::refuse`] so the peer
//! learns why instead of seeing a silent close.

use std::io;
use std::net::{TcpListener, ToSocketAddrs};
#[cfg(test)]
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use chubby_config::SocketEndpoint;

use super::{ConnectionHandler, ConnectionStream, LISTENER_TARGET, ListenerError};

#[cfg(unix)]
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::FileTypeExt;
#[cfg(unix)]
use std::os::unix::net::{UnixListener, UnixStream};
#[cfg(unix)]
use std::path::Path;

/// Poll interval while no connection is pending.
const IDLE_POLL: Duration = Duration::from_millis(25);
/// Pause after a failed accept, e.g. when file descriptors run out.
const ACCEPT_RETRY: Duration = Duration::from_millis(150);

/// Socket bound to the configured endpoint, not yet accepting.
#[derive(Debug)]
pub(crate) struct SocketListener {
    endpoint: SocketEndpoint,
    socket: BoundSocket,
}

#[derive(Debug)]
enum BoundSocket {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

impl BoundSocket {
    fn set_nonblocking(&self) -> io::Result<()> {
        match self {
            Self::Tcp(listener) => listener.set_nonblocking(true),
            #[cfg(unix)]
            Self::Unix(listener) => listener.set_nonblocking(true),
        }
    }

    /// Returns `Ok(None)` when no connection is pending.
    fn accept(&self) -> io::Result<Option<ConnectionStream>> {
        let accepted = match self {
            Self::Tcp(listener) => listener.accept().and_then(|(stream, peer)| {
                stream.set_nonblocking(false)?;
                stream.set_nodelay(true)?;
                debug!(target: LISTENER_TARGET, %peer, "accepted tcp connection");
                Ok(ConnectionStream::Tcp(stream))
            }),
            #[cfg(unix)]
            Self::Unix(listener) => listener.accept().and_then(|(stream, _)| {
                stream.set_nonblocking(false)?;
                debug!(target: LISTENER_TARGET, "accepted unix connection");
                Ok(ConnectionStream::Unix(stream))
            }),
        };
        match accepted {
            Ok(stream) => Ok(Some(stream)),
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(error) => Err(error),
        }
    }
}

impl SocketListener {
    pub(crate) fn bind(endpoint: &SocketEndpoint) -> Result<Self, ListenerError> {
        let socket = match endpoint {
            SocketEndpoint::Tcp { host, port } => BoundSocket::Tcp(bind_tcp(endpoint, host, *port)?),
            #[cfg(unix)]
            SocketEndpoint::Unix { path } => BoundSocket::Unix(bind_unix(path.as_std_path())?),
            #[cfg(not(unix))]
            SocketEndpoint::Unix { .. } => {
                return Err(ListenerError::UnsupportedUnix {
                    endpoint: endpoint.to_string(),
                });
            }
        };
        Ok(Self {
            endpoint: endpoint.clone(),
            socket,
        })
    }

    /// Address of a TCP listener; useful when bound to port 0.
    #[cfg(test)]
    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        match &self.socket {
            BoundSocket::Tcp(listener) => listener.local_addr().ok(),
            #[cfg(unix)]
            BoundSocket::Unix(_) => None,
        }
    }

    /// Starts the accept thread. The socket file of a unix endpoint is
    /// removed again if the thread cannot start.
    pub(crate) fn start(
        self,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Result<ListenerHandle, ListenerError> {
        if let Err(source) = self.socket.set_nonblocking() {
            self.release_socket_file();
            return Err(ListenerError::Bind {
                endpoint: self.endpoint.to_string(),
                source,
            });
        }
        let stopping = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stopping);
        let endpoint = self.endpoint.clone();
        let accept = thread::Builder::new()
            .name("chubbyd-accept".to_owned())
            .spawn(move || self.accept_until(&flag, &handler));
        match accept {
            Ok(thread) => Ok(ListenerHandle {
                stopping,
                thread: Some(thread),
            }),
            Err(source) => {
                // The listener moved into the failed closure and is closed.
                #[cfg(unix)]
                remove_own_socket(&endpoint);
                #[cfg(not(unix))]
                let _ = endpoint;
                Err(ListenerError::Spawn { source })
            }
        }
    }

    fn accept_until(self, stopping: &AtomicBool, handler: &Arc<dyn ConnectionHandler>) {
        info!(target: LISTENER_TARGET, endpoint = %self.endpoint, "accepting lock sessions");
        let mut connections: u64 = 0;
        let mut last_failure = None::<io::ErrorKind>;
        while !stopping.load(Ordering::SeqCst) {
            match self.socket.accept() {
                Ok(Some(stream)) => {
                    last_failure = None;
                    connections += 1;
                    start_connection(connections, stream, handler);
                }
                Ok(None) => thread::sleep(IDLE_POLL),
                Err(error) => {
                    let kind = error.kind();
                    if last_failure != Some(kind) {
                        warn!(target: LISTENER_TARGET, %error, "accept failed");
                    }
                    last_failure = Some(kind);
                    thread::sleep(ACCEPT_RETRY);
                }
            }
        }
        info!(
            target: LISTENER_TARGET,
            endpoint = %self.endpoint,
            connections,
            "stopped accepting lock sessions"
        );
        self.release_socket_file();
    }

    fn release_socket_file(&self) {
        #[cfg(unix)]
        remove_own_socket(&self.endpoint);
    }
}

fn start_connection(number: u64, stream: ConnectionStream, handler: &Arc<dyn ConnectionHandler>) {
    // A second handle survives a failed spawn, which drops the closure.
    let fallback = stream.try_clone();
    let session_handler = Arc::clone(handler);
    let spawned = thread::Builder::new()
        .name(format!("chubbyd-conn-{number}"))
        .spawn(move || session_handler.handle(stream));
    if let Err(error) = spawned {
        warn!(target: LISTENER_TARGET, connection = number, %error, "no thread for connection");
        match fallback {
            Ok(stream) => handler.refuse(stream, "server cannot start a session right now"),
            Err(clone_error) => {
                debug!(target: LISTENER_TARGET, %clone_error, "connection dropped without notice");
            }
        }
    }
}

/// Handle to the background accept thread.
pub(crate) struct ListenerHandle {
    stopping: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl ListenerHandle {
    /// Stops accepting new connections. Established sessions are unaffected.
    pub(crate) fn shutdown(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }

    pub(crate) fn join(mut self) -> Result<(), ListenerError> {
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| ListenerError::AcceptPanicked),
            None => Ok(()),
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.stopping.store(true, Ordering::SeqCst);
    }
}

fn bind_tcp(endpoint: &SocketEndpoint, host: &str, port: u16) -> Result<TcpListener, ListenerError> {
    let resolve_error = |source: io::Error| ListenerError::Resolve {
        endpoint: endpoint.to_string(),
        source,
    };
    let addr = (host, port)
        .to_socket_addrs()
        .map_err(resolve_error)?
        .next()
        .ok_or_else(|| {
            resolve_error(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                "host resolved to no addresses",
            ))
        })?;
    TcpListener::bind(addr).map_err(|source| ListenerError::Bind {
        endpoint: endpoint.to_string(),
        source,
    })
}

/// Binds a unix socket, replacing a socket file left by a dead server.
///
/// A path that still accepts connections belongs to a running chubbyd and is
/// never taken over.
#[cfg(unix)]
fn bind_unix(path: &Path) -> Result<UnixListener, ListenerError> {
    let display = || path.display().to_string();
    let stale = |source: io::Error| ListenerError::StaleSocket {
        path: display(),
        source,
    };
    match fs::symlink_metadata(path) {
        Ok(metadata) if !metadata.file_type().is_socket() => {
            return Err(ListenerError::NotASocket { path: display() });
        }
        Ok(_) => match UnixStream::connect(path) {
            Ok(_live) => return Err(ListenerError::InUse { path: display() }),
            Err(error) if error.kind() == io::ErrorKind::ConnectionRefused => {
                debug!(target: LISTENER_TARGET, path = %path.display(), "replacing leftover socket");
                fs::remove_file(path).map_err(stale)?;
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => return Err(stale(error)),
        },
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(error) => return Err(stale(error)),
    }

    UnixListener::bind(path).map_err(|source| ListenerError::Bind {
        endpoint: format!("unix://{}", display()),
        source,
    })
}

/// Removes the endpoint's socket file if it is still a socket. Anything else
/// at the path was put there by someone else and is left alone.
#[cfg(unix)]
fn remove_own_socket(endpoint: &SocketEndpoint) {
    let Some(path) = endpoint.unix_path() else {
        return;
    };
    let still_socket = fs::symlink_metadata(path.as_std_path())
        .is_ok_and(|metadata| metadata.file_type().is_socket());
    if !still_socket {
        debug!(target: LISTENER_TARGET, %path, "socket path no longer ours; leaving it");
        return;
    }
    if let Err(error) = fs::remove_file(path.as_std_path())
        && error.kind() != io::ErrorKind::NotFound
    {
        warn!(target: LISTENER_TARGET, %error, %path, "failed to remove socket file");
    }
}
