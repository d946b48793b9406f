//! Live sessions and their outbound queues.
//!
//! The table is the server side of [`Transport`]: it resolves client
//! identities and queues replies and events for whichever session they are
//! addressed to, regardless of which connection thread produced them. Each
//! session owns a writer thread that drains its queue into the socket, so
//! delivery never blocks on a peer and never runs socket I/O while the
//! service is locked.
//!
//! A session whose queue overflows, or whose socket refuses a write for
//! longer than [`WRITE_TIMEOUT`], is disconnected.

use std::collections::HashMap;
use std::io;
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::handle::{CallId, ClientId, SessionId};
use crate::session::{Event, Reply, Transport};
use crate::transport::ConnectionStream;

use super::errors::DispatchError;
use super::response::{ResponseWriter, ServerMessage};
use super::router::DISPATCH_TARGET;

/// Messages a session may have queued before it is disconnected.
pub(crate) const OUTBOX_CAPACITY: usize = 1024;

/// Longest a single write may block before the session is disconnected.
pub(crate) const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

struct SessionEntry {
    client: ClientId,
    outbox: SyncSender<ServerMessage>,
    control: ConnectionStream,
    writer: JoinHandle<()>,
}

#[derive(Default)]
struct SessionIndex {
    next_session: u64,
    sessions: HashMap<SessionId, SessionEntry>,
}

/// Registry of connected sessions.
#[derive(Default)]
pub(crate) struct SessionTable {
    inner: Mutex<SessionIndex>,
}

impl SessionTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers a connection and starts its writer thread.
    ///
    /// `stream` is the handle replies are written to; the caller keeps its
    /// own handle for reading.
    pub(crate) fn register(&self, stream: ConnectionStream) -> io::Result<SessionId> {
        let control = stream.try_clone()?;
        stream.set_write_timeout(Some(WRITE_TIMEOUT))?;
        let (outbox, queued) = mpsc::sync_channel(OUTBOX_CAPACITY);

        let mut index = self.index();
        let session = SessionId(index.next_session + 1);
        let writer = thread::Builder::new()
            .name(format!("chubbyd-writer-{}", session.0))
            .spawn(move || drain_outbox(session, &queued, ResponseWriter::new(stream)))?;
        index.next_session = session.0;
        index.sessions.insert(
            session,
            SessionEntry {
                client: default_client(session),
                outbox,
                control,
                writer,
            },
        );
        debug!(target: DISPATCH_TARGET, %session, "session registered");
        Ok(session)
    }

    /// Binds `session` to `client`.
    pub(crate) fn bind(&self, session: SessionId, client: ClientId) {
        if let Some(entry) = self.index().sessions.get_mut(&session) {
            debug!(target: DISPATCH_TARGET, %session, %client, "session bound");
            entry.client = client;
        }
    }

    /// Forgets `session`, flushes what it still has queued and closes it.
    pub(crate) fn unregister(&self, session: SessionId) {
        let Some(SessionEntry {
            client,
            outbox,
            control,
            writer,
        }) = self.index().sessions.remove(&session)
        else {
            return;
        };
        // Closing the queue lets the writer finish the backlog and exit.
        drop(outbox);
        if writer.join().is_err() {
            warn!(target: DISPATCH_TARGET, %session, "session writer panicked");
        }
        shutdown_stream(session, &control);
        debug!(target: DISPATCH_TARGET, %session, %client, "session unregistered");
    }

    /// Number of connected sessions.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.index().sessions.len()
    }

    /// Queues a protocol error line for `session`.
    pub(crate) fn send_error(&self, session: SessionId, error: &DispatchError) {
        self.deliver(session, ServerMessage::error(error));
    }

    fn deliver(&self, session: SessionId, message: ServerMessage) {
        let index = self.index();
        let Some(entry) = index.sessions.get(&session) else {
            debug!(target: DISPATCH_TARGET, %session, "dropping message for closed session");
            return;
        };
        match entry.outbox.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(
                    target: DISPATCH_TARGET,
                    %session,
                    capacity = OUTBOX_CAPACITY,
                    "session is not reading; disconnecting"
                );
                shutdown_stream(session, &entry.control);
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!(target: DISPATCH_TARGET, %session, "dropping message for failed session");
            }
        }
    }

    fn index(&self) -> MutexGuard<'_, SessionIndex> {
        // Plain data; a poisoned guard is still consistent.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Transport for SessionTable {
    fn resolve_client_id(&self, session: SessionId) -> ClientId {
        self.index()
            .sessions
            .get(&session)
            .map_or_else(|| default_client(session), |entry| entry.client.clone())
    }

    fn reply(&self, session: SessionId, call: CallId, reply: Reply) {
        self.deliver(session, ServerMessage::reply(call, reply));
    }

    fn send_event(&self, session: SessionId, event: Event) {
        self.deliver(session, ServerMessage::Event(event));
    }

    fn sessions_of(&self, client: &ClientId) -> Vec<SessionId> {
        let mut sessions: Vec<SessionId> = self
            .index()
            .sessions
            .iter()
            .filter(|(_, entry)| entry.client == *client)
            .map(|(session, _)| *session)
            .collect();
        sessions.sort();
        sessions
    }
}

/// Writes queued messages until the queue closes or the peer stops accepting.
fn drain_outbox(
    session: SessionId,
    queued: &Receiver<ServerMessage>,
    mut writer: ResponseWriter<ConnectionStream>,
) {
    for message in queued {
        if let Err(error) = writer.write_message(&message) {
            warn!(target: DISPATCH_TARGET, %session, %error, "failed to write to session");
            shutdown_stream(session, writer.get_ref());
            return;
        }
    }
}

fn shutdown_stream(session: SessionId, stream: &ConnectionStream) {
    if let Err(error) = stream.shutdown() {
        debug!(target: DISPATCH_TARGET, %session, %error, "session socket already closed");
    }
}

fn default_client(session: SessionId) -> ClientId {
    ClientId::new(session.to_string())
}
