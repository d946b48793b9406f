//! Connection handler that runs one session per connection.

use std::io::{BufRead, BufReader, Read};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::handle::SessionId;
use crate::transport::{ConnectionHandler, ConnectionStream};

use super::errors::DispatchError;
use super::manager::ServiceManager;
use super::request::CallRequest;
use super::response::{ResponseWriter, ServerMessage};
use super::router::{DISPATCH_TARGET, route};
use super::sessions::{SessionTable, WRITE_TIMEOUT};

/// Maximum size of a single request line in bytes, excluding the newline.
pub(crate) const MAX_REQUEST_BYTES: usize = 64 * 1024;

/// Connection handler that reads JSONL calls until the peer disconnects.
///
/// Replies are queued through the [`SessionTable`], so a call made on this
/// connection may be answered while another connection's thread holds the
/// service (a queued `acquire` answered by someone else's `release`). The
/// service lock is never held across socket writes.
pub(crate) struct DispatchConnectionHandler {
    service: ServiceManager,
    sessions: Arc<SessionTable>,
}

impl DispatchConnectionHandler {
    pub(crate) fn new(service: ServiceManager, sessions: Arc<SessionTable>) -> Self {
        Self { service, sessions }
    }

    fn serve(&self, stream: ConnectionStream) {
        let session = match stream.try_clone().and_then(|writer| self.sessions.register(writer)) {
            Ok(session) => session,
            Err(error) => {
                warn!(target: DISPATCH_TARGET, %error, "failed to start session");
                return;
            }
        };
        info!(target: DISPATCH_TARGET, %session, "session opened");

        let mut reader = BufReader::new(stream);
        loop {
            match read_request_line(&mut reader) {
                Ok(Some(line)) => {
                    if let Err(error) = self.dispatch(session, &line) {
                        warn!(target: DISPATCH_TARGET, %session, %error, "rejected request");
                        self.sessions.send_error(session, &error);
                        if !error.is_recoverable() {
                            break;
                        }
                    }
                }
                Ok(None) => break,
                Err(error) => {
                    warn!(target: DISPATCH_TARGET, %session, %error, "failed to read request");
                    self.sessions.send_error(session, &error);
                    break;
                }
            }
        }

        self.close(session);
    }

    fn dispatch(&self, session: SessionId, line: &[u8]) -> Result<(), DispatchError> {
        let request = CallRequest::parse(line)?;
        let sessions = &*self.sessions;
        self.service
            .with_service(|service| route(service, sessions, session, request.call_id, request.call))
    }

    fn close(&self, session: SessionId) {
        if let Err(error) = self
            .service
            .with_service(|service| service.session_closed(session))
        {
            warn!(target: DISPATCH_TARGET, %session, %error, "failed to cancel queued calls");
        }
        self.sessions.unregister(session);
        info!(target: DISPATCH_TARGET, %session, "session closed");
    }
}

impl ConnectionHandler for DispatchConnectionHandler {
    fn handle(&self, stream: ConnectionStream) {
        self.serve(stream);
    }

    fn refuse(&self, stream: ConnectionStream, reason: &str) {
        if let Err(error) = stream.set_write_timeout(Some(WRITE_TIMEOUT)) {
            debug!(target: DISPATCH_TARGET, %error, "refused connection has no write timeout");
        }
        let mut writer = ResponseWriter::new(stream);
        let refusal = ServerMessage::Error {
            message: reason.to_owned(),
        };
        if let Err(error) = writer.write_message(&refusal) {
            debug!(target: DISPATCH_TARGET, %error, "could not tell peer it was refused");
        }
        if let Err(error) = writer.get_ref().shutdown() {
            debug!(target: DISPATCH_TARGET, %error, "refused connection already closed");
        }
        info!(target: DISPATCH_TARGET, reason, "connection refused");
    }
}

/// Reads one newline-terminated request line.
///
/// Returns `Ok(None)` at end of stream. A final line without a newline is
/// still returned.
fn read_request_line<R: Read>(reader: &mut BufReader<R>) -> Result<Option<Vec<u8>>, DispatchError> {
    let mut line = Vec::new();
    let limit = (MAX_REQUEST_BYTES + 1) as u64;
    let read = reader.by_ref().take(limit).read_until(b'\n', &mut line)?;
    if read == 0 {
        return Ok(None);
    }
    if line.last() != Some(&b'\n') && line.len() > MAX_REQUEST_BYTES {
        return Err(DispatchError::request_too_large(MAX_REQUEST_BYTES));
    }
    debug!(target: DISPATCH_TARGET, bytes = line.len(), "read request line");
    Ok(Some(line))
}
