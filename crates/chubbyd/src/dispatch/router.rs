//! Routes parsed calls to the service handlers.

use tracing::debug;

use crate::handle::{CallId, ClientId, SessionId};
use crate::service::ChubbyService;
use crate::session::{Reply, Transport};
use crate::store::BackingStore;

use super::request::Call;
use super::sessions::SessionTable;

/// Tracing target for dispatch operations.
pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");

/// Dispatches one call. The reply is produced by the handler, possibly later.
pub(crate) fn route<S: BackingStore>(
    service: &mut ChubbyService<S>,
    sessions: &SessionTable,
    session: SessionId,
    call_id: CallId,
    call: Call,
) {
    debug!(target: DISPATCH_TARGET, %session, %call_id, op = call.op(), "dispatching call");
    match call {
        Call::Hello { client } => {
            let client = client.trim();
            if client.is_empty() {
                sessions.reply(session, call_id, Reply::bad_arg());
                return;
            }
            sessions.bind(session, ClientId::new(client));
            sessions.reply(session, call_id, Reply::bool(true));
        }
        Call::Open { path, mode } => service.open(sessions, session, call_id, &path, mode),
        Call::Close { handle } => service.close(sessions, session, call_id, &handle),
        Call::Delete { handle } => service.delete(sessions, session, call_id, &handle),
        Call::GetContentsAndStat { handle } => {
            service.get_contents_and_stat(sessions, session, call_id, &handle);
        }
        Call::SetContents { handle, content } => {
            service.set_contents(sessions, session, call_id, &handle, &content);
        }
        Call::Acquire { handle } => service.acquire(sessions, session, call_id, &handle),
        Call::TryAcquire { handle } => service.try_acquire(sessions, session, call_id, &handle),
        Call::Release { handle } => service.release(sessions, session, call_id, &handle),
        Call::Increment { value } => service.increment(sessions, session, call_id, value),
        Call::Decrement { value } => service.decrement(sessions, session, call_id, value),
    }
}
