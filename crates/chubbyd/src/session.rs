//! Transport contract: how the core answers calls and pushes events.
//!
//! A reply may be produced long after the call arrived and from a different
//! handler (a contended `acquire` is answered by somebody else's `release`),
//! so [`Transport::reply`] takes the session and call identifiers explicitly
//! and must be callable from any context.

use serde::{Deserialize, Serialize};

use crate::handle::{CallId, ClientId, Handle, SessionId};
use crate::store::Metadata;

/// Protocol-level error codes returned to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientError {
    /// Malformed input or an unknown handle. Not retryable as is.
    BadArg,
    /// The backing store failed the operation. May be transient.
    FsFail,
}

/// Node contents returned by `get_contents_and_stat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentsAndStat {
    /// Node contents.
    pub content: String,
    /// Node metadata.
    pub stat: Metadata,
}

/// Successful reply payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyValue {
    /// A freshly opened handle.
    Handle(Handle),
    /// Boolean outcome (`false` is a refusal, not an error).
    Bool(bool),
    /// Contents and metadata of a node.
    ContentsAndStat(ContentsAndStat),
    /// Integer result of the arithmetic calls.
    Int(i64),
}

/// Outcome of one call: a value or an error code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reply {
    /// The call succeeded.
    Ok(ReplyValue),
    /// The call failed with a protocol error code.
    Err(ClientError),
}

impl Reply {
    /// Successful boolean reply.
    #[must_use]
    pub const fn bool(value: bool) -> Self {
        Self::Ok(ReplyValue::Bool(value))
    }

    /// `BAD_ARG` reply.
    #[must_use]
    pub const fn bad_arg() -> Self {
        Self::Err(ClientError::BadArg)
    }

    /// `FS_FAIL` reply.
    #[must_use]
    pub const fn fs_fail() -> Self {
        Self::Err(ClientError::FsFail)
    }

    /// Returns the error code, if any.
    #[must_use]
    pub const fn error(&self) -> Option<ClientError> {
        match self {
            Self::Ok(_) => None,
            Self::Err(code) => Some(*code),
        }
    }
}

/// Kinds of out-of-band notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Informational marker with no state change.
    Nop,
    /// The node was deleted; handles on it are no longer valid.
    FileDeleted,
}

/// Out-of-band notification pushed to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// What happened.
    pub event: EventKind,
    /// Node (or marker text for [`EventKind::Nop`]) the event concerns.
    pub path: String,
}

impl Event {
    /// Builds a [`EventKind::Nop`] marker.
    #[must_use]
    pub fn nop(marker: impl Into<String>) -> Self {
        Self {
            event: EventKind::Nop,
            path: marker.into(),
        }
    }

    /// Builds a [`EventKind::FileDeleted`] notification.
    #[must_use]
    pub fn file_deleted(path: impl Into<String>) -> Self {
        Self {
            event: EventKind::FileDeleted,
            path: path.into(),
        }
    }
}

/// Session services the core relies on.
pub trait Transport {
    /// Resolves the client identity bound to `session`.
    fn resolve_client_id(&self, session: SessionId) -> ClientId;

    /// Delivers the single reply for `(session, call)`.
    fn reply(&self, session: SessionId, call: CallId, reply: Reply);

    /// Pushes a best-effort event to `session`.
    fn send_event(&self, session: SessionId, event: Event);

    /// Sessions currently bound to `client`.
    fn sessions_of(&self, client: &ClientId) -> Vec<SessionId>;
}
