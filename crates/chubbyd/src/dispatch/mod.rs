//! JSONL session protocol for the lock service.
//!
//! Every accepted connection is one session. The client sends one
//! [`CallRequest`] per line and the server writes [`ServerMessage`] lines
//! back: exactly one `reply` per call, in whatever order calls complete, plus
//! `event` notifications and `error` lines for requests that could not be
//! parsed.
//!
//! ```json
//! {"call_id":7,"call":{"op":"open","path":"/ls/cell/lock","mode":9}}
//! {"kind":"reply","call_id":7,"result":{"ok":{"handle":{"path":"/ls/cell/lock","instance_number":1,"magic_number":3,"server_epoch":5,"writable":false}}}}
//! ```
//!
//! A session that never says `hello` is identified as `session-<id>`.

mod errors;
mod handler;
mod manager;
mod request;
mod response;
mod router;
mod sessions;

pub(crate) use self::errors::DispatchError;
pub(crate) use self::handler::DispatchConnectionHandler;
pub(crate) use self::manager::ServiceManager;
pub use self::request::{Call, CallRequest};
pub use self::response::{ResponseWriter, ServerMessage};
pub(crate) use self::sessions::SessionTable;
