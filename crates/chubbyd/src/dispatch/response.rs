//! Server-to-client messages and their JSONL framing.

use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::handle::CallId;
use crate::session::{Event, Reply};

use super::errors::DispatchError;

/// Lines written by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The single answer to a call.
    Reply {
        /// Identifier of the call being answered.
        call_id: CallId,
        /// Outcome of the call.
        result: Reply,
    },
    /// Out-of-band notification.
    Event(Event),
    /// A request line that could not be turned into a call.
    Error {
        /// Human-readable description.
        message: String,
    },
}

impl ServerMessage {
    /// Builds a reply message.
    pub fn reply(call_id: CallId, result: Reply) -> Self {
        Self::Reply { call_id, result }
    }

    /// Builds an error message from a dispatch failure.
    pub fn error(error: &DispatchError) -> Self {
        Self::Error {
            message: error.to_string(),
        }
    }
}

/// Writer that frames server messages as JSONL.
pub struct ResponseWriter<W> {
    writer: W,
}

impl<W: Write> ResponseWriter<W> {
    /// Creates a new response writer wrapping the given output stream.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes one message as a JSONL line and flushes it.
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation or writing fails.
    pub fn write_message(&mut self, message: &ServerMessage) -> Result<(), DispatchError> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');
        self.writer.write_all(&line)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Borrows the underlying stream.
    pub fn get_ref(&self) -> &W {
        &self.writer
    }
}
