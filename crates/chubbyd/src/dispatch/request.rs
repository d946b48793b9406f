//! Request deserialisation for the session loop.

use serde::{Deserialize, Serialize};

use crate::handle::{CallId, Handle, OpenMode};

use super::errors::DispatchError;

/// One call sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CallRequest {
    /// Client-chosen identifier echoed in the reply.
    pub call_id: CallId,
    /// The operation and its arguments.
    pub call: Call,
}

/// Operations understood by the server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Call {
    /// Binds the session to a client identity.
    Hello {
        /// Name other sessions of the same client also use.
        client: String,
    },
    /// Opens, or creates and opens, a node.
    Open {
        /// Absolute node path.
        path: String,
        /// Open flags.
        mode: OpenMode,
    },
    /// Closes a handle.
    Close {
        /// Handle being closed.
        handle: Handle,
    },
    /// Deletes the node behind a handle.
    Delete {
        /// Handle on the node.
        handle: Handle,
    },
    /// Reads contents and metadata.
    GetContentsAndStat {
        /// Handle on the node.
        handle: Handle,
    },
    /// Replaces the contents of a file.
    SetContents {
        /// Handle on the file.
        handle: Handle,
        /// New contents.
        content: String,
    },
    /// Takes the lock, waiting behind earlier callers.
    Acquire {
        /// Handle on the node.
        handle: Handle,
    },
    /// Takes the lock only if it is free.
    TryAcquire {
        /// Handle on the node.
        handle: Handle,
    },
    /// Gives the lock up.
    Release {
        /// Handle the lock was taken through.
        handle: Handle,
    },
    /// Replies `value + 1`.
    Increment {
        /// Operand.
        value: i64,
    },
    /// Replies `value - 1`.
    Decrement {
        /// Operand.
        value: i64,
    },
}

impl Call {
    /// Wire name of the operation, for logging.
    pub fn op(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "hello",
            Self::Open { .. } => "open",
            Self::Close { .. } => "close",
            Self::Delete { .. } => "delete",
            Self::GetContentsAndStat { .. } => "get_contents_and_stat",
            Self::SetContents { .. } => "set_contents",
            Self::Acquire { .. } => "acquire",
            Self::TryAcquire { .. } => "try_acquire",
            Self::Release { .. } => "release",
            Self::Increment { .. } => "increment",
            Self::Decrement { .. } => "decrement",
        }
    }
}

impl CallRequest {
    /// Parses a JSONL line into a call request.
    ///
    /// Trailing whitespace (including the newline delimiter) is trimmed before
    /// parsing.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::MalformedJsonl` if the line is empty or does
    /// not match the request schema.
    pub fn parse(line: &[u8]) -> Result<Self, DispatchError> {
        let trimmed = line.trim_ascii_end();
        if trimmed.is_empty() {
            return Err(DispatchError::malformed("empty request line"));
        }

        serde_json::from_slice(trimmed).map_err(DispatchError::from_json_error)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn parses_open() {
        let request = CallRequest::parse(br#"{"call_id":7,"call":{"op":"open","path":"/x","mode":9}}"#)
            .expect("parse open");
        assert_eq!(request.call_id, CallId(7));
        assert_eq!(
            request.call,
            Call::Open {
                path: "/x".to_owned(),
                mode: OpenMode::READ | OpenMode::CREATE_FILE,
            }
        );
    }

    #[test]
    fn parses_handle_arguments() {
        let line = br#"{"call_id":1,"call":{"op":"try_acquire","handle":{"path":"/x","instance_number":2,"magic_number":3,"server_epoch":4,"writable":true}}}
"#;
        let request = CallRequest::parse(line).expect("parse try_acquire");
        let Call::TryAcquire { handle } = request.call else {
            panic!("expected try_acquire, got {:?}", request.call);
        };
        assert_eq!(handle.instance_number, 2);
        assert_eq!(handle.magic_number, 3);
        assert!(handle.writable);
    }

    #[rstest]
    #[case::empty(b"".as_slice())]
    #[case::whitespace(b"   \n".as_slice())]
    #[case::not_json(b"not json".as_slice())]
    #[case::unknown_op(br#"{"call_id":1,"call":{"op":"rename"}}"#.as_slice())]
    #[case::missing_call_id(br#"{"call":{"op":"increment","value":1}}"#.as_slice())]
    #[case::missing_argument(br#"{"call_id":1,"call":{"op":"close"}}"#.as_slice())]
    fn rejects_malformed_lines(#[case] line: &[u8]) {
        let result = CallRequest::parse(line);
        assert!(matches!(result, Err(DispatchError::MalformedJsonl { .. })));
    }
}
