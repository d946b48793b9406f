//! Error types for request parsing and dispatch.

use std::io;

use thiserror::Error;

/// Errors surfaced while reading, parsing, or dispatching session requests.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Request line could not be parsed as a call.
    #[error("malformed JSONL: {message}")]
    MalformedJsonl {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    /// Request exceeds the maximum allowed size.
    #[error("request too large: more than {max_size} bytes without a newline")]
    RequestTooLarge { max_size: usize },

    /// IO error during read or write.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Message serialisation failed.
    #[error("failed to serialise message: {0}")]
    SerializeMessage(#[from] serde_json::Error),

    /// Internal error (for example a poisoned lock).
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl DispatchError {
    /// Whether the session can keep reading after this error.
    ///
    /// A bad line is skipped; an oversized line leaves the stream mid-request
    /// and IO failures leave nothing to read.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::MalformedJsonl { .. } | Self::Internal { .. })
    }

    /// Creates a malformed JSONL error from a serde error.
    pub fn from_json_error(source: serde_json::Error) -> Self {
        Self::MalformedJsonl {
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Creates a malformed JSONL error with a custom message.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedJsonl {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a request too large error.
    pub fn request_too_large(max_size: usize) -> Self {
        Self::RequestTooLarge { max_size }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}
