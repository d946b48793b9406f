//! Identity types shared by the registry, the lock coordinator, and the
//! transport.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identity of a client, independent of the session it connects on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Wraps a client name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Borrow the client name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

/// Transport-level session token. One connection is one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "session-{}", self.0)
    }
}

/// Per-session call identifier chosen by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(pub u32);

impl fmt::Display for CallId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// A client's reference to one open instance of a node.
///
/// Clients receive a copy and must send it back verbatim; the server matches
/// all five fields against its registry before honouring any call, so a
/// handle from an earlier server epoch or an earlier instance of the same
/// path is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Handle {
    /// Node name the handle was opened on.
    pub path: String,
    /// Identifies this creation of `path`.
    pub instance_number: u64,
    /// Random disambiguator between concurrently open handles.
    pub magic_number: u64,
    /// Server epoch ("master sequence number") at open time.
    pub server_epoch: u64,
    /// Whether the handle was opened with [`OpenMode::WRITE`].
    pub writable: bool,
}

impl fmt::Display for Handle {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "{}#{}/{:016x}@{}",
            self.path, self.instance_number, self.magic_number, self.server_epoch
        )
    }
}

/// Open-mode bit set as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpenMode(u64);

impl OpenMode {
    /// Open for reading.
    pub const READ: Self = Self(0x1);
    /// Open for writing.
    pub const WRITE: Self = Self(0x2);
    /// Create the node as a directory.
    pub const CREATE_DIRECTORY: Self = Self(0x4);
    /// Create the node as a file.
    pub const CREATE_FILE: Self = Self(0x8);

    /// Builds a mode from raw bits. Unknown bits are kept and ignored.
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Raw bit value.
    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Returns `true` when every bit of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `true` when the mode asks for either kind of creation.
    #[must_use]
    pub const fn creates(self) -> bool {
        self.contains(Self::CREATE_FILE) || self.contains(Self::CREATE_DIRECTORY)
    }

    /// Returns `true` when both creation kinds are requested at once.
    #[must_use]
    pub const fn is_conflicting(self) -> bool {
        self.contains(Self::CREATE_FILE) && self.contains(Self::CREATE_DIRECTORY)
    }
}

impl std::ops::BitOr for OpenMode {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_flags_combine() {
        let mode = OpenMode::READ | OpenMode::WRITE | OpenMode::CREATE_FILE;
        assert_eq!(mode.bits(), 0xb);
        assert!(mode.contains(OpenMode::WRITE));
        assert!(mode.creates());
        assert!(!mode.is_conflicting());
    }

    #[test]
    fn both_create_bits_conflict() {
        let mode = OpenMode::CREATE_FILE | OpenMode::CREATE_DIRECTORY;
        assert!(mode.is_conflicting());
    }

    #[test]
    fn handle_round_trips_through_json() {
        let handle = Handle {
            path: "/x".to_owned(),
            instance_number: 3,
            magic_number: 0xdead_beef,
            server_epoch: 9,
            writable: true,
        };
        let json = serde_json::to_string(&handle).expect("serialise");
        assert!(json.contains(r#""instance_number":3"#));
        let back: Handle = serde_json::from_str(&json).expect("deserialise");
        assert_eq!(back, handle);
    }
}
