//! Validation of node names.
//!
//! A valid name is absolute, slash-separated, and uses only ASCII letters,
//! digits, and underscores inside components: `/ls/cell/lock_1`. Empty
//! components (`//`), a trailing slash, and the bare root are rejected.

/// Returns `true` when `path` is a well-formed node name.
#[must_use]
pub fn is_valid_path(path: &str) -> bool {
    path.starts_with('/')
        && !path.ends_with('/')
        && path.bytes().all(is_name_byte)
        && !path.contains("//")
}

const fn is_name_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'/'
}
