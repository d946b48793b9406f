//! Backing store contract consumed by the coordination core.
//!
//! The store owns node contents, metadata, and the authoritative lock-owner
//! field. Every operation must be atomic with respect to concurrent calls on
//! the same path; the core relies on [`BackingStore::test_and_set_lock_owner`]
//! as the only arbiter of lock ownership.

mod memory;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::handle::ClientId;

pub use self::memory::MemoryStore;

/// Metadata returned alongside node contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Instance the metadata belongs to.
    pub instance_number: u64,
    /// Incremented on every successful content update.
    pub content_generation: u64,
    /// Incremented every time the lock is taken.
    pub lock_generation: u64,
    /// Whether the node is a directory.
    pub is_directory: bool,
    /// Content length in bytes.
    pub length: u64,
}

/// Failures reported by a [`BackingStore`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// No node exists at the path.
    #[error("no node at {path}")]
    NotFound {
        /// Requested path.
        path: String,
    },
    /// A node already exists at the path.
    #[error("node {path} already exists")]
    AlreadyExists {
        /// Requested path.
        path: String,
    },
    /// The node was deleted and recreated since the handle was issued.
    #[error("node {path} is instance {actual}, not {expected}")]
    InstanceMismatch {
        /// Requested path.
        path: String,
        /// Instance named by the caller.
        expected: u64,
        /// Instance currently stored.
        actual: u64,
    },
    /// Contents were written to a directory.
    #[error("node {path} is a directory")]
    NotAFile {
        /// Requested path.
        path: String,
    },
    /// A directory with children cannot be deleted.
    #[error("directory {path} is not empty")]
    HasChildren {
        /// Requested path.
        path: String,
    },
    /// The store itself is unusable.
    #[error("store unavailable: {message}")]
    Unavailable {
        /// Human-readable reason.
        message: String,
    },
}

/// Atomic per-path operations provided by the durable store.
#[cfg_attr(test, mockall::automock)]
pub trait BackingStore: Send + Sync {
    /// Creates `path` with the given instance number, failing if it exists.
    fn check_and_create(
        &self,
        path: &str,
        is_directory: bool,
        instance_number: u64,
    ) -> Result<(), StoreError>;

    /// Returns the current instance number of `path`.
    fn check_and_open(&self, path: &str) -> Result<u64, StoreError>;

    /// Deletes `path` if it is still at `instance_number`.
    fn check_and_delete(&self, path: &str, instance_number: u64) -> Result<(), StoreError>;

    /// Reads contents and metadata of `path` at `instance_number`.
    fn check_and_read(
        &self,
        path: &str,
        instance_number: u64,
    ) -> Result<(String, Metadata), StoreError>;

    /// Replaces the contents of `path` at `instance_number`.
    fn check_and_update(
        &self,
        path: &str,
        instance_number: u64,
        content: &str,
    ) -> Result<(), StoreError>;

    /// Records `client` as lock owner if the node is unlocked.
    ///
    /// Returns `Ok(false)` when another owner is already recorded.
    fn test_and_set_lock_owner(
        &self,
        path: &str,
        instance_number: u64,
        client: &ClientId,
    ) -> Result<bool, StoreError>;

    /// Clears the lock owner of `path`.
    fn reset_lock_owner(&self, path: &str, instance_number: u64) -> Result<(), StoreError>;
}
