//! In-process [`BackingStore`] used by the daemon and the test suites.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use super::{BackingStore, Metadata, StoreError};
use crate::handle::ClientId;

const STORE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::store");

#[derive(Debug)]
struct Node {
    is_directory: bool,
    instance_number: u64,
    content: String,
    lock_owner: Option<ClientId>,
    content_generation: u64,
    lock_generation: u64,
}

impl Node {
    fn metadata(&self) -> Metadata {
        Metadata {
            instance_number: self.instance_number,
            content_generation: self.content_generation,
            lock_generation: self.lock_generation,
            is_directory: self.is_directory,
            length: self.content.len() as u64,
        }
    }
}

/// Map-backed store. All state lives behind a single mutex, which gives every
/// operation the per-path atomicity the core expects.
#[derive(Debug, Default)]
pub struct MemoryStore {
    nodes: Mutex<BTreeMap<String, Node>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current lock owner of `path`, if the node exists and is locked.
    #[must_use]
    pub fn lock_owner(&self, path: &str) -> Option<ClientId> {
        self.nodes()
            .ok()
            .and_then(|nodes| nodes.get(path).and_then(|node| node.lock_owner.clone()))
    }

    /// Returns `true` when a node exists at `path`.
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.nodes()
            .map(|nodes| nodes.contains_key(path))
            .unwrap_or(false)
    }

    fn nodes(&self) -> Result<MutexGuard<'_, BTreeMap<String, Node>>, StoreError> {
        self.nodes.lock().map_err(|_| StoreError::Unavailable {
            message: "store mutex poisoned".to_owned(),
        })
    }
}

fn node_at<'a>(
    nodes: &'a mut BTreeMap<String, Node>,
    path: &str,
    instance_number: u64,
) -> Result<&'a mut Node, StoreError> {
    let node = nodes.get_mut(path).ok_or_else(|| StoreError::NotFound {
        path: path.to_owned(),
    })?;
    if node.instance_number != instance_number {
        return Err(StoreError::InstanceMismatch {
            path: path.to_owned(),
            expected: instance_number,
            actual: node.instance_number,
        });
    }
    Ok(node)
}

fn has_children(nodes: &BTreeMap<String, Node>, path: &str) -> bool {
    let prefix = format!("{path}/");
    nodes
        .range(prefix.clone()..)
        .next()
        .is_some_and(|(name, _)| name.starts_with(&prefix))
}

impl BackingStore for MemoryStore {
    fn check_and_create(
        &self,
        path: &str,
        is_directory: bool,
        instance_number: u64,
    ) -> Result<(), StoreError> {
        let mut nodes = self.nodes()?;
        if nodes.contains_key(path) {
            return Err(StoreError::AlreadyExists {
                path: path.to_owned(),
            });
        }
        nodes.insert(
            path.to_owned(),
            Node {
                is_directory,
                instance_number,
                content: String::new(),
                lock_owner: None,
                content_generation: 0,
                lock_generation: 0,
            },
        );
        debug!(target: STORE_TARGET, path, instance_number, is_directory, "node created");
        Ok(())
    }

    fn check_and_open(&self, path: &str) -> Result<u64, StoreError> {
        let nodes = self.nodes()?;
        nodes
            .get(path)
            .map(|node| node.instance_number)
            .ok_or_else(|| StoreError::NotFound {
                path: path.to_owned(),
            })
    }

    fn check_and_delete(&self, path: &str, instance_number: u64) -> Result<(), StoreError> {
        let mut nodes = self.nodes()?;
        node_at(&mut nodes, path, instance_number)?;
        if has_children(&nodes, path) {
            return Err(StoreError::HasChildren {
                path: path.to_owned(),
            });
        }
        nodes.remove(path);
        debug!(target: STORE_TARGET, path, instance_number, "node deleted");
        Ok(())
    }

    fn check_and_read(
        &self,
        path: &str,
        instance_number: u64,
    ) -> Result<(String, Metadata), StoreError> {
        let mut nodes = self.nodes()?;
        let node = node_at(&mut nodes, path, instance_number)?;
        Ok((node.content.clone(), node.metadata()))
    }

    fn check_and_update(
        &self,
        path: &str,
        instance_number: u64,
        content: &str,
    ) -> Result<(), StoreError> {
        let mut nodes = self.nodes()?;
        let node = node_at(&mut nodes, path, instance_number)?;
        if node.is_directory {
            return Err(StoreError::NotAFile {
                path: path.to_owned(),
            });
        }
        content.clone_into(&mut node.content);
        node.content_generation += 1;
        Ok(())
    }

    fn test_and_set_lock_owner(
        &self,
        path: &str,
        instance_number: u64,
        client: &ClientId,
    ) -> Result<bool, StoreError> {
        let mut nodes = self.nodes()?;
        let node = node_at(&mut nodes, path, instance_number)?;
        if node.lock_owner.is_some() {
            return Ok(false);
        }
        node.lock_owner = Some(client.clone());
        node.lock_generation += 1;
        Ok(true)
    }

    fn reset_lock_owner(&self, path: &str, instance_number: u64) -> Result<(), StoreError> {
        let mut nodes = self.nodes()?;
        let node = node_at(&mut nodes, path, instance_number)?;
        node.lock_owner = None;
        Ok(())
    }
}
