//! Registry of open handles.
//!
//! Handles live in an arena keyed by [`HandleId`]. Two indexes point into the
//! arena: one by node path (every open handle on a node, with its owner) and
//! one by client (every handle a client holds). Both indexes are updated in
//! the same `&mut self` call, so they always describe the same set; empty
//! buckets are removed eagerly.
//!
//! [`HandleRegistry::lookup`] is the only way to turn a client-supplied
//! handle back into a live entry. It compares all five identity fields and
//! only searches the caller's own handles, so a forged or stale handle, or a
//! handle borrowed from another client, is never honoured.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use thiserror::Error;
use tracing::trace;

use crate::handle::{ClientId, Handle};
use crate::store::{BackingStore, StoreError};

const REGISTRY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::registry");

/// Arena key of a live handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandleId(u64);

/// Process-wide values stamped into every handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryParams {
    /// Server epoch for this process lifetime.
    pub server_epoch: u64,
    /// Last instance number already used; creation starts above it.
    pub first_instance_number: u64,
}

/// Errors returned by registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The supplied handle does not match any handle held by the client.
    #[error("no matching handle for client {client}")]
    NotFound {
        /// Caller the lookup was scoped to.
        client: ClientId,
    },
    /// Every instance number has been handed out.
    #[error("instance numbers exhausted after {last}")]
    InstancesExhausted {
        /// Last instance number issued.
        last: u64,
    },
    /// The backing store refused the create or open.
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug)]
struct Slot {
    client: ClientId,
    handle: Handle,
}

/// Owner of every live handle and its two indexes.
pub struct HandleRegistry {
    slots: HashMap<HandleId, Slot>,
    by_path: BTreeMap<String, Vec<HandleId>>,
    by_client: HashMap<ClientId, Vec<HandleId>>,
    next_id: u64,
    instance_number: u64,
    server_epoch: u64,
    magic: Box<dyn RngCore + Send>,
}

impl fmt::Debug for HandleRegistry {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("HandleRegistry")
            .field("handles", &self.slots.len())
            .field("paths", &self.by_path.len())
            .field("clients", &self.by_client.len())
            .field("instance_number", &self.instance_number)
            .field("server_epoch", &self.server_epoch)
            .finish_non_exhaustive()
    }
}

impl HandleRegistry {
    /// Creates a registry drawing magic numbers from OS entropy.
    #[must_use]
    pub fn new(params: RegistryParams) -> Self {
        Self::with_rng(params, StdRng::from_entropy())
    }

    /// Creates a registry with an explicit magic-number source.
    #[must_use]
    pub fn with_rng(params: RegistryParams, rng: impl RngCore + Send + 'static) -> Self {
        Self {
            slots: HashMap::new(),
            by_path: BTreeMap::new(),
            by_client: HashMap::new(),
            next_id: 0,
            instance_number: params.first_instance_number,
            server_epoch: params.server_epoch,
            magic: Box::new(rng),
        }
    }

    /// Server epoch stamped into handles.
    #[must_use]
    pub const fn server_epoch(&self) -> u64 {
        self.server_epoch
    }

    /// Number of live handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` when no handle is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Creates `path` in the store and opens a handle on the new instance.
    ///
    /// The instance counter advances even when the store refuses, so a
    /// number is never reused.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Store`] when the node cannot be created, or
    /// [`RegistryError::InstancesExhausted`] once the counter is at its maximum.
    pub fn create(
        &mut self,
        store: &dyn BackingStore,
        path: &str,
        is_directory: bool,
        writable: bool,
        client: &ClientId,
    ) -> Result<Handle, RegistryError> {
        let instance_number = self
            .instance_number
            .checked_add(1)
            .ok_or(RegistryError::InstancesExhausted {
                last: self.instance_number,
            })?;
        self.instance_number = instance_number;
        store.check_and_create(path, is_directory, instance_number)?;
        Ok(self.insert(path, instance_number, writable, client))
    }

    /// Opens a handle on the current instance of an existing node.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Store`] when the node does not exist.
    pub fn open(
        &mut self,
        store: &dyn BackingStore,
        path: &str,
        writable: bool,
        client: &ClientId,
    ) -> Result<Handle, RegistryError> {
        let instance_number = store.check_and_open(path)?;
        Ok(self.insert(path, instance_number, writable, client))
    }

    /// Finds the caller's live handle matching `candidate` exactly.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] when no handle of `client` has the
    /// same five identity fields.
    pub fn lookup(&self, client: &ClientId, candidate: &Handle) -> Result<HandleId, RegistryError> {
        self.by_client
            .get(client)
            .and_then(|ids| {
                ids.iter()
                    .copied()
                    .find(|id| self.slots.get(id).is_some_and(|slot| slot.handle == *candidate))
            })
            .ok_or_else(|| RegistryError::NotFound {
                client: client.clone(),
            })
    }

    /// Borrows the handle stored under `id`.
    #[must_use]
    pub fn get(&self, id: HandleId) -> Option<&Handle> {
        self.slots.get(&id).map(|slot| &slot.handle)
    }

    /// Removes one handle from both indexes and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] when `id` is not a live handle of
    /// `client`.
    pub fn close(&mut self, client: &ClientId, id: HandleId) -> Result<Handle, RegistryError> {
        let owned = self.slots.get(&id).is_some_and(|slot| slot.client == *client);
        let slot = owned
            .then(|| self.slots.remove(&id))
            .flatten()
            .ok_or_else(|| RegistryError::NotFound {
                client: client.clone(),
            })?;
        prune_path(&mut self.by_path, &slot.handle.path, id);
        prune_client(&mut self.by_client, &slot.client, id);
        self.trace_state("close");
        Ok(slot.handle)
    }

    /// Removes every handle on `path`, returning each with its owner.
    pub fn delete_all(&mut self, path: &str) -> Vec<(ClientId, Handle)> {
        let ids = self.by_path.remove(path).unwrap_or_default();
        let removed = ids
            .into_iter()
            .filter_map(|id| {
                let slot = self.slots.remove(&id)?;
                prune_client(&mut self.by_client, &slot.client, id);
                Some((slot.client, slot.handle))
            })
            .collect();
        self.trace_state("delete_all");
        removed
    }

    /// Every live handle on `path` with its owner, in open order.
    #[must_use]
    pub fn handles_on(&self, path: &str) -> Vec<(ClientId, Handle)> {
        self.by_path
            .get(path)
            .into_iter()
            .flatten()
            .filter_map(|id| self.slots.get(id))
            .map(|slot| (slot.client.clone(), slot.handle.clone()))
            .collect()
    }

    /// Every live handle held by `client`, in open order.
    #[must_use]
    pub fn handles_of(&self, client: &ClientId) -> Vec<Handle> {
        self.by_client
            .get(client)
            .into_iter()
            .flatten()
            .filter_map(|id| self.slots.get(id))
            .map(|slot| slot.handle.clone())
            .collect()
    }

    /// Checks that both indexes describe exactly the arena's contents.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let path_entries: usize = self.by_path.values().map(Vec::len).sum();
        let client_entries: usize = self.by_client.values().map(Vec::len).sum();
        let no_empty_buckets = self.by_path.values().all(|ids| !ids.is_empty())
            && self.by_client.values().all(|ids| !ids.is_empty());
        let paths_agree = self.by_path.iter().all(|(path, ids)| {
            ids.iter()
                .all(|id| self.slots.get(id).is_some_and(|slot| slot.handle.path == *path))
        });
        let clients_agree = self.by_client.iter().all(|(client, ids)| {
            ids.iter()
                .all(|id| self.slots.get(id).is_some_and(|slot| slot.client == *client))
        });
        no_empty_buckets
            && paths_agree
            && clients_agree
            && path_entries == self.slots.len()
            && client_entries == self.slots.len()
    }

    fn insert(
        &mut self,
        path: &str,
        instance_number: u64,
        writable: bool,
        client: &ClientId,
    ) -> Handle {
        let magic_number = self.fresh_magic(path, instance_number, writable);
        let handle = Handle {
            path: path.to_owned(),
            instance_number,
            magic_number,
            server_epoch: self.server_epoch,
            writable,
        };
        let id = HandleId(self.next_id);
        self.next_id += 1;
        self.slots.insert(
            id,
            Slot {
                client: client.clone(),
                handle: handle.clone(),
            },
        );
        self.by_path.entry(path.to_owned()).or_default().push(id);
        self.by_client.entry(client.clone()).or_default().push(id);
        self.trace_state("insert");
        handle
    }

    /// Draws a magic number that no live handle with the same remaining
    /// identity fields already uses.
    fn fresh_magic(&mut self, path: &str, instance_number: u64, writable: bool) -> u64 {
        loop {
            let candidate = self.magic.next_u64();
            let taken = self.by_path.get(path).into_iter().flatten().any(|id| {
                self.slots.get(id).is_some_and(|slot| {
                    slot.handle.magic_number == candidate
                        && slot.handle.instance_number == instance_number
                        && slot.handle.writable == writable
                })
            });
            if !taken {
                return candidate;
            }
        }
    }

    fn trace_state(&self, operation: &'static str) {
        trace!(
            target: REGISTRY_TARGET,
            operation,
            handles = self.slots.len(),
            paths = self.by_path.len(),
            clients = self.by_client.len(),
            "registry updated"
        );
    }
}

fn prune_path(index: &mut BTreeMap<String, Vec<HandleId>>, path: &str, id: HandleId) {
    if let Some(ids) = index.get_mut(path) {
        ids.retain(|candidate| *candidate != id);
        if ids.is_empty() {
            index.remove(path);
        }
    }
}

fn prune_client(index: &mut HashMap<ClientId, Vec<HandleId>>, client: &ClientId, id: HandleId) {
    if let Some(ids) = index.get_mut(client) {
        ids.retain(|candidate| *candidate != id);
        if ids.is_empty() {
            index.remove(client);
        }
    }
}
