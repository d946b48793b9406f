//! Shared access to the lock service.
//!
//! Every session thread funnels its calls through one mutex, so handlers run
//! one at a time and never observe a half-applied operation.

use std::sync::{Arc, Mutex};

use crate::service::ChubbyService;
use crate::store::MemoryStore;

use super::errors::DispatchError;

/// Cloneable handle on the service shared by all sessions.
#[derive(Clone, Debug)]
pub(crate) struct ServiceManager {
    inner: Arc<Mutex<ChubbyService<MemoryStore>>>,
}

impl ServiceManager {
    pub(crate) fn new(service: ChubbyService<MemoryStore>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(service)),
        }
    }

    /// Runs `f` with exclusive access to the service.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::Internal` if the service lock is poisoned.
    pub(crate) fn with_service<F, R>(&self, f: F) -> Result<R, DispatchError>
    where
        F: FnOnce(&mut ChubbyService<MemoryStore>) -> R,
    {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| DispatchError::internal("service lock poisoned"))?;
        Ok(f(&mut guard))
    }
}
