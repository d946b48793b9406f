//! Call handlers for the lock service.
//!
//! Every handler follows the same sequence: resolve the caller, validate the
//! arguments or the supplied handle, perform one store operation, update the
//! registry or the lock queues, and answer through the [`Transport`]. Each
//! call is answered exactly once. The only exception to answering before
//! returning is a contended `acquire`, which is answered later by the
//! `release` that hands the lock over.

use tracing::{debug, info, warn};

use crate::coordinator::{AcquireOutcome, LockCoordinator};
use crate::handle::{CallId, ClientId, Handle, OpenMode, SessionId};
use crate::path::is_valid_path;
use crate::registry::{HandleId, HandleRegistry, RegistryParams};
use crate::session::{ContentsAndStat, Event, Reply, ReplyValue, Transport};
use crate::store::BackingStore;

const SERVICE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::service");

/// The coordination core: store, handle registry, and lock queues.
///
/// Callers serialise access (see `ServiceManager`); no handler blocks.
#[derive(Debug)]
pub struct ChubbyService<S> {
    store: S,
    registry: HandleRegistry,
    coordinator: LockCoordinator,
}

impl<S> ChubbyService<S>
where
    S: BackingStore,
{
    /// Builds a service over `store` with a fresh registry.
    pub fn new(store: S, params: RegistryParams) -> Self {
        Self::with_registry(store, HandleRegistry::new(params))
    }

    /// Builds a service over `store` with a prepared registry.
    pub fn with_registry(store: S, registry: HandleRegistry) -> Self {
        Self {
            store,
            registry,
            coordinator: LockCoordinator::new(),
        }
    }

    /// Borrows the backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Borrows the handle registry.
    pub fn registry(&self) -> &HandleRegistry {
        &self.registry
    }

    /// Borrows the lock coordinator.
    pub fn coordinator(&self) -> &LockCoordinator {
        &self.coordinator
    }

    /// Opens, or creates and opens, the node at `path`.
    pub fn open(
        &mut self,
        transport: &dyn Transport,
        session: SessionId,
        call: CallId,
        path: &str,
        mode: OpenMode,
    ) {
        let client = transport.resolve_client_id(session);
        debug!(target: SERVICE_TARGET, %client, path, mode = mode.bits(), "open");

        if !is_valid_path(path) || mode.is_conflicting() {
            transport.reply(session, call, Reply::bad_arg());
            return;
        }

        let writable = mode.contains(OpenMode::WRITE);
        let result = if mode.creates() {
            let is_directory = mode.contains(OpenMode::CREATE_DIRECTORY);
            self.registry
                .create(&self.store, path, is_directory, writable, &client)
        } else {
            self.registry.open(&self.store, path, writable, &client)
        };

        let reply = match result {
            Ok(handle) => Reply::Ok(ReplyValue::Handle(handle)),
            Err(error) => {
                debug!(target: SERVICE_TARGET, %client, path, %error, "open failed");
                Reply::fs_fail()
            }
        };
        transport.reply(session, call, reply);
    }

    /// Closes a handle. Locks held through it are unaffected.
    pub fn close(
        &mut self,
        transport: &dyn Transport,
        session: SessionId,
        call: CallId,
        handle: &Handle,
    ) {
        let client = transport.resolve_client_id(session);
        let Some(id) = self.authenticate(transport, session, call, &client, handle) else {
            return;
        };
        let reply = match self.registry.close(&client, id) {
            Ok(_) => Reply::bool(true),
            Err(_) => Reply::bad_arg(),
        };
        transport.reply(session, call, reply);
    }

    /// Deletes the node behind `handle` and invalidates every handle on it.
    ///
    /// Queued `acquire` calls on the node are answered with `BAD_ARG` and
    /// every affected client is notified with a `file_deleted` event.
    pub fn delete(
        &mut self,
        transport: &dyn Transport,
        session: SessionId,
        call: CallId,
        handle: &Handle,
    ) {
        let client = transport.resolve_client_id(session);
        if self
            .authenticate(transport, session, call, &client, handle)
            .is_none()
        {
            return;
        }

        if let Err(error) = self
            .store
            .check_and_delete(&handle.path, handle.instance_number)
        {
            debug!(target: SERVICE_TARGET, %client, path = %handle.path, %error, "delete refused");
            transport.reply(session, call, Reply::bool(false));
            return;
        }

        let invalidated = self.registry.delete_all(&handle.path);
        let stranded = self.coordinator.drain(&handle.path);
        info!(
            target: SERVICE_TARGET,
            %client,
            path = %handle.path,
            invalidated = invalidated.len(),
            stranded = stranded.len(),
            "node deleted"
        );

        transport.reply(session, call, Reply::bool(true));
        for waiter in stranded {
            transport.reply(waiter.session, waiter.call, Reply::bad_arg());
        }
        let mut owners: Vec<ClientId> = invalidated.into_iter().map(|(owner, _)| owner).collect();
        owners.sort();
        owners.dedup();
        for owner in owners {
            for target in transport.sessions_of(&owner) {
                transport.send_event(target, Event::file_deleted(handle.path.clone()));
            }
        }
    }

    /// Reads contents and metadata.
    pub fn get_contents_and_stat(
        &mut self,
        transport: &dyn Transport,
        session: SessionId,
        call: CallId,
        handle: &Handle,
    ) {
        let client = transport.resolve_client_id(session);
        if self
            .authenticate(transport, session, call, &client, handle)
            .is_none()
        {
            return;
        }
        let reply = match self
            .store
            .check_and_read(&handle.path, handle.instance_number)
        {
            Ok((content, stat)) => {
                Reply::Ok(ReplyValue::ContentsAndStat(ContentsAndStat { content, stat }))
            }
            Err(error) => {
                debug!(target: SERVICE_TARGET, %client, path = %handle.path, %error, "read failed");
                Reply::fs_fail()
            }
        };
        transport.reply(session, call, reply);
    }

    /// Replaces the contents of a node.
    pub fn set_contents(
        &mut self,
        transport: &dyn Transport,
        session: SessionId,
        call: CallId,
        handle: &Handle,
        content: &str,
    ) {
        let client = transport.resolve_client_id(session);
        if self
            .authenticate(transport, session, call, &client, handle)
            .is_none()
        {
            return;
        }
        let reply = match self
            .store
            .check_and_update(&handle.path, handle.instance_number, content)
        {
            Ok(()) => Reply::bool(true),
            Err(error) => {
                debug!(target: SERVICE_TARGET, %client, path = %handle.path, %error, "update failed");
                Reply::fs_fail()
            }
        };
        transport.reply(session, call, reply);
    }

    /// Takes the lock, or queues the call until it is handed over.
    pub fn acquire(
        &mut self,
        transport: &dyn Transport,
        session: SessionId,
        call: CallId,
        handle: &Handle,
    ) {
        let client = transport.resolve_client_id(session);
        if self
            .authenticate(transport, session, call, &client, handle)
            .is_none()
        {
            return;
        }
        match self
            .coordinator
            .acquire(&self.store, handle, &client, session, call)
        {
            AcquireOutcome::Granted => transport.reply(session, call, Reply::bool(true)),
            AcquireOutcome::Queued => {}
            AcquireOutcome::Failed(error) => {
                debug!(target: SERVICE_TARGET, %client, path = %handle.path, %error, "acquire failed");
                transport.reply(session, call, Reply::fs_fail());
            }
        }
    }

    /// Takes the lock if it is free; answers `false` otherwise.
    pub fn try_acquire(
        &mut self,
        transport: &dyn Transport,
        session: SessionId,
        call: CallId,
        handle: &Handle,
    ) {
        let client = transport.resolve_client_id(session);
        if self
            .authenticate(transport, session, call, &client, handle)
            .is_none()
        {
            return;
        }
        let reply = match self.coordinator.try_acquire(&self.store, handle, &client) {
            Ok(granted) => Reply::bool(granted),
            Err(error) => {
                debug!(target: SERVICE_TARGET, %client, path = %handle.path, %error, "try_acquire failed");
                Reply::fs_fail()
            }
        };
        transport.reply(session, call, reply);
    }

    /// Releases the lock and answers the next queued `acquire`, if any.
    pub fn release(
        &mut self,
        transport: &dyn Transport,
        session: SessionId,
        call: CallId,
        handle: &Handle,
    ) {
        let client = transport.resolve_client_id(session);
        if self
            .authenticate(transport, session, call, &client, handle)
            .is_none()
        {
            return;
        }
        match self.coordinator.release(&self.store, handle) {
            Ok(deliveries) => {
                transport.reply(session, call, Reply::bool(true));
                for delivery in deliveries {
                    transport.reply(delivery.session, delivery.call, delivery.reply);
                }
            }
            Err(error) => {
                debug!(target: SERVICE_TARGET, %client, path = %handle.path, %error, "release failed");
                transport.reply(session, call, Reply::fs_fail());
            }
        }
    }

    /// Example call: replies `value + 1`, bracketed by two events.
    pub fn increment(
        &mut self,
        transport: &dyn Transport,
        session: SessionId,
        call: CallId,
        value: i64,
    ) {
        transport.send_event(session, Event::nop("inc"));
        transport.reply(session, call, Reply::Ok(ReplyValue::Int(value.wrapping_add(1))));
        transport.send_event(session, Event::nop("inc done"));
    }

    /// Example call: replies `value - 1`, bracketed by two events.
    pub fn decrement(
        &mut self,
        transport: &dyn Transport,
        session: SessionId,
        call: CallId,
        value: i64,
    ) {
        transport.send_event(session, Event::nop("dec"));
        transport.reply(session, call, Reply::Ok(ReplyValue::Int(value.wrapping_sub(1))));
        transport.send_event(session, Event::nop("dec done"));
    }

    /// Forgets the queued `acquire` calls of a session that went away.
    pub fn session_closed(&mut self, session: SessionId) {
        let cancelled = self.coordinator.cancel_session(session);
        if !cancelled.is_empty() {
            info!(
                target: SERVICE_TARGET,
                %session,
                cancelled = cancelled.len(),
                "dropped queued acquires of closed session"
            );
        }
    }

    /// Looks up the caller's handle, answering `BAD_ARG` when it is unknown.
    fn authenticate(
        &self,
        transport: &dyn Transport,
        session: SessionId,
        call: CallId,
        client: &ClientId,
        handle: &Handle,
    ) -> Option<HandleId> {
        match self.registry.lookup(client, handle) {
            Ok(id) => Some(id),
            Err(_) => {
                warn!(
                    target: SERVICE_TARGET,
                    %client,
                    %session,
                    %call,
                    %handle,
                    "rejected unknown handle"
                );
                transport.reply(session, call, Reply::bad_arg());
                None
            }
        }
    }
}
