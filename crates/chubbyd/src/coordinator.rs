//! Lock acquisition protocol with FIFO hand-off.
//!
//! Lock ownership is recorded only in the backing store. The coordinator
//! keeps, per path, the queue of `acquire` calls that found the lock taken
//! and have not been answered yet. A queued call is answered by the `release`
//! that hands the lock over, which is why the queue stores the caller's
//! session and call identifiers rather than a suspended task.
//!
//! A release resets the owner field and then records the oldest waiter as the
//! new owner before answering it, so the store never shows a path as
//! unlocked while callers are queued on it. A newcomer therefore cannot
//! overtake the queue.

use std::collections::{HashMap, VecDeque};

use tracing::{debug, warn};

use crate::handle::{CallId, ClientId, Handle, SessionId};
use crate::session::Reply;
use crate::store::{BackingStore, StoreError};

const COORDINATOR_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::coordinator");

/// One blocked `acquire` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitEntry {
    /// Session that issued the call.
    pub session: SessionId,
    /// Call to answer once the lock is handed over.
    pub call: CallId,
    /// Client to record as owner on hand-off.
    pub client: ClientId,
    /// Instance the caller's handle refers to.
    pub instance_number: u64,
}

/// Result of an `acquire` attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The lock was free and now belongs to the caller.
    Granted,
    /// The lock is held; the call was queued and must not be answered now.
    Queued,
    /// The store rejected the attempt.
    Failed(StoreError),
}

/// A reply owed to a previously queued call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Session to answer.
    pub session: SessionId,
    /// Call to answer.
    pub call: CallId,
    /// Reply payload.
    pub reply: Reply,
}

/// Per-path FIFO queues of pending `acquire` calls.
#[derive(Debug, Default)]
pub struct LockCoordinator {
    queues: HashMap<String, VecDeque<WaitEntry>>,
}

impl LockCoordinator {
    /// Creates a coordinator with no waiters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tries to take the lock; queues the call on contention.
    pub fn acquire(
        &mut self,
        store: &dyn BackingStore,
        handle: &Handle,
        client: &ClientId,
        session: SessionId,
        call: CallId,
    ) -> AcquireOutcome {
        match store.test_and_set_lock_owner(&handle.path, handle.instance_number, client) {
            Ok(true) => {
                self.note_grant(&handle.path);
                AcquireOutcome::Granted
            }
            Ok(false) => {
                let queue = self.queues.entry(handle.path.clone()).or_default();
                queue.push_back(WaitEntry {
                    session,
                    call,
                    client: client.clone(),
                    instance_number: handle.instance_number,
                });
                debug!(
                    target: COORDINATOR_TARGET,
                    path = %handle.path,
                    %client,
                    %session,
                    %call,
                    position = queue.len(),
                    "acquire queued"
                );
                AcquireOutcome::Queued
            }
            Err(error) => AcquireOutcome::Failed(error),
        }
    }

    /// Tries to take the lock without queuing.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn try_acquire(
        &mut self,
        store: &dyn BackingStore,
        handle: &Handle,
        client: &ClientId,
    ) -> Result<bool, StoreError> {
        let granted =
            store.test_and_set_lock_owner(&handle.path, handle.instance_number, client)?;
        if granted {
            self.note_grant(&handle.path);
        }
        Ok(granted)
    }

    /// Releases the lock and hands it to the oldest waiter.
    ///
    /// On success the caller must first answer the releasing call, then send
    /// the returned deliveries. At most one delivery carries a grant; waiters
    /// the store refuses to record are answered with `FS_FAIL` and skipped.
    ///
    /// # Errors
    ///
    /// Returns the store error when the owner field cannot be reset; the
    /// queue is left untouched in that case.
    pub fn release(
        &mut self,
        store: &dyn BackingStore,
        handle: &Handle,
    ) -> Result<Vec<Delivery>, StoreError> {
        store.reset_lock_owner(&handle.path, handle.instance_number)?;

        let mut deliveries = Vec::new();
        let Some(queue) = self.queues.get_mut(&handle.path) else {
            return Ok(deliveries);
        };
        while let Some(waiter) = queue.pop_front() {
            match store.test_and_set_lock_owner(&handle.path, waiter.instance_number, &waiter.client)
            {
                Ok(true) => {
                    debug!(
                        target: COORDINATOR_TARGET,
                        path = %handle.path,
                        client = %waiter.client,
                        session = %waiter.session,
                        call = %waiter.call,
                        remaining = queue.len(),
                        "lock handed off"
                    );
                    deliveries.push(Delivery {
                        session: waiter.session,
                        call: waiter.call,
                        reply: Reply::bool(true),
                    });
                    break;
                }
                Ok(false) => {
                    // Someone outside the queue holds the lock again; the
                    // waiter keeps its place.
                    queue.push_front(waiter);
                    break;
                }
                Err(error) => {
                    warn!(
                        target: COORDINATOR_TARGET,
                        path = %handle.path,
                        session = %waiter.session,
                        call = %waiter.call,
                        %error,
                        "hand-off refused by store"
                    );
                    deliveries.push(Delivery {
                        session: waiter.session,
                        call: waiter.call,
                        reply: Reply::fs_fail(),
                    });
                }
            }
        }
        if queue.is_empty() {
            self.queues.remove(&handle.path);
        }
        Ok(deliveries)
    }

    /// Removes every queued call on `path`, oldest first.
    pub fn drain(&mut self, path: &str) -> Vec<WaitEntry> {
        self.queues
            .remove(path)
            .map(Vec::from)
            .unwrap_or_default()
    }

    /// Removes the queued calls of a departed session, keeping the relative
    /// order of everyone else.
    pub fn cancel_session(&mut self, session: SessionId) -> Vec<WaitEntry> {
        let mut cancelled = Vec::new();
        self.queues.retain(|_, queue| {
            queue.retain(|entry| {
                if entry.session == session {
                    cancelled.push(entry.clone());
                    false
                } else {
                    true
                }
            });
            !queue.is_empty()
        });
        cancelled
    }

    /// Queued calls on `path`, oldest first.
    #[must_use]
    pub fn waiters(&self, path: &str) -> Vec<WaitEntry> {
        self.queues
            .get(path)
            .map(|queue| queue.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of paths with at least one queued call.
    #[must_use]
    pub fn contended_paths(&self) -> usize {
        self.queues.len()
    }

    fn note_grant(&self, path: &str) {
        if let Some(queue) = self.queues.get(path) {
            warn!(
                target: COORDINATOR_TARGET,
                path,
                waiting = queue.len(),
                "lock granted directly while calls are queued"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;
    use crate::store::{MemoryStore, MockBackingStore};

    struct Fixture {
        store: MemoryStore,
        coordinator: LockCoordinator,
        handle: Handle,
    }

    #[fixture]
    fn fixture() -> Fixture {
        let store = MemoryStore::new();
        store.check_and_create("/x", false, 1).expect("create /x");
        Fixture {
            store,
            coordinator: LockCoordinator::new(),
            handle: Handle {
                path: "/x".to_owned(),
                instance_number: 1,
                magic_number: 0,
                server_epoch: 0,
                writable: false,
            },
        }
    }

    fn client(name: &str) -> ClientId {
        ClientId::new(name)
    }

    #[rstest]
    fn uncontended_acquire_is_granted(mut fixture: Fixture) {
        let outcome = fixture.coordinator.acquire(
            &fixture.store,
            &fixture.handle,
            &client("a"),
            SessionId(1),
            CallId(1),
        );
        assert_eq!(outcome, AcquireOutcome::Granted);
        assert_eq!(fixture.store.lock_owner("/x"), Some(client("a")));
        assert_eq!(fixture.coordinator.contended_paths(), 0);
    }

    #[rstest]
    fn contended_acquire_queues_in_order(mut fixture: Fixture) {
        let Fixture {
            store,
            coordinator,
            handle,
        } = &mut fixture;
        coordinator.acquire(store, handle, &client("a"), SessionId(1), CallId(1));
        for (index, name) in ["b", "c"].into_iter().enumerate() {
            let session = SessionId(2 + index as u64);
            let outcome = coordinator.acquire(store, handle, &client(name), session, CallId(9));
            assert_eq!(outcome, AcquireOutcome::Queued);
        }
        let order: Vec<_> = coordinator
            .waiters("/x")
            .into_iter()
            .map(|entry| entry.client)
            .collect();
        assert_eq!(order, vec![client("b"), client("c")]);
    }

    #[rstest]
    fn release_hands_off_to_oldest_waiter(mut fixture: Fixture) {
        let Fixture {
            store,
            coordinator,
            handle,
        } = &mut fixture;
        coordinator.acquire(store, handle, &client("a"), SessionId(1), CallId(1));
        coordinator.acquire(store, handle, &client("b"), SessionId(2), CallId(5));
        coordinator.acquire(store, handle, &client("c"), SessionId(3), CallId(6));

        let deliveries = coordinator.release(store, handle).expect("release");
        assert_eq!(
            deliveries,
            vec![Delivery {
                session: SessionId(2),
                call: CallId(5),
                reply: Reply::bool(true),
            }]
        );
        assert_eq!(store.lock_owner("/x"), Some(client("b")));
        assert_eq!(coordinator.waiters("/x").len(), 1);

        let deliveries = coordinator.release(store, handle).expect("release");
        assert_eq!(deliveries.len(), 1);
        assert_eq!(store.lock_owner("/x"), Some(client("c")));
        assert_eq!(coordinator.contended_paths(), 0);

        assert!(coordinator.release(store, handle).expect("release").is_empty());
        assert_eq!(store.lock_owner("/x"), None);
    }

    #[rstest]
    fn try_acquire_never_queues(mut fixture: Fixture) {
        let Fixture {
            store,
            coordinator,
            handle,
        } = &mut fixture;
        assert_eq!(coordinator.try_acquire(store, handle, &client("a")), Ok(true));
        assert_eq!(coordinator.try_acquire(store, handle, &client("b")), Ok(false));
        assert_eq!(coordinator.contended_paths(), 0);
    }

    #[rstest]
    fn cancel_session_preserves_remaining_order(mut fixture: Fixture) {
        let Fixture {
            store,
            coordinator,
            handle,
        } = &mut fixture;
        coordinator.acquire(store, handle, &client("a"), SessionId(1), CallId(1));
        coordinator.acquire(store, handle, &client("b"), SessionId(2), CallId(1));
        coordinator.acquire(store, handle, &client("c"), SessionId(3), CallId(1));
        coordinator.acquire(store, handle, &client("b"), SessionId(2), CallId(2));
        coordinator.acquire(store, handle, &client("d"), SessionId(4), CallId(1));

        let cancelled = coordinator.cancel_session(SessionId(2));
        assert_eq!(cancelled.len(), 2);
        let sessions: Vec<_> = coordinator
            .waiters("/x")
            .into_iter()
            .map(|entry| entry.session)
            .collect();
        assert_eq!(sessions, vec![SessionId(3), SessionId(4)]);
    }

    #[rstest]
    fn drain_empties_the_queue(mut fixture: Fixture) {
        let Fixture {
            store,
            coordinator,
            handle,
        } = &mut fixture;
        coordinator.acquire(store, handle, &client("a"), SessionId(1), CallId(1));
        coordinator.acquire(store, handle, &client("b"), SessionId(2), CallId(1));
        assert_eq!(coordinator.drain("/x").len(), 1);
        assert!(coordinator.drain("/x").is_empty());
        assert_eq!(coordinator.contended_paths(), 0);
    }

    #[rstest]
    fn failed_reset_keeps_waiters(fixture: Fixture) {
        let mut store = MockBackingStore::new();
        store
            .expect_test_and_set_lock_owner()
            .returning(|_, _, _| Ok(false));
        store.expect_reset_lock_owner().returning(|path, _| {
            Err(StoreError::NotFound {
                path: path.to_owned(),
            })
        });
        let mut coordinator = LockCoordinator::new();
        coordinator.acquire(&store, &fixture.handle, &client("b"), SessionId(2), CallId(1));

        assert!(coordinator.release(&store, &fixture.handle).is_err());
        assert_eq!(coordinator.waiters("/x").len(), 1);
    }

    #[rstest]
    fn refused_hand_off_moves_to_next_waiter(fixture: Fixture) {
        let mut store = MockBackingStore::new();
        store.expect_reset_lock_owner().returning(|_, _| Ok(()));
        let mut calls = 0;
        store
            .expect_test_and_set_lock_owner()
            .returning(move |path, _, _| {
                calls += 1;
                match calls {
                    1 | 2 => Ok(false),
                    3 => Err(StoreError::Unavailable {
                        message: format!("{path} offline"),
                    }),
                    _ => Ok(true),
                }
            });
        let mut coordinator = LockCoordinator::new();
        coordinator.acquire(&store, &fixture.handle, &client("b"), SessionId(2), CallId(1));
        coordinator.acquire(&store, &fixture.handle, &client("c"), SessionId(3), CallId(1));

        let deliveries = coordinator
            .release(&store, &fixture.handle)
            .expect("release");
        let replies: Vec<_> = deliveries
            .iter()
            .map(|delivery| (delivery.session, delivery.reply.clone()))
            .collect();
        assert_eq!(
            replies,
            vec![
                (SessionId(2), Reply::fs_fail()),
                (SessionId(3), Reply::bool(true)),
            ]
        );
        assert_eq!(coordinator.contended_paths(), 0);
    }
}
