//! Behavioural suites for the lock server.

mod bootstrap_behaviour;
pub(crate) mod support;
