//! Structured health reporting for server lifecycle events.

use std::sync::Arc;

use chubby_config::{Config, SocketEndpoint};

use crate::bootstrap::BootstrapError;
use crate::process::LaunchError;

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Observer trait used to surface lifecycle events to telemetry sinks.
pub trait HealthReporter: Send + Sync {
    /// Invoked before configuration loading begins.
    fn bootstrap_starting(&self);

    /// Invoked after bootstrap completes successfully.
    fn bootstrap_succeeded(&self, config: &Config, server_epoch: u64);

    /// Invoked when bootstrap fails.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Invoked once the listener accepts sessions.
    fn listener_ready(&self, endpoint: &SocketEndpoint);

    /// Invoked when shutdown begins.
    fn shutdown_started(&self);

    /// Invoked when the server stops with an error after bootstrap.
    fn launch_failed(&self, error: &LaunchError);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter + ?Sized,
{
    fn bootstrap_starting(&self) {
        (**self).bootstrap_starting();
    }

    fn bootstrap_succeeded(&self, config: &Config, server_epoch: u64) {
        (**self).bootstrap_succeeded(config, server_epoch);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn listener_ready(&self, endpoint: &SocketEndpoint) {
        (**self).listener_ready(endpoint);
    }

    fn shutdown_started(&self) {
        (**self).shutdown_started();
    }

    fn launch_failed(&self, error: &LaunchError) {
        (**self).launch_failed(error);
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn bootstrap_starting(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_starting",
            "starting lock server bootstrap"
        );
    }

    fn bootstrap_succeeded(&self, config: &Config, server_epoch: u64) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_succeeded",
            socket = %config.daemon_socket(),
            log_filter = %config.log_filter(),
            log_format = %config.log_format(),
            server_epoch,
            first_instance_number = config.first_instance_number(),
            "lock server bootstrap completed"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "bootstrap_failed",
            error = %error,
            "lock server bootstrap failed"
        );
    }

    fn listener_ready(&self, endpoint: &SocketEndpoint) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "listener_ready",
            socket = %endpoint,
            "accepting sessions"
        );
    }

    fn shutdown_started(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "shutdown_started",
            "lock server shutting down"
        );
    }

    fn launch_failed(&self, error: &LaunchError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "launch_failed",
            error = %error,
            "lock server stopped with an error"
        );
    }
}
