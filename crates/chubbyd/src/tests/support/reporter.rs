//! Test double for [`HealthReporter`] that records lifecycle events.

use std::sync::Mutex;

use chubby_config::{Config, SocketEndpoint};

use crate::bootstrap::BootstrapError;
use crate::health::HealthReporter;
use crate::process::LaunchError;

/// Lifecycle events observed during a test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    BootstrapStarting,
    BootstrapSucceeded { server_epoch: u64 },
    BootstrapFailed(String),
    ListenerReady(String),
    ShutdownStarted,
    LaunchFailed(String),
}

/// Records health events for assertions.
#[derive(Debug, Default)]
pub struct RecordingHealthReporter {
    events: Mutex<Vec<HealthEvent>>,
}

impl RecordingHealthReporter {
    pub fn events(&self) -> Vec<HealthEvent> {
        self.events.lock().expect("reporter mutex").clone()
    }

    fn record(&self, event: HealthEvent) {
        self.events.lock().expect("reporter mutex").push(event);
    }
}

impl HealthReporter for RecordingHealthReporter {
    fn bootstrap_starting(&self) {
        self.record(HealthEvent::BootstrapStarting);
    }

    fn bootstrap_succeeded(&self, _config: &Config, server_epoch: u64) {
        self.record(HealthEvent::BootstrapSucceeded { server_epoch });
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        self.record(HealthEvent::BootstrapFailed(error.to_string()));
    }

    fn listener_ready(&self, endpoint: &SocketEndpoint) {
        self.record(HealthEvent::ListenerReady(endpoint.to_string()));
    }

    fn shutdown_started(&self) {
        self.record(HealthEvent::ShutdownStarted);
    }

    fn launch_failed(&self, error: &LaunchError) {
        self.record(HealthEvent::LaunchFailed(error.to_string()));
    }
}
