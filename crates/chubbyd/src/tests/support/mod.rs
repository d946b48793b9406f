//! Shared doubles for the server test suites.

mod config_loader;
mod reporter;
mod transport;

pub use config_loader::{FailingConfigLoader, TestConfigLoader};
pub use reporter::{HealthEvent, RecordingHealthReporter};
pub use transport::{Outbound, RecordingTransport};
