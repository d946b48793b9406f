//! Server bootstrap orchestration.

use std::sync::Arc;
use std::time::{SystemTime, SystemTimeError, UNIX_EPOCH};

use ortho_config::OrthoError;
use thiserror::Error;

use chubby_config::{Config, SocketPreparationError};

use crate::health::HealthReporter;
use crate::registry::RegistryParams;
use crate::service::ChubbyService;
use crate::store::MemoryStore;
use crate::telemetry::{self, TelemetryError, TelemetryHandle};

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the server configuration.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that reads the process arguments, environment, and config file.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::from_process()
    }
}

/// Loader that returns a fixed configuration.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    /// Wraps an already resolved configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// Socket preparation failed.
    #[error("failed to prepare server socket: {source}")]
    Socket {
        /// Filesystem error reported while preparing the socket directory.
        #[source]
        source: SocketPreparationError,
    },
    /// No epoch was configured and the clock is before 1970.
    #[error("failed to derive server epoch from the system clock: {source}")]
    Clock {
        /// Underlying clock error.
        #[source]
        source: SystemTimeError,
    },
}

/// Result of a successful bootstrap invocation.
pub struct Server {
    config: Config,
    service: ChubbyService<MemoryStore>,
    telemetry: TelemetryHandle,
    reporter: Arc<dyn HealthReporter>,
}

impl Server {
    /// Accessor for the resolved configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Accessor for the telemetry handle, primarily useful for testing.
    #[must_use]
    pub fn telemetry(&self) -> TelemetryHandle {
        self.telemetry
    }

    /// Epoch stamped into every handle issued by this server.
    #[must_use]
    pub fn server_epoch(&self) -> u64 {
        self.service.registry().server_epoch()
    }

    /// The reporter used during bootstrap.
    pub(crate) fn reporter(&self) -> Arc<dyn HealthReporter> {
        Arc::clone(&self.reporter)
    }

    /// Consumes the server, yielding the lock service.
    pub fn into_service(self) -> ChubbyService<MemoryStore> {
        self.service
    }
}

/// Bootstraps the server using the supplied collaborators.
///
/// # Errors
///
/// Returns [`BootstrapError`] when configuration, telemetry, socket
/// preparation, or epoch derivation fails. The reporter is told in each case.
pub fn bootstrap_with(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn HealthReporter>,
) -> Result<Server, BootstrapError> {
    reporter.bootstrap_starting();
    match assemble(loader) {
        Ok((config, service, telemetry)) => {
            reporter.bootstrap_succeeded(&config, service.registry().server_epoch());
            Ok(Server {
                config,
                service,
                telemetry,
                reporter,
            })
        }
        Err(error) => {
            reporter.bootstrap_failed(&error);
            Err(error)
        }
    }
}

fn assemble(
    loader: &dyn ConfigLoader,
) -> Result<(Config, ChubbyService<MemoryStore>, TelemetryHandle), BootstrapError> {
    let config = loader
        .load()
        .map_err(|source| BootstrapError::Configuration { source })?;
    let telemetry =
        telemetry::initialise(&config).map_err(|source| BootstrapError::Telemetry { source })?;
    config
        .daemon_socket()
        .prepare_filesystem()
        .map_err(|source| BootstrapError::Socket { source })?;

    let server_epoch = match config.master_sequence_number() {
        Some(epoch) => epoch,
        None => SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|source| BootstrapError::Clock { source })?
            .as_secs(),
    };
    let params = RegistryParams {
        server_epoch,
        first_instance_number: config.first_instance_number(),
    };
    let service = ChubbyService::new(MemoryStore::new(), params);
    Ok((config, service, telemetry))
}
