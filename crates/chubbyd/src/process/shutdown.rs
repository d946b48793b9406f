//! Termination signals that end the lock server's foreground run.

use std::fmt;
use std::io;
use std::sync::Mutex;

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use thiserror::Error;
use tracing::info;

use super::PROCESS_TARGET;

/// Blocks the launching thread until the server should stop.
pub trait ShutdownSignal: Send + Sync {
    /// Returns once a stop has been requested.
    ///
    /// # Errors
    ///
    /// Returns [`ShutdownError`] when no stop request can be observed.
    fn wait(&self) -> Result<(), ShutdownError>;
}

/// Failures while watching for a stop request.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The signal stream ended without delivering a signal.
    #[error("signal stream closed before a stop was requested")]
    Closed,
}

/// Stops on SIGTERM, SIGINT, SIGQUIT or SIGHUP.
///
/// Handlers are installed by [`SystemShutdownSignal::install`], before the
/// server binds its socket, so a signal arriving during startup is held until
/// [`ShutdownSignal::wait`] runs instead of killing the process mid-bind.
pub struct SystemShutdownSignal {
    signals: Mutex<Signals>,
}

impl fmt::Debug for SystemShutdownSignal {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_struct("SystemShutdownSignal").finish_non_exhaustive()
    }
}

impl SystemShutdownSignal {
    /// Installs the process signal handlers.
    ///
    /// # Errors
    ///
    /// Returns [`ShutdownError::Install`] if registration fails.
    pub fn install() -> Result<Self, ShutdownError> {
        let signals = Signals::new([SIGTERM, SIGINT, SIGQUIT, SIGHUP])
            .map_err(|source| ShutdownError::Install { source })?;
        Ok(Self {
            signals: Mutex::new(signals),
        })
    }
}

impl ShutdownSignal for SystemShutdownSignal {
    fn wait(&self) -> Result<(), ShutdownError> {
        let mut signals = self
            .signals
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let signal = signals.forever().next().ok_or(ShutdownError::Closed)?;
        info!(target: PROCESS_TARGET, signal, "stop requested; refusing new sessions");
        Ok(())
    }
}
