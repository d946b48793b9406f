//! Supervises server launch sequencing and runtime orchestration.

use std::sync::Arc;

use tracing::info;

use crate::bootstrap::{ConfigLoader, Server, SystemConfigLoader, bootstrap_with};
use crate::dispatch::{DispatchConnectionHandler, ServiceManager, SessionTable};
use crate::health::{HealthReporter, StructuredHealthReporter};
use crate::transport::SocketListener;

use super::PROCESS_TARGET;
use super::errors::LaunchError;
use super::shutdown::{ShutdownSignal, SystemShutdownSignal};

/// Collaborators required to launch the server runtime.
pub(crate) struct LaunchPlan<L, S> {
    pub(crate) loader: L,
    pub(crate) reporter: Arc<dyn HealthReporter>,
    pub(crate) shutdown: S,
}

/// Runs the server in the foreground using the production collaborators.
///
/// # Errors
///
/// Returns [`LaunchError`] if bootstrap, binding, or signal installation
/// fails. Failures after bootstrap are also reported through the health
/// reporter, so the caller only needs to pick an exit code.
pub fn run_daemon() -> Result<(), LaunchError> {
    let shutdown = SystemShutdownSignal::install()?;
    run_daemon_with(LaunchPlan {
        loader: SystemConfigLoader,
        reporter: Arc::new(StructuredHealthReporter::new()),
        shutdown,
    })
}

/// Runs the server with injected collaborators.
pub(crate) fn run_daemon_with<L, S>(plan: LaunchPlan<L, S>) -> Result<(), LaunchError>
where
    L: ConfigLoader,
    S: ShutdownSignal,
{
    let LaunchPlan {
        loader,
        reporter,
        shutdown,
    } = plan;

    let server = bootstrap_with(&loader, reporter)?;
    let reporter = server.reporter();
    let outcome = serve_until_stopped(server, &shutdown);
    if let Err(error) = &outcome {
        reporter.launch_failed(error);
    }
    outcome
}

fn serve_until_stopped<S: ShutdownSignal>(server: Server, shutdown: &S) -> Result<(), LaunchError> {
    let reporter = server.reporter();
    let endpoint = server.config().daemon_socket().clone();
    let listener = SocketListener::bind(&endpoint)?;

    let sessions = Arc::new(SessionTable::new());
    let service = ServiceManager::new(server.into_service());
    let handler = Arc::new(DispatchConnectionHandler::new(service, sessions));
    let listener_handle = listener.start(handler)?;
    reporter.listener_ready(&endpoint);

    let waited = shutdown.wait();
    reporter.shutdown_started();
    listener_handle.shutdown();
    listener_handle.join()?;
    waited?;
    info!(target: PROCESS_TARGET, "shutdown sequence completed");
    Ok(())
}
