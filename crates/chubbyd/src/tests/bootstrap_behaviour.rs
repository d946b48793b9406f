//! Bootstrap sequencing and health reporting.

use std::sync::Arc;

use rstest::rstest;

use chubby_config::{Config, SocketEndpoint};

use crate::bootstrap::{BootstrapError, StaticConfigLoader, bootstrap_with};

use super::support::{FailingConfigLoader, HealthEvent, RecordingHealthReporter, TestConfigLoader};

#[rstest]
fn successful_bootstrap_prepares_the_socket_directory() {
    let loader = TestConfigLoader::new(77);
    let reporter = Arc::new(RecordingHealthReporter::default());

    let server = bootstrap_with(&loader, reporter.clone()).expect("bootstrap");

    assert_eq!(server.server_epoch(), 77);
    let parent = loader.socket_path();
    assert!(parent.parent().is_some_and(std::path::Path::is_dir));
    assert_eq!(
        reporter.events(),
        vec![
            HealthEvent::BootstrapStarting,
            HealthEvent::BootstrapSucceeded { server_epoch: 77 },
        ]
    );
}

#[rstest]
fn configuration_errors_are_reported() {
    let reporter = Arc::new(RecordingHealthReporter::default());

    let result = bootstrap_with(&FailingConfigLoader, reporter.clone());

    assert!(matches!(result, Err(BootstrapError::Configuration { .. })));
    let events = reporter.events();
    assert_eq!(events.first(), Some(&HealthEvent::BootstrapStarting));
    assert!(matches!(events.last(), Some(HealthEvent::BootstrapFailed(_))));
}

#[rstest]
fn invalid_log_filters_fail_bootstrap() {
    let loader = StaticConfigLoader::new(Config {
        daemon_socket: SocketEndpoint::tcp("127.0.0.1", 0),
        log_filter: "chubbyd=shouting".to_owned(),
        ..Config::default()
    });
    let reporter = Arc::new(RecordingHealthReporter::default());

    let result = bootstrap_with(&loader, reporter);

    assert!(matches!(result, Err(BootstrapError::Telemetry { .. })));
}

#[cfg(unix)]
#[rstest]
fn unusable_socket_directories_fail_bootstrap() {
    let dir = tempfile::tempdir().expect("temp dir");
    let blocker = dir.path().join("occupied");
    std::fs::write(&blocker, b"file, not a directory").expect("write blocker");
    let socket = blocker.join("run").join("chubbyd.sock");
    let loader = StaticConfigLoader::new(Config {
        daemon_socket: SocketEndpoint::unix(socket.to_str().expect("utf8 path")),
        ..Config::default()
    });
    let reporter = Arc::new(RecordingHealthReporter::default());

    let result = bootstrap_with(&loader, reporter.clone());

    assert!(matches!(result, Err(BootstrapError::Socket { .. })));
    assert!(matches!(reporter.events().last(), Some(HealthEvent::BootstrapFailed(_))));
}

#[rstest]
fn unset_epoch_falls_back_to_the_clock() {
    let loader = StaticConfigLoader::new(Config {
        daemon_socket: SocketEndpoint::tcp("127.0.0.1", 0),
        ..Config::default()
    });
    let server = bootstrap_with(&loader, Arc::new(RecordingHealthReporter::default()))
        .expect("bootstrap");
    // 2020-09-13; any real clock is later.
    assert!(server.server_epoch() > 1_600_000_000);
}
