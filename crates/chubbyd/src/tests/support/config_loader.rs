//! Test configuration loaders for success and failure paths.

use std::ffi::OsString;
use std::sync::Arc;

use ortho_config::OrthoError;
use tempfile::TempDir;

use chubby_config::{Config, SocketEndpoint};

use crate::bootstrap::ConfigLoader;

/// Loader that places a Unix socket under a private temporary directory.
pub struct TestConfigLoader {
    socket_dir: TempDir,
    server_epoch: u64,
}

impl TestConfigLoader {
    pub fn new(server_epoch: u64) -> Self {
        Self {
            socket_dir: TempDir::new().expect("create temporary socket directory"),
            server_epoch,
        }
    }

    pub fn socket_path(&self) -> std::path::PathBuf {
        self.socket_dir.path().join("run").join("chubbyd.sock")
    }
}

impl ConfigLoader for TestConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let path = self.socket_path();
        Ok(Config {
            daemon_socket: SocketEndpoint::unix(
                path.to_str().expect("temporary socket path is UTF-8"),
            ),
            master_sequence_number: Some(self.server_epoch),
            ..Config::default()
        })
    }
}

/// Loader that fails by passing an invalid socket URL on the command line.
pub struct FailingConfigLoader;

impl ConfigLoader for FailingConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::from_args(vec![
            OsString::from("chubbyd"),
            OsString::from("--daemon-socket"),
            OsString::from("carrier-pigeon://coop"),
        ])
    }
}
