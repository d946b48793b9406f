//! Shared configuration for the Chubby lock service daemon.
//!
//! Values are layered by [`ortho_config`]: built-in defaults, then an optional
//! TOML file (`--config-path` or `CHUBBY_CONFIG_PATH`), then `CHUBBY_*`
//! environment variables, then command-line flags. The daemon only reads the
//! merged [`Config`]; it never consults the sources directly.

mod defaults;
mod logging;
mod socket;

use std::ffi::OsString;
use std::sync::Arc;

use ortho_config::{OrthoConfig, OrthoError};
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_LOG_FILTER, DEFAULT_TCP_PORT, default_log_filter, default_log_filter_string,
    default_log_format, default_socket_endpoint,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use socket::{SocketEndpoint, SocketParseError, SocketPreparationError};

/// Merged daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "CHUBBY")]
pub struct Config {
    /// Socket the daemon listens on for client sessions.
    #[serde(default = "default_socket_endpoint")]
    #[ortho_config(default = default_socket_endpoint())]
    pub daemon_socket: SocketEndpoint,
    /// `tracing` filter expression, for example `info` or `chubbyd=debug`.
    #[serde(default = "default_log_filter_string")]
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Output format for structured logs.
    #[serde(default = "default_log_format")]
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
    /// Server epoch stamped into every handle. Defaults to the process start
    /// time in seconds when unset.
    #[serde(default)]
    pub master_sequence_number: Option<u64>,
    /// Value the instance-number counter starts from. The first created path
    /// receives this value plus one.
    #[serde(default)]
    pub first_instance_number: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            daemon_socket: default_socket_endpoint(),
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            master_sequence_number: None,
            first_instance_number: None,
        }
    }
}

impl Config {
    /// Loads the configuration from the process arguments and environment.
    ///
    /// # Errors
    ///
    /// Returns the aggregated loader error when any layer fails to parse.
    pub fn from_process() -> Result<Self, Arc<OrthoError>> {
        Self::from_args(std::env::args_os().collect())
    }

    /// Loads the configuration from an explicit argument vector. The first
    /// element is the program name, as with [`std::env::args_os`].
    ///
    /// # Errors
    ///
    /// Returns the aggregated loader error when any layer fails to parse.
    pub fn from_args(args: Vec<OsString>) -> Result<Self, Arc<OrthoError>> {
        <Self as OrthoConfig>::load_from_iter(args)
    }

    /// Socket the daemon listens on.
    #[must_use]
    pub fn daemon_socket(&self) -> &SocketEndpoint {
        &self.daemon_socket
    }

    /// Log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Explicitly configured server epoch, if any.
    #[must_use]
    pub fn master_sequence_number(&self) -> Option<u64> {
        self.master_sequence_number
    }

    /// Seed for the instance-number counter.
    #[must_use]
    pub fn first_instance_number(&self) -> u64 {
        self.first_instance_number.unwrap_or(0)
    }
}
