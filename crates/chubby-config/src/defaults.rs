use camino::Utf8PathBuf;

#[cfg(unix)]
use std::env;

#[cfg(unix)]
use dirs::runtime_dir;
#[cfg(unix)]
use libc::geteuid;

use crate::logging::LogFormat;
use crate::socket::SocketEndpoint;

/// TCP port used when Unix domain sockets are unavailable.
pub const DEFAULT_TCP_PORT: u16 = 9779;

/// Log filter applied when none is configured.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default log filter expression.
#[must_use]
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned copy of [`DEFAULT_LOG_FILTER`] for serde and the config derive.
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default structured log format.
#[must_use]
pub fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Computes the default listening endpoint for the daemon.
///
/// On Unix this is `chubby/chubbyd.sock` beneath the user's runtime
/// directory, falling back to a per-uid directory under the system temp
/// directory when no runtime directory is available.
#[must_use]
pub fn default_socket_endpoint() -> SocketEndpoint {
    default_socket_endpoint_inner()
}

#[cfg(unix)]
fn default_socket_endpoint_inner() -> SocketEndpoint {
    let mut base = match runtime_dir().and_then(|dir| Utf8PathBuf::from_path_buf(dir).ok()) {
        Some(dir) => dir,
        None => {
            let mut dir = Utf8PathBuf::from_path_buf(env::temp_dir())
                .unwrap_or_else(|_| Utf8PathBuf::from("/tmp"));
            dir.push(format!("chubby-uid-{}", effective_uid()));
            dir
        }
    };
    base.push("chubby");
    SocketEndpoint::unix(base.join("chubbyd.sock"))
}

#[cfg(unix)]
fn effective_uid() -> u32 {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { geteuid() }
}

#[cfg(not(unix))]
fn default_socket_endpoint_inner() -> SocketEndpoint {
    SocketEndpoint::tcp("127.0.0.1", DEFAULT_TCP_PORT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_endpoint_names_the_daemon_socket() {
        match default_socket_endpoint() {
            SocketEndpoint::Unix { path } => {
                assert_eq!(path.file_name(), Some("chubbyd.sock"));
                assert!(path.as_str().contains("chubby"));
            }
            SocketEndpoint::Tcp { port, .. } => assert_eq!(port, DEFAULT_TCP_PORT),
        }
    }

    #[test]
    fn default_filter_is_info() {
        assert_eq!(default_log_filter(), "info");
        assert_eq!(default_log_filter_string(), DEFAULT_LOG_FILTER);
    }
}
