//! Tests for the socket listener.

use std::net::TcpStream;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rstest::{fixture, rstest};

use chubby_config::SocketEndpoint;

use super::listener::SocketListener;
use super::{ConnectionHandler, ConnectionStream, ListenerError};

const ARRIVAL_TIMEOUT: Duration = Duration::from_secs(2);

/// Which kind of socket reached the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Arrival {
    Tcp,
    #[cfg(unix)]
    Unix,
}

/// Reports each connection the listener hands over, then drops it.
struct ArrivalLog {
    arrivals: Mutex<Sender<Arrival>>,
}

impl ArrivalLog {
    fn new() -> (Receiver<Arrival>, Arc<dyn ConnectionHandler>) {
        let (sender, receiver) = mpsc::channel();
        let handler = Arc::new(Self {
            arrivals: Mutex::new(sender),
        });
        (receiver, handler)
    }
}

impl ConnectionHandler for ArrivalLog {
    fn handle(&self, stream: ConnectionStream) {
        let arrival = match stream {
            ConnectionStream::Tcp(_) => Arrival::Tcp,
            #[cfg(unix)]
            ConnectionStream::Unix(_) => Arrival::Unix,
        };
        let _ = self.arrivals.lock().expect("arrival log").send(arrival);
    }

    fn refuse(&self, _stream: ConnectionStream, reason: &str) {
        panic!("listener refused a connection: {reason}");
    }
}

#[fixture]
fn tcp_endpoint() -> SocketEndpoint {
    SocketEndpoint::tcp("127.0.0.1", 0)
}

#[rstest]
fn tcp_connections_each_reach_the_handler(tcp_endpoint: SocketEndpoint) {
    let listener = SocketListener::bind(&tcp_endpoint).expect("bind tcp listener");
    let addr = listener.local_addr().expect("tcp listener has an address");
    let (arrivals, handler) = ArrivalLog::new();
    let handle = listener.start(handler).expect("start listener");

    let _clients: Vec<TcpStream> = (0..3)
        .map(|_| TcpStream::connect(addr).expect("connect client"))
        .collect();
    for _ in 0..3 {
        assert_eq!(arrivals.recv_timeout(ARRIVAL_TIMEOUT), Ok(Arrival::Tcp));
    }

    handle.shutdown();
    handle.join().expect("join listener");
}

#[rstest]
fn stopped_listener_releases_its_port(tcp_endpoint: SocketEndpoint) {
    let listener = SocketListener::bind(&tcp_endpoint).expect("bind tcp listener");
    let addr = listener.local_addr().expect("local address");
    let (arrivals, handler) = ArrivalLog::new();
    let handle = listener.start(handler).expect("start listener");
    handle.shutdown();
    handle.join().expect("join listener");

    assert!(TcpStream::connect(addr).is_err());
    assert!(arrivals.try_recv().is_err());
}

#[rstest]
fn unresolvable_hosts_are_reported_with_the_endpoint() {
    let endpoint = SocketEndpoint::tcp("host.invalid", 7000);
    let error = SocketListener::bind(&endpoint).expect_err("resolution fails");
    match &error {
        ListenerError::Resolve { endpoint: reported, .. } => {
            assert_eq!(reported, &endpoint.to_string());
        }
        other => panic!("expected a resolve error, got {other:?}"),
    }
}

#[cfg(unix)]
mod unix {
    use std::os::unix::net::{UnixListener, UnixStream};

    use super::*;

    #[fixture]
    fn socket_dir() -> tempfile::TempDir {
        tempfile::tempdir().expect("temp dir")
    }

    fn endpoint_at(path: &std::path::Path) -> SocketEndpoint {
        SocketEndpoint::unix(path.to_str().expect("utf8 path").to_owned())
    }

    #[rstest]
    fn leftover_socket_of_a_dead_server_is_replaced(socket_dir: tempfile::TempDir) {
        let path = socket_dir.path().join("chubbyd.sock");
        drop(UnixListener::bind(&path).expect("bind leftover listener"));
        assert!(path.exists(), "leftover socket file should remain");

        let listener = SocketListener::bind(&endpoint_at(&path)).expect("bind new listener");
        let (arrivals, handler) = ArrivalLog::new();
        let handle = listener.start(handler).expect("start listener");

        let _client = UnixStream::connect(&path).expect("connect unix client");
        assert_eq!(arrivals.recv_timeout(ARRIVAL_TIMEOUT), Ok(Arrival::Unix));

        handle.shutdown();
        handle.join().expect("join listener");
        assert!(!path.exists(), "socket file removed on shutdown");
    }

    #[rstest]
    fn live_server_keeps_its_socket(socket_dir: tempfile::TempDir) {
        let path = socket_dir.path().join("chubbyd.sock");
        let _running = UnixListener::bind(&path).expect("bind running listener");

        let error = SocketListener::bind(&endpoint_at(&path)).expect_err("path in use");
        assert!(matches!(error, ListenerError::InUse { .. }));
        assert!(UnixStream::connect(&path).is_ok(), "running server still reachable");
    }

    #[rstest]
    fn regular_files_are_never_replaced(socket_dir: tempfile::TempDir) {
        let path = socket_dir.path().join("chubbyd.sock");
        std::fs::write(&path, b"not a socket").expect("write file");

        let error = SocketListener::bind(&endpoint_at(&path)).expect_err("path is a file");
        assert!(matches!(error, ListenerError::NotASocket { .. }));
        assert_eq!(std::fs::read(&path).expect("file intact"), b"not a socket");
    }

    #[rstest]
    fn socket_path_taken_over_after_start_is_left_alone(socket_dir: tempfile::TempDir) {
        let path = socket_dir.path().join("chubbyd.sock");
        let listener = SocketListener::bind(&endpoint_at(&path)).expect("bind listener");
        let (_arrivals, handler) = ArrivalLog::new();
        let handle = listener.start(handler).expect("start listener");

        std::fs::remove_file(&path).expect("remove socket");
        std::fs::write(&path, b"someone else's file").expect("replace socket");
        handle.shutdown();
        handle.join().expect("join listener");

        assert_eq!(
            std::fs::read(&path).expect("file intact"),
            b"someone else's file"
        );
    }
}
