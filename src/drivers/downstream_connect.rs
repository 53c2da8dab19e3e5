//! Downstream-as-active-connector role (`listen-connect`, `connect-connect`):
//! a single outbound consumer connection, grounded on
//! `tcp_relay_server.py`'s `connect_downstream`.
//!
//! This driver never reads application data itself — delivery happens from
//! whichever upstream driver is running, via
//! [`crate::pipeline::DownstreamSink::PointToPoint`]. Its own job is purely
//! connection lifecycle: reconnect on drop, and detect a silently closed
//! peer by polling with `MSG_PEEK` (a zero-length read never arrives on its
//! own since this socket carries no inbound traffic).

use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::engine::EngineState;

const PEEK_INTERVAL: Duration = Duration::from_millis(500);

pub(crate) fn run(state: Arc<EngineState>) {
    let host = state.config.downstream_host.clone();
    let port = state.config.downstream_port;
    let connect_timeout = state.config.retry_interval;

    while state.running.load(Ordering::SeqCst) {
        match resolve(&host, port).and_then(|addr| TcpStream::connect_timeout(&addr, connect_timeout)) {
            Ok(stream) => {
                state
                    .callbacks
                    .log(format!("Connected to downstream {host}:{port}"));
                if let Err(e) = stream.set_read_timeout(Some(PEEK_INTERVAL)) {
                    state
                        .callbacks
                        .log(format!("Error configuring downstream socket: {e}"));
                }

                let stream = Arc::new(stream);
                *state.downstream_sock.lock().unwrap() = Some(Arc::clone(&stream));
                state.callbacks.downstream_status(true);

                poll_until_closed(&state, &stream);

                let mut current = state.downstream_sock.lock().unwrap();
                if current.as_ref().is_some_and(|s| Arc::ptr_eq(s, &stream)) {
                    *current = None;
                }
                drop(current);
                let _ = stream.shutdown(Shutdown::Both);
                state.callbacks.downstream_status(false);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                state
                    .callbacks
                    .log(format!("Local address already in use connecting to downstream: {e}. Giving up."));
                state.running.store(false, Ordering::SeqCst);
            }
            Err(e) => {
                state.callbacks.log(format!(
                    "Could not connect to downstream {host}:{port}: {e}. Retrying in {}s",
                    state.config.retry_interval.as_secs()
                ));
            }
        }

        if state.running.load(Ordering::SeqCst) {
            thread::sleep(state.config.retry_interval);
        }
    }
}

/// Poll the connection with a zero-length `MSG_PEEK` read until the peer
/// closes it, the relay stops, or an unexpected read error occurs.
fn poll_until_closed(state: &Arc<EngineState>, stream: &TcpStream) {
    let mut buf = [0u8; 1];
    while state.running.load(Ordering::SeqCst) {
        match stream.peek(&mut buf) {
            Ok(0) => {
                state.callbacks.log("Downstream connection closed.");
                return;
            }
            Ok(_) => continue,
            Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {
                continue
            }
            Err(e) => {
                state
                    .callbacks
                    .log(format!("Error polling downstream connection: {e}"));
                return;
            }
        }
    }
}

fn resolve(host: &str, port: u16) -> std::io::Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no address found"))
}
