//! Upstream-as-active-connector role (`connect-listen`, `connect-connect`).
//!
//! Grounded on `tcp_relay_server.py`'s `connect_upstream`: a reconnect loop
//! that keeps retrying on its own thread until the relay stops, forwarding
//! for as long as the connection stays up and reconnecting immediately
//! after it drops.

use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use crate::engine::EngineState;
use crate::pipeline::{self, DownstreamSink};

pub(crate) fn run(state: Arc<EngineState>) {
    let host = state.config.upstream_host.clone();
    let port = state.config.upstream_port;
    let connect_timeout = state.config.retry_interval;

    while state.running.load(Ordering::SeqCst) {
        match resolve(&host, port).and_then(|addr| TcpStream::connect_timeout(&addr, connect_timeout)) {
            Ok(stream) => {
                state
                    .callbacks
                    .log(format!("Connected to upstream {host}:{port}"));
                let stream = Arc::new(stream);
                *state.upstream_sock.lock().unwrap() = Some(Arc::clone(&stream));
                state.callbacks.upstream_status(true);

                let sink = if state.config.mode.downstream_listens() {
                    DownstreamSink::Fanout(&state.clients)
                } else {
                    DownstreamSink::PointToPoint(&state.downstream_sock)
                };
                pipeline::forward(&stream, &state.running, &state.dump, &state.callbacks, &sink);

                *state.upstream_sock.lock().unwrap() = None;
                let _ = stream.shutdown(Shutdown::Both);
                state.callbacks.upstream_status(false);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                state
                    .callbacks
                    .log(format!("Local address already in use connecting to upstream: {e}. Giving up."));
                state.running.store(false, Ordering::SeqCst);
            }
            Err(e) => {
                state.callbacks.log(format!(
                    "Could not connect to upstream {host}:{port}: {e}. Retrying in {}s",
                    state.config.retry_interval.as_secs()
                ));
            }
        }

        if state.running.load(Ordering::SeqCst) {
            thread::sleep(state.config.retry_interval);
        }
    }
}

fn resolve(host: &str, port: u16) -> std::io::Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no address found"))
}
