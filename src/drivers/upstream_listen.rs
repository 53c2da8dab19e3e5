//! Upstream-as-listener role (`listen-connect`, `listen-listen`).
//!
//! Grounded on `tcp_relay_server.py`'s `_listen_upstream_or_die` /
//! `_accept_upstream_loop`: bind synchronously so a bind failure aborts
//! startup, then accept upstream producers one at a time on a spawned
//! thread. Only one upstream connection is meaningful at a time — a new
//! one replaces whatever was previously connected.

use std::net::{Shutdown, TcpListener};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use crate::drivers::bind_reuseaddr;
use crate::engine::EngineState;
use crate::error::Result;
use crate::pipeline::{self, DownstreamSink};

const BACKLOG: i32 = 1;

pub(crate) fn start(state: Arc<EngineState>) -> Result<()> {
    let listener = bind_reuseaddr(&state.config.upstream_host, state.config.upstream_port, BACKLOG)?;
    let accept_handle = listener.try_clone()?;
    *state.upstream_listener.lock().unwrap() = Some(listener);

    thread::spawn(move || accept_loop(state, accept_handle));
    Ok(())
}

fn accept_loop(state: Arc<EngineState>, listener: TcpListener) {
    while state.running.load(Ordering::SeqCst) {
        let (stream, addr) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(e) => {
                if !state.running.load(Ordering::SeqCst) {
                    return;
                }
                state
                    .callbacks
                    .log(format!("Error accepting upstream connection: {e}"));
                continue;
            }
        };

        state.callbacks.log(format!("Upstream connected from {addr}"));
        if let Some(old) = state.upstream_sock.lock().unwrap().take() {
            state.callbacks.log("Replacing existing upstream connection");
            let _ = old.shutdown(Shutdown::Both);
        }

        let stream = Arc::new(stream);
        *state.upstream_sock.lock().unwrap() = Some(Arc::clone(&stream));
        state.callbacks.upstream_status(true);

        let sink = if state.config.mode.downstream_listens() {
            DownstreamSink::Fanout(&state.clients)
        } else {
            DownstreamSink::PointToPoint(&state.downstream_sock)
        };
        pipeline::forward(&stream, &state.running, &state.dump, &state.callbacks, &sink);

        let mut current = state.upstream_sock.lock().unwrap();
        if current.as_ref().is_some_and(|s| Arc::ptr_eq(s, &stream)) {
            *current = None;
        }
        drop(current);
        let _ = stream.shutdown(Shutdown::Both);
        state.callbacks.upstream_status(false);
    }
}
