//! Downstream-as-listener role (`connect-listen`, `listen-listen`): accepts
//! any number of client consumers and registers each one for fan-out.
//!
//! Grounded on `tcp_relay_server.py`'s `_listen_clients_or_die` /
//! `_accept_clients_loop`. Unlike the upstream listener, this driver never
//! calls into the forwarding pipeline itself — it only maintains
//! [`crate::registry::ClientRegistry`]; whichever upstream driver is
//! running reads from upstream and fans out to the registry directly.

use std::net::TcpListener;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use crate::drivers::bind_reuseaddr;
use crate::engine::EngineState;
use crate::error::Result;

const BACKLOG: i32 = 5;

pub(crate) fn start(state: Arc<EngineState>) -> Result<()> {
    let listener = bind_reuseaddr(
        &state.config.downstream_host,
        state.config.downstream_port,
        BACKLOG,
    )?;
    let accept_handle = listener.try_clone()?;
    *state.downstream_listener.lock().unwrap() = Some(listener);

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
                    .log(format!("Error accepting client connection: {e}"));
                continue;
            }
        };

        state.callbacks.log(format!("Client connected from {addr}"));
        state.clients.push(stream);
        state.callbacks.client_count(state.clients.len());
        state.callbacks.client_list(&state.clients.peer_list());
        state.callbacks.downstream_status(true);
    }
}
