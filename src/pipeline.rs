//! The forwarding pipeline: read from the live upstream socket, fan the
//! result out to whichever downstream sink the configured mode uses.
//!
//! Called inline by whichever driver just established the upstream
//! connection (`SPEC_FULL.md` §5.5). Returns once the upstream socket is
//! closed, read-errors, or `running` flips false — the caller (the owning
//! driver) is responsible for closing the upstream socket afterwards; this
//! function only borrows it.

use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::callbacks::Callbacks;
use crate::registry::ClientRegistry;
use crate::READ_CHUNK_SIZE;

/// Where the pipeline delivers forwarded bytes, depending on the configured
/// downstream role.
pub enum DownstreamSink<'a> {
    /// Downstream is a multi-client listener: fan out to every registered
    /// client.
    Fanout(&'a ClientRegistry),
    /// Downstream is a single outbound connection: point-to-point send.
    PointToPoint(&'a Mutex<Option<Arc<TcpStream>>>),
}

/// Render a forwarded buffer for the dump log, matching the source's
/// `data.decode("utf-8")` / `repr(data)` fallback: valid UTF-8 is shown as
/// text, anything else as an escaped byte list.
pub fn render_dump(data: &[u8]) -> String {
    match std::str::from_utf8(data) {
        Ok(text) => text.to_string(),
        Err(_) => format!("{data:?}"),
    }
}

/// Run the forwarding loop for one upstream connection.
///
/// `running` and `dump` are read on every iteration — `dump` may be toggled
/// live by another thread via [`crate::RelayEngine::set_dump`].
pub fn forward(
    upstream: &TcpStream,
    running: &AtomicBool,
    dump: &AtomicBool,
    callbacks: &Callbacks,
    sink: &DownstreamSink<'_>,
) {
    let mut buf = [0u8; READ_CHUNK_SIZE];
    let mut reader = upstream;

    while running.load(Ordering::SeqCst) {
        let n = match std::io::Read::read(&mut reader, &mut buf) {
            Ok(0) => {
                callbacks.log("Upstream connection closed.");
                callbacks.upstream_status(false);
                return;
            }
            Ok(n) => n,
            Err(_) if !running.load(Ordering::SeqCst) => return,
            Err(e) => {
                callbacks.log(format!("Error receiving data from upstream: {e}"));
                return;
            }
        };

        let data = &buf[..n];
        callbacks.log(format!("relay: received {n} bytes from upstream"));

        if dump.load(Ordering::SeqCst) {
            callbacks.log_dump(&render_dump(data));
        }

        match sink {
            DownstreamSink::Fanout(registry) => fan_out(registry, data, callbacks),
            DownstreamSink::PointToPoint(slot) => point_to_point(slot, data, callbacks),
        }
    }
}

fn fan_out(registry: &ClientRegistry, data: &[u8], callbacks: &Callbacks) {
    let targets = registry.snapshot();
    if targets.is_empty() {
        return;
    }

    let mut dead = Vec::new();
    for client in &targets {
        if let Err(e) = std::io::Write::write_all(&mut client.as_ref(), data) {
            match client.peer_addr() {
                Ok(addr) => callbacks.log(format!("Error sending to client {addr}: {e}")),
                Err(_) => callbacks.log(format!("Error sending to client <unknown>: {e}")),
            }
            dead.push(Arc::clone(client));
        }
    }

    if registry.evict(&dead) {
        callbacks.client_count(registry.len());
        callbacks.client_list(&registry.peer_list());
        callbacks.downstream_status(!registry.is_empty());
    }
}

fn point_to_point(slot: &Mutex<Option<Arc<TcpStream>>>, data: &[u8], callbacks: &Callbacks) {
    let current = slot.lock().unwrap().clone();
    let Some(stream) = current else { return };

    if let Err(e) = std::io::Write::write_all(&mut stream.as_ref(), data) {
        callbacks.log(format!("Error sending to downstream: {e}"));
        let _ = stream.shutdown(std::net::Shutdown::Both);
        *slot.lock().unwrap() = None;
        callbacks.downstream_status(false);
        callbacks.client_count(0);
    }
}
