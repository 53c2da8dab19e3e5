//! The dynamic set of accepted downstream clients, for listen-downstream
//! modes.
//!
//! All mutation — append on accept, remove on send failure, clear on
//! teardown — happens under a single lock. Fan-out itself (in
//! [`crate::pipeline`]) takes a snapshot under the lock and then sends
//! outside it, so a slow or blocked client write never holds up acceptance
//! of new clients or removal of other failed ones.

use std::net::TcpStream;
use std::sync::{Arc, Mutex};

/// A guarded, insertion-ordered set of client sockets.
///
/// Clients are compared by `Arc` identity (not by address, which may be
/// unavailable or reused) so a send-failure eviction always removes exactly
/// the socket that failed, never a different client that happens to share a
/// peer address.
#[derive(Default)]
pub struct ClientRegistry {
    clients: Mutex<Vec<Arc<TcpStream>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly accepted client.
    pub fn push(&self, stream: TcpStream) -> Arc<TcpStream> {
        let stream = Arc::new(stream);
        self.clients.lock().unwrap().push(Arc::clone(&stream));
        stream
    }

    /// Current number of registered clients.
    pub fn len(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// An unlocked snapshot of the current clients, safe to iterate and send
    /// to without holding the registry lock across blocking I/O.
    pub fn snapshot(&self) -> Vec<Arc<TcpStream>> {
        self.clients.lock().unwrap().clone()
    }

    /// `host:port` strings for every currently registered client, skipping
    /// any that can no longer report a peer address (already disconnected,
    /// not yet evicted).
    pub fn peer_list(&self) -> Vec<String> {
        self.clients
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| c.peer_addr().ok())
            .map(|addr| addr.to_string())
            .collect()
    }

    /// Remove every client in `dead` from the registry and close it.
    /// Tolerates a client that is already gone (e.g. evicted concurrently by
    /// a send failure on another fan-out). Returns `true` if anything was
    /// actually removed, so the caller knows whether to republish state.
    pub fn evict(&self, dead: &[Arc<TcpStream>]) -> bool {
        if dead.is_empty() {
            return false;
        }
        let mut clients = self.clients.lock().unwrap();
        let before = clients.len();
        clients.retain(|c| !dead.iter().any(|d| Arc::ptr_eq(c, d)));
        let removed = before != clients.len();
        drop(clients);
        for stream in dead {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
        removed
    }

    /// Drain every client, shutting down and closing each socket. Used by
    /// teardown.
    pub fn clear(&self) -> Vec<Arc<TcpStream>> {
        let drained: Vec<_> = std::mem::take(&mut *self.clients.lock().unwrap());
        for stream in &drained {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
        drained
    }
}
