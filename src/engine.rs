//! The relay engine: lifecycle orchestration (`SPEC_FULL.md` §5.7) around
//! the role drivers, forwarding pipeline, client registry, and
//! observability hooks defined in the sibling modules.

use std::net::TcpListener;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::callbacks::Callbacks;
use crate::config::RelayConfig;
use crate::drivers;
use crate::error::Result;
use crate::registry::ClientRegistry;

/// State shared between the engine handle and every driver thread it spawns.
///
/// Exactly one of `upstream_sock` / `upstream_listener` is ever populated,
/// and likewise for the downstream pair, per the mode's role assignment —
/// see the invariants in `SPEC_FULL.md` §4.
pub(crate) struct EngineState {
    pub(crate) config: RelayConfig,
    pub(crate) callbacks: Callbacks,
    pub(crate) clients: ClientRegistry,
    pub(crate) running: AtomicBool,
    pub(crate) dump: AtomicBool,
    pub(crate) upstream_sock: Mutex<Option<Arc<TcpStream>>>,
    pub(crate) downstream_sock: Mutex<Option<Arc<TcpStream>>>,
    pub(crate) upstream_listener: Mutex<Option<TcpListener>>,
    pub(crate) downstream_listener: Mutex<Option<TcpListener>>,
    cleaned_once: AtomicBool,
}

/// A single configurable one-way TCP relay.
///
/// Construct with [`RelayEngine::new`], optionally set the five
/// observability callbacks, then call [`RelayEngine::start`]. `start` blocks
/// the calling thread until [`RelayEngine::stop`] is called from another
/// thread (typically via an `Arc<RelayEngine>` shared with the caller) or a
/// listen role fails to bind at startup. A `RelayEngine` is single-use: it
/// may be started once and is discarded after it stops. Restart is not
/// supported — construct a fresh engine instead.
pub struct RelayEngine {
    state: Arc<EngineState>,
}

impl RelayEngine {
    pub fn new(config: RelayConfig) -> Self {
        let dump = AtomicBool::new(config.dump);
        Self {
            state: Arc::new(EngineState {
                config,
                callbacks: Callbacks::new(),
                clients: ClientRegistry::new(),
                running: AtomicBool::new(false),
                dump,
                upstream_sock: Mutex::new(None),
                downstream_sock: Mutex::new(None),
                upstream_listener: Mutex::new(None),
                downstream_listener: Mutex::new(None),
                cleaned_once: AtomicBool::new(false),
            }),
        }
    }

    pub fn set_on_upstream_status(&self, f: impl Fn(bool) + Send + Sync + 'static) {
        self.state.callbacks.set_on_upstream_status(f);
    }

    pub fn set_on_downstream_status(&self, f: impl Fn(bool) + Send + Sync + 'static) {
        self.state.callbacks.set_on_downstream_status(f);
    }

    pub fn set_on_client_count(&self, f: impl Fn(usize) + Send + Sync + 'static) {
        self.state.callbacks.set_on_client_count(f);
    }

    pub fn set_on_client_list(&self, f: impl Fn(&[String]) + Send + Sync + 'static) {
        self.state.callbacks.set_on_client_list(f);
    }

    pub fn set_on_log(&self, f: impl Fn(&str) + Send + Sync + 'static) {
        self.state.callbacks.set_on_log(f);
    }

    /// Toggle dump logging live, without restarting the relay.
    pub fn set_dump(&self, dump: bool) {
        self.state.dump.store(dump, Ordering::SeqCst);
    }

    /// Number of currently registered downstream clients (listen-downstream
    /// modes only; always 0 in connect-downstream modes).
    pub fn client_count(&self) -> usize {
        self.state.clients.len()
    }

    /// Request shutdown from another thread. Idempotent; does not itself
    /// close any socket — the thread blocked in [`RelayEngine::start`] does
    /// that via teardown once it observes `running` has flipped.
    pub fn stop(&self) {
        self.state.running.store(false, Ordering::SeqCst);
    }

    /// Run the relay until [`RelayEngine::stop`] is called, or a listen role
    /// fails to bind, in which case this returns
    /// [`crate::Error::StartupFatal`] immediately (after tearing down
    /// whatever was already set up).
    pub fn start(&self) -> Result<()> {
        let state = &self.state;
        state.running.store(true, Ordering::SeqCst);
        state.cleaned_once.store(false, Ordering::SeqCst);
        state
            .callbacks
            .log(format!("Starting relay server in mode: {}", state.config.mode));

        if let Err(e) = self.start_upstream() {
            state.callbacks.log(format!(
                "ERROR: failed to set up upstream on {}:{}: {e}. Server will not start.",
                state.config.upstream_host, state.config.upstream_port
            ));
            state.running.store(false, Ordering::SeqCst);
            self.teardown();
            return Err(e);
        }

        if let Err(e) = self.start_downstream() {
            state.callbacks.log(format!(
                "ERROR: failed to set up downstream on {}:{}: {e}. Server will not start.",
                state.config.downstream_host, state.config.downstream_port
            ));
            state.running.store(false, Ordering::SeqCst);
            self.teardown();
            return Err(e);
        }

        while state.running.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_secs(1));
        }

        self.teardown();
        Ok(())
    }

    fn start_upstream(&self) -> Result<()> {
        let state = Arc::clone(&self.state);
        if state.config.mode.upstream_connects() {
            state.callbacks.log("starting upstream connect driver");
            thread::spawn(move || drivers::upstream_connect::run(state));
            Ok(())
        } else {
            state.callbacks.log(format!(
                "trying to listen upstream on {}:{}",
                state.config.upstream_host, state.config.upstream_port
            ));
            drivers::upstream_listen::start(state)
        }
    }

    fn start_downstream(&self) -> Result<()> {
        let state = Arc::clone(&self.state);
        if state.config.mode.downstream_listens() {
            state.callbacks.log(format!(
                "trying to listen downstream (clients) on {}:{}",
                state.config.downstream_host, state.config.downstream_port
            ));
            drivers::downstream_listen::start(state)
        } else {
            state.callbacks.log("starting downstream connect driver");
            thread::spawn(move || drivers::downstream_connect::run(state));
            Ok(())
        }
    }

    /// Idempotent teardown: close every owned socket exactly once and
    /// publish a final disconnected/zero-client status.
    fn teardown(&self) {
        let state = &self.state;
        if state
            .cleaned_once
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        state.callbacks.log("Closing connections...");

        state.clients.clear();

        if let Some(sock) = state.upstream_sock.lock().unwrap().take() {
            let _ = sock.shutdown(std::net::Shutdown::Both);
        }
        if let Some(sock) = state.downstream_sock.lock().unwrap().take() {
            let _ = sock.shutdown(std::net::Shutdown::Both);
        }
        // Dropping the listeners closes them; no explicit shutdown exists
        // for TcpListener.
        state.upstream_listener.lock().unwrap().take();
        state.downstream_listener.lock().unwrap().take();

        if state.config.mode.downstream_listens() {
            state.callbacks.client_count(0);
            state.callbacks.client_list(&[]);
        }
        state.callbacks.downstream_status(false);
        state.callbacks.upstream_status(false);

        state.callbacks.log("Server shut down.");
    }
}
