//! Observability hooks.
//!
//! Five optional callback slots, populated by an external collaborator (a
//! GUI tab manager, in the source implementation) after or before
//! construction of the engine. Every invocation is wrapped so that a
//! panicking handler is absorbed and never affects relay liveness — the
//! Rust analogue of the source's blanket `except Exception: pass` around
//! every `on_*` call.
//!
//! `log`/`log_dump` additionally carry the engine's own human-readable log
//! contract (`SPEC_FULL.md` §6.1), kept separate from the `tracing` spans
//! emitted throughout the rest of the crate: a GUI depends on this stream
//! synchronously, regardless of whether a `tracing` subscriber happens to be
//! installed.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::RwLock;

type BoolHook = Box<dyn Fn(bool) + Send + Sync>;
type CountHook = Box<dyn Fn(usize) + Send + Sync>;
type ListHook = Box<dyn Fn(&[String]) + Send + Sync>;
type LogHook = Box<dyn Fn(&str) + Send + Sync>;

/// The engine's five observability hooks.
#[derive(Default)]
pub struct Callbacks {
    on_upstream_status: RwLock<Option<BoolHook>>,
    on_downstream_status: RwLock<Option<BoolHook>>,
    on_client_count: RwLock<Option<CountHook>>,
    on_client_list: RwLock<Option<ListHook>>,
    on_log: RwLock<Option<LogHook>>,
}

/// Runs `f`, swallowing a panic the way the source swallows any exception
/// raised inside a callback. A handler is expected to be fast and
/// non-throwing (`SPEC_FULL.md` §5.8); if it isn't, the relay keeps running.
fn invoke<F: FnOnce()>(f: F) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        tracing::warn!("observability callback panicked; ignoring");
    }
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_on_upstream_status(&self, f: impl Fn(bool) + Send + Sync + 'static) {
        *self.on_upstream_status.write().unwrap() = Some(Box::new(f));
    }

    pub fn set_on_downstream_status(&self, f: impl Fn(bool) + Send + Sync + 'static) {
        *self.on_downstream_status.write().unwrap() = Some(Box::new(f));
    }

    pub fn set_on_client_count(&self, f: impl Fn(usize) + Send + Sync + 'static) {
        *self.on_client_count.write().unwrap() = Some(Box::new(f));
    }

    pub fn set_on_client_list(&self, f: impl Fn(&[String]) + Send + Sync + 'static) {
        *self.on_client_list.write().unwrap() = Some(Box::new(f));
    }

    pub fn set_on_log(&self, f: impl Fn(&str) + Send + Sync + 'static) {
        *self.on_log.write().unwrap() = Some(Box::new(f));
    }

    pub fn has_log_hook(&self) -> bool {
        self.on_log.read().unwrap().is_some()
    }

    pub fn upstream_status(&self, connected: bool) {
        tracing::debug!(connected, "upstream status changed");
        if let Some(hook) = self.on_upstream_status.read().unwrap().as_ref() {
            invoke(|| hook(connected));
        }
    }

    pub fn downstream_status(&self, connected: bool) {
        tracing::debug!(connected, "downstream status changed");
        if let Some(hook) = self.on_downstream_status.read().unwrap().as_ref() {
            invoke(|| hook(connected));
        }
    }

    pub fn client_count(&self, count: usize) {
        tracing::debug!(count, "client count changed");
        if let Some(hook) = self.on_client_count.read().unwrap().as_ref() {
            invoke(|| hook(count));
        }
    }

    pub fn client_list(&self, peers: &[String]) {
        if let Some(hook) = self.on_client_list.read().unwrap().as_ref() {
            invoke(|| hook(peers));
        }
    }

    /// Ordinary log line: always printed to stdout, and also forwarded to
    /// the `on_log` hook when one is installed.
    pub fn log(&self, msg: impl AsRef<str>) {
        let msg = msg.as_ref();
        tracing::info!("{}", msg);
        println!("{msg}");
        if let Some(hook) = self.on_log.read().unwrap().as_ref() {
            invoke(|| hook(msg));
        }
    }

    /// Dump line: goes to the `on_log` hook only when one is installed
    /// (GUI mode); otherwise printed to stdout (headless mode). Never both —
    /// a dump can be large and a GUI that also mirrors it to stdout would
    /// see every payload twice.
    pub fn log_dump(&self, text: &str) {
        if let Some(hook) = self.on_log.read().unwrap().as_ref() {
            invoke(|| hook(text));
        } else {
            println!("{text}");
        }
    }
}
