//! Error types returned by most functions in this crate.
//!
//! Most relay failure modes (a failed connect, a dropped peer, a callback
//! that panics) are not reported through this type at all — they are logged
//! and absorbed by the owning driver loop, per the error taxonomy in
//! `SPEC_FULL.md` §9. [`Error`] only surfaces the subset that a caller of
//! [`crate::RelayEngine::start`] actually needs to react to: a bind/listen
//! failure at startup, or an I/O error while loading/saving persisted
//! configuration.

use thiserror::Error;

/// A specialized `Result` type for this crate's fallible operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A configured listener could not be bound, or a connect role's local
    /// port was already in use. Fatal to the engine: it stops without
    /// entering steady state.
    #[error("{0}")]
    StartupFatal(String),

    /// A `host:port` argument, or a mode string, could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config file error: {0}")]
    Json(#[from] serde_json::Error),
}
