//! Error types for the mapping engine.
//!
//! Decode problems and queue overflows are not errors here: they are
//! counters (see `DecodeStats` and `BridgeReceiver::dropped`). Everything in
//! this enum is surfaced synchronously to the caller that caused it.

use thiserror::Error;

use crate::bindings::BindingId;

#[derive(Error, Debug)]
pub enum Error {
    /// Persisted mapping document is structurally invalid
    #[error("invalid mapping document: {0}")]
    Format(String),

    /// Reading or writing a mapping document failed
    #[error("mapping I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// `begin` while a learn session is already armed
    #[error("a learn session is already armed")]
    AlreadyArmed,

    /// `begin` while a captured event has not been read with `poll`
    #[error("a captured learn event has not been read yet")]
    UnreadCapture,

    /// Update/remove/enable on an id the store does not hold
    #[error("unknown binding id {0}")]
    UnknownBinding(BindingId),

    /// The consumer side of the bridge has gone away
    #[error("engine is not running")]
    Disconnected,
}

impl Error {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        Error::Format(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
