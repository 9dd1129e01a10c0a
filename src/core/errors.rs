// src/core/errors.rs

//! Defines the error enum for the networking core.

use thiserror::Error;

/// Errors surfaced by the dispatcher, poller and socket layers.
///
/// Per-connection socket failures are not represented here: the dispatcher
/// demotes those to a `Disconnect` operation for the affected connection
/// instead of returning an error to its caller.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection limit reached ({0})")]
    ConnectionLimit(usize),

    #[error("Socket kind does not match the poller kind")]
    SocketMismatch,

    #[error("Dispatcher is no longer running")]
    DispatcherGone,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
