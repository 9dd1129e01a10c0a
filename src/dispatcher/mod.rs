// src/dispatcher/mod.rs

//! The scheduling core: readiness multiplexing, heartbeat and idle-timeout
//! timing, and yield-event suspension for many concurrent connections.

mod io_dispatcher;

pub use io_dispatcher::{DispatcherHandle, IODispatcher};

use crate::connection::IOContext;
use strum_macros::Display;

/// The operation a ready connection was scheduled for.
///
/// Exactly one operation is produced per connection per tick, even when
/// several conditions hold at once; see the priority rules on
/// [`IODispatcher::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum IOOperation {
    /// The socket has data to read (or the peer closed the read side).
    Read,
    /// The socket is ready for more outbound data.
    Write,
    /// Synthesized by the dispatcher for an otherwise-idle connection.
    Heartbeat,
    /// The connection is being torn down; see
    /// [`Channel::disconnect_reason`](crate::connection::Channel::disconnect_reason).
    Disconnect,
}

/// Consumes ready operations and decides each connection's fate.
///
/// Invoked once per ready (operation, context) pair with ownership of the
/// context. The processor must not block the calling thread on network I/O
/// beyond what the operation already guarantees is ready. To continue I/O it
/// re-registers via
/// [`context.dispatcher().register_channel(context, operation)`](DispatcherHandle::register_channel);
/// dropping the context instead closes the connection. To suspend on
/// asynchronous work it attaches a yield event to the channel before
/// re-registering. The return value reports whether the connection was
/// re-registered, for the dispatcher's bookkeeping.
pub trait IORequestProcessor<C: IOContext> {
    fn on_request(&mut self, operation: IOOperation, context: C) -> bool;
}
