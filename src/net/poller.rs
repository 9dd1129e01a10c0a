// src/net/poller.rs

//! Readiness multiplexing over registered sockets.
//!
//! Wraps the OS readiness mechanism (epoll/kqueue via `mio`) and the
//! in-memory simulator behind one type, so the dispatcher drives production
//! and test transports identically. The poller reports readiness; it never
//! owns sockets and never blocks past the caller's wait budget.

use crate::core::errors::NetError;
use crate::net::sim::SimPoller;
use crate::net::socket::Socket;
use std::io;
use std::time::Duration;

/// Stable registration key of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(pub usize);

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The single I/O interest a connection is armed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Read,
    Write,
}

/// One readiness report. Per-handle errors arrive here (`error == true`)
/// rather than failing the poll pass; the dispatcher turns them into a
/// disconnect for that connection only.
#[derive(Debug, Clone, Copy)]
pub struct IoEvent {
    pub token: Token,
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
}

/// An enum to wrap the production and simulated readiness pollers into a
/// single type.
pub enum Poller {
    Os(OsPoller),
    Sim(SimPoller),
}

/// Readiness via `mio::Poll`.
pub struct OsPoller {
    poll: mio::Poll,
    events: mio::Events,
}

impl Poller {
    /// Creates the production poller. `event_capacity` bounds how many
    /// readiness reports a single poll pass can return.
    pub fn os(event_capacity: usize) -> io::Result<Self> {
        Ok(Poller::Os(OsPoller {
            poll: mio::Poll::new()?,
            events: mio::Events::with_capacity(event_capacity),
        }))
    }

    /// Creates the deterministic in-memory poller.
    pub fn sim() -> Self {
        Poller::Sim(SimPoller::default())
    }

    /// Registers a socket for one interest. The socket must not currently be
    /// registered; the dispatcher deregisters before handing a connection to
    /// the processor and registers afresh on re-arm.
    pub fn register(
        &mut self,
        socket: &mut Socket,
        token: Token,
        interest: Interest,
    ) -> Result<(), NetError> {
        match (self, socket) {
            (Poller::Os(os), Socket::Tcp(stream)) => {
                let mio_interest = match interest {
                    Interest::Read => mio::Interest::READABLE,
                    Interest::Write => mio::Interest::WRITABLE,
                };
                os.poll
                    .registry()
                    .register(stream, mio::Token(token.0), mio_interest)?;
                Ok(())
            }
            (Poller::Sim(sim), Socket::Sim(s)) => {
                sim.register(s.shared_handle(), token, interest);
                Ok(())
            }
            _ => Err(NetError::SocketMismatch),
        }
    }

    /// Removes a socket from the poller.
    pub fn deregister(&mut self, socket: &mut Socket) -> Result<(), NetError> {
        match (self, socket) {
            (Poller::Os(os), Socket::Tcp(stream)) => {
                os.poll.registry().deregister(stream)?;
                Ok(())
            }
            (Poller::Sim(sim), Socket::Sim(s)) => {
                sim.deregister(&s.shared_handle());
                Ok(())
            }
            _ => Err(NetError::SocketMismatch),
        }
    }

    /// Collects readiness for registered sockets, waiting at most `budget`
    /// (zero polls non-blocking). Events are appended in registration order
    /// for the simulator and in kernel report order for the OS poller.
    pub fn poll(&mut self, out: &mut Vec<IoEvent>, budget: Duration) -> Result<(), NetError> {
        out.clear();
        match self {
            Poller::Os(os) => {
                if let Err(e) = os.poll.poll(&mut os.events, Some(budget)) {
                    // A signal interrupting the wait is not a poller failure.
                    if e.kind() == io::ErrorKind::Interrupted {
                        return Ok(());
                    }
                    return Err(e.into());
                }
                for ev in os.events.iter() {
                    out.push(IoEvent {
                        token: Token(ev.token().0),
                        readable: ev.is_readable() || ev.is_read_closed(),
                        writable: ev.is_writable(),
                        error: ev.is_error(),
                    });
                }
                Ok(())
            }
            Poller::Sim(sim) => {
                sim.poll(out);
                Ok(())
            }
        }
    }
}
