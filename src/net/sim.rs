// src/net/sim.rs

//! An in-memory network used to test dispatcher scheduling without real
//! sockets.
//!
//! [`SimNet::pair`] produces the two ends of a connection: a [`Socket`] for
//! the server side, registered with the dispatcher like any TCP stream, and a
//! [`SimPeer`] kept by the test to play the client. Readiness is derived
//! directly from buffered bytes, so a byte written by the peer is observed by
//! the very next poll; there is no timing slack to account for in tick
//! arithmetic.

use crate::net::poller::{Interest, IoEvent, Token};
use crate::net::socket::Socket;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Factory for simulated connections and the poller that watches them.
#[derive(Debug, Default)]
pub struct SimNet;

impl SimNet {
    pub fn new() -> Self {
        Self
    }

    /// Creates a connected pair: the server-side socket and the test-side
    /// peer handle.
    pub fn pair(&self) -> (Socket, SimPeer) {
        let shared = Arc::new(SimShared::default());
        (
            Socket::Sim(SimSocket {
                shared: shared.clone(),
            }),
            SimPeer { shared },
        )
    }
}

/// State shared between the two ends of one simulated connection.
#[derive(Debug, Default)]
struct SimShared {
    to_server: Mutex<VecDeque<u8>>,
    to_peer: Mutex<VecDeque<u8>>,
    server_closed: AtomicBool,
    peer_closed: AtomicBool,
}

/// The server-side end of a simulated connection.
///
/// Mirrors non-blocking TCP semantics: reads drain buffered bytes or return
/// `WouldBlock`, a read against a hung-up peer returns `Ok(0)`, and dropping
/// the socket closes the connection for the peer to observe.
pub struct SimSocket {
    shared: Arc<SimShared>,
}

impl SimSocket {
    pub(crate) fn shared_handle(&self) -> SimHandle {
        SimHandle {
            shared: self.shared.clone(),
        }
    }
}

impl Read for SimSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut inbound = self.shared.to_server.lock();
        if inbound.is_empty() {
            return if self.shared.peer_closed.load(Ordering::Acquire) {
                Ok(0)
            } else {
                Err(io::ErrorKind::WouldBlock.into())
            };
        }
        let n = buf.len().min(inbound.len());
        for slot in buf.iter_mut().take(n) {
            *slot = inbound.pop_front().unwrap();
        }
        Ok(n)
    }
}

impl Write for SimSocket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.shared.peer_closed.load(Ordering::Acquire) {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        self.shared.to_peer.lock().extend(buf.iter().copied());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for SimSocket {
    fn drop(&mut self) {
        self.shared.server_closed.store(true, Ordering::Release);
    }
}

/// The test-side end of a simulated connection.
pub struct SimPeer {
    shared: Arc<SimShared>,
}

impl SimPeer {
    /// Sends bytes towards the server socket. Fails once the server side has
    /// closed, like a send against a reset connection.
    pub fn send(&self, bytes: &[u8]) -> io::Result<usize> {
        if self.shared.server_closed.load(Ordering::Acquire) {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        self.shared.to_server.lock().extend(bytes.iter().copied());
        Ok(bytes.len())
    }

    /// Drains everything the server has written so far.
    pub fn take_received(&self) -> Vec<u8> {
        self.shared.to_peer.lock().drain(..).collect()
    }

    /// Whether the server side has closed the connection.
    pub fn is_server_closed(&self) -> bool {
        self.shared.server_closed.load(Ordering::Acquire)
    }

    /// Hangs up the client side without dropping the handle.
    pub fn hang_up(&self) {
        self.shared.peer_closed.store(true, Ordering::Release);
    }
}

impl Drop for SimPeer {
    fn drop(&mut self) {
        self.shared.peer_closed.store(true, Ordering::Release);
    }
}

/// Opaque reference used by the poller to track one registered connection.
pub(crate) struct SimHandle {
    shared: Arc<SimShared>,
}

/// Deterministic readiness poller over simulated connections.
///
/// Readiness is reported in registration order; the wait budget is ignored
/// since nothing ever blocks.
#[derive(Default)]
pub struct SimPoller {
    slots: Vec<(Token, Interest, SimHandle)>,
}

impl SimPoller {
    pub(crate) fn register(&mut self, handle: SimHandle, token: Token, interest: Interest) {
        self.deregister(&handle);
        self.slots.push((token, interest, handle));
    }

    pub(crate) fn deregister(&mut self, handle: &SimHandle) {
        self.slots
            .retain(|(_, _, h)| !Arc::ptr_eq(&h.shared, &handle.shared));
    }

    pub(crate) fn poll(&mut self, events: &mut Vec<IoEvent>) {
        for (token, interest, handle) in &self.slots {
            let shared = &handle.shared;
            let readable = *interest == Interest::Read
                && (!shared.to_server.lock().is_empty()
                    || shared.peer_closed.load(Ordering::Acquire));
            let writable = *interest == Interest::Write;
            if readable || writable {
                events.push(IoEvent {
                    token: *token,
                    readable,
                    writable,
                    error: false,
                });
            }
        }
    }
}
