// src/net/socket.rs

//! Owned, non-blocking socket resources.

use crate::net::sim::SimSocket;
use mio::net::TcpStream;
use std::io::{self, Read, Write};
use std::net::SocketAddr;

/// An enum to wrap different socket types (real TCP or simulated) into a
/// single owned type.
///
/// The socket is exclusively owned by its connection channel until closed;
/// dropping it releases the underlying resource exactly once.
pub enum Socket {
    Tcp(TcpStream),
    Sim(SimSocket),
}

impl Socket {
    /// Wraps an accepted standard-library stream, switching it to
    /// non-blocking mode.
    pub fn from_std(stream: std::net::TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(Socket::Tcp(TcpStream::from_std(stream)))
    }

    /// The remote address, where the transport has one.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        match self {
            Socket::Tcp(s) => s.peer_addr().ok(),
            Socket::Sim(_) => None,
        }
    }
}

impl Read for Socket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Socket::Tcp(s) => s.read(buf),
            Socket::Sim(s) => s.read(buf),
        }
    }
}

impl Write for Socket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Socket::Tcp(s) => s.write(buf),
            Socket::Sim(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Socket::Tcp(s) => s.flush(),
            Socket::Sim(s) => s.flush(),
        }
    }
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Socket::Tcp(s) => f.debug_tuple("Tcp").field(&s.peer_addr().ok()).finish(),
            Socket::Sim(_) => f.debug_tuple("Sim").finish(),
        }
    }
}
