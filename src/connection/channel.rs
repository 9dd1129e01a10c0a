// src/connection/channel.rs

//! Defines `Channel`, the resource-owning half of a connection context.

use crate::connection::yield_event::YieldEvent;
use crate::core::clock::Tick;
use crate::dispatcher::IOOperation;
use crate::net::{Socket, Token};
use bytes::BytesMut;
use std::io::{self, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use strum_macros::Display;
use tracing::debug;

/// Why the dispatcher scheduled a `Disconnect` for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum DisconnectReason {
    /// The peer closed or reset the connection.
    PeerHangup,
    /// The poller reported an error on the socket.
    SocketError,
    /// No real read activity for the configured idle timeout.
    IdleTimeout,
    /// An attached yield event passed its deadline before being triggered.
    YieldTimeout,
}

/// Per-connection state and resource owner tracked by the dispatcher.
///
/// The channel exclusively owns the socket and the receive buffer, and holds
/// at most one pending yield event. Dropping the channel is the single close
/// path: it releases the socket, closes any attached yield event, and frees
/// the buffer exactly once. Protocol layers embed a `Channel` in their own
/// context type (see `IOContext`).
pub struct Channel {
    socket: Socket,
    token: Token,
    recv_buf: BytesMut,
    last_read_tick: Tick,
    last_heartbeat_tick: Option<Tick>,
    yield_event: Option<YieldEvent>,
    suspended_op: Option<IOOperation>,
    disconnect_reason: Option<DisconnectReason>,
    open_connections: Arc<AtomicUsize>,
}

impl Channel {
    pub(crate) fn new(
        socket: Socket,
        token: Token,
        recv_capacity: usize,
        registered_at: Tick,
        open_connections: Arc<AtomicUsize>,
    ) -> Self {
        open_connections.fetch_add(1, Ordering::AcqRel);
        Self {
            socket,
            token,
            recv_buf: BytesMut::with_capacity(recv_capacity),
            last_read_tick: registered_at,
            last_heartbeat_tick: None,
            yield_event: None,
            suspended_op: None,
            disconnect_reason: None,
            open_connections,
        }
    }

    pub fn socket(&self) -> &Socket {
        &self.socket
    }

    pub fn socket_mut(&mut self) -> &mut Socket {
        &mut self.socket
    }

    /// The poller registration token, stable for the connection's lifetime.
    pub fn token(&self) -> Token {
        self.token
    }

    /// Bytes read from the socket and not yet consumed by the processor.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.recv_buf
    }

    /// Reads available bytes from the socket into the receive buffer.
    ///
    /// Returns the number of bytes appended. `Ok(0)` means the peer closed
    /// the read side; [`io::ErrorKind::WouldBlock`] means no data was
    /// available at all (it is swallowed once at least one chunk was read).
    pub fn read_into_buffer(&mut self) -> io::Result<usize> {
        let mut total = 0usize;
        let mut chunk = [0u8; 4096];
        loop {
            match self.socket.read(&mut chunk) {
                Ok(0) => {
                    if total == 0 {
                        return Ok(0);
                    }
                    return Ok(total);
                }
                Ok(n) => {
                    self.recv_buf.extend_from_slice(&chunk[..n]);
                    total += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if total == 0 {
                        return Err(e);
                    }
                    return Ok(total);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Attaches a yield event, suspending the connection until the event is
    /// triggered or expires. At most one event may be attached; attaching
    /// over an existing one closes the previous event first.
    pub fn attach_yield_event(&mut self, event: YieldEvent) {
        if let Some(previous) = self.yield_event.replace(event) {
            debug!(
                token = %self.token,
                "Replacing a pending yield event; closing the previous one."
            );
            previous.close();
        }
    }

    pub fn yield_event(&self) -> Option<&YieldEvent> {
        self.yield_event.as_ref()
    }

    /// Detaches the pending yield event, if any, without closing it.
    pub fn take_yield_event(&mut self) -> Option<YieldEvent> {
        self.yield_event.take()
    }

    /// Detaches and closes the pending yield event, if any.
    pub fn clear_yield_event(&mut self) {
        if let Some(event) = self.yield_event.take() {
            event.close();
        }
        self.suspended_op = None;
    }

    /// Why the dispatcher most recently scheduled a disconnect, if it has.
    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        self.disconnect_reason
    }

    pub(crate) fn set_disconnect_reason(&mut self, reason: DisconnectReason) {
        self.disconnect_reason = Some(reason);
    }

    /// Logical time of the last real (non-heartbeat) I/O re-arm.
    pub fn last_read_tick(&self) -> Tick {
        self.last_read_tick
    }

    /// Logical time of the last heartbeat re-arm, if any.
    pub fn last_heartbeat_tick(&self) -> Option<Tick> {
        self.last_heartbeat_tick
    }

    pub(crate) fn mark_read(&mut self, now: Tick) {
        self.last_read_tick = now;
    }

    pub(crate) fn mark_heartbeat(&mut self, now: Tick) {
        self.last_heartbeat_tick = Some(now);
    }

    /// The heartbeat threshold is measured from whichever re-arm happened
    /// last, a real read or a heartbeat. The strict comparison makes a
    /// heartbeat fire on the tick after the threshold is first satisfied.
    pub(crate) fn heartbeat_due(&self, now: Tick, interval: Tick) -> bool {
        if interval == 0 {
            return false;
        }
        let basis = match self.last_heartbeat_tick {
            Some(hb) => hb.max(self.last_read_tick),
            None => self.last_read_tick,
        };
        basis.saturating_add(interval) < now
    }

    /// Idle eviction considers only real read activity; heartbeat traffic
    /// never postpones it.
    pub(crate) fn idle_due(&self, now: Tick, timeout: Tick) -> bool {
        if timeout == 0 {
            return false;
        }
        self.last_read_tick.saturating_add(timeout) < now
    }

    pub(crate) fn set_suspended_op(&mut self, op: IOOperation) {
        if self.suspended_op.is_none() {
            self.suspended_op = Some(op);
        }
    }

    pub(crate) fn take_suspended_op(&mut self) -> Option<IOOperation> {
        self.suspended_op.take()
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.clear_yield_event();
        self.open_connections.fetch_sub(1, Ordering::AcqRel);
        debug!(token = %self.token, "Channel closed, resources released.");
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("token", &self.token)
            .field("last_read_tick", &self.last_read_tick)
            .field("last_heartbeat_tick", &self.last_heartbeat_tick)
            .field("suspended", &self.yield_event.is_some())
            .finish()
    }
}
