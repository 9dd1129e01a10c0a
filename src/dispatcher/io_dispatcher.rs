// src/dispatcher/io_dispatcher.rs

//! Defines `IODispatcher`, the per-worker connection multiplexer.

use crate::config::DispatcherConfig;
use crate::connection::{Channel, DisconnectReason, IOContext, IOContextFactory};
use crate::core::clock::{Clock, Tick};
use crate::core::errors::NetError;
use crate::dispatcher::{IOOperation, IORequestProcessor};
use crate::net::{Interest, IoEvent, Poller, Socket, Token};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, warn};

/// State reachable from other threads: deferred registrations and the
/// connection gauge. Everything here is drained or read by the owning
/// dispatcher's next tick pass.
struct Shared<C> {
    accept_queue: Mutex<VecDeque<Socket>>,
    interest_queue: Mutex<VecDeque<(C, IOOperation)>>,
    open_connections: Arc<AtomicUsize>,
    connection_limit: usize,
}

impl<C> Shared<C> {
    /// Admission check and enqueue for a newly accepted socket. Counts both
    /// open connections and ones still waiting in the queue, so a burst of
    /// accepts cannot overshoot the limit.
    fn admit(&self, socket: Socket) -> Result<(), NetError> {
        let mut queue = self.accept_queue.lock();
        if self.open_connections.load(Ordering::Acquire) + queue.len() >= self.connection_limit {
            return Err(NetError::ConnectionLimit(self.connection_limit));
        }
        queue.push_back(socket);
        Ok(())
    }
}

/// A cheap, non-owning reference to a dispatcher.
///
/// Contexts carry one as their back-reference, and accept threads use one to
/// hand over new sockets. The handle never keeps a dispatcher alive: once the
/// dispatcher is dropped, registrations fail recoverably and re-registered
/// contexts are closed.
pub struct DispatcherHandle<C> {
    shared: Weak<Shared<C>>,
}

impl<C> Clone for DispatcherHandle<C> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<C: IOContext> DispatcherHandle<C> {
    /// Hands a newly accepted socket to the dispatcher. The context is built
    /// and armed for `Read` interest on the dispatcher's next tick pass.
    pub fn register_new_connection(&self, socket: Socket) -> Result<(), NetError> {
        let shared = self.shared.upgrade().ok_or(NetError::DispatcherGone)?;
        shared.admit(socket)
    }

    /// Re-arms a connection after the processor finished `last_operation`.
    ///
    /// The next interest is `Write` when the processor indicated more data
    /// must be written, `Read` otherwise. If a yield event is attached to the
    /// channel the connection is parked instead of re-entering the poller. A
    /// `Disconnect` last operation closes the connection. Takes effect on the
    /// dispatcher's next tick pass.
    pub fn register_channel(&self, context: C, last_operation: IOOperation) {
        match self.shared.upgrade() {
            Some(shared) => {
                shared
                    .interest_queue
                    .lock()
                    .push_back((context, last_operation));
            }
            None => {
                warn!(
                    token = %context.channel().token(),
                    "Dispatcher is gone; closing the re-registered connection."
                );
            }
        }
    }

    /// Number of connections currently owned by the dispatcher.
    pub fn open_connections(&self) -> usize {
        self.shared
            .upgrade()
            .map(|s| s.open_connections.load(Ordering::Acquire))
            .unwrap_or(0)
    }
}

/// Owns a set of connections and produces one ready operation per affected
/// connection per tick.
///
/// Designed to be driven by a single worker thread, cooperatively:
/// [`run`](Self::run) performs one scheduling pass and
/// [`process_io_queue`](Self::process_io_queue) drains the resulting queue
/// through a request processor. Multiple dispatchers may coexist, each owning
/// a disjoint set of connections.
///
/// Within one tick a connection matches at most one branch, in priority
/// order: idle-timeout disconnect, yield-deadline expiry, socket readiness,
/// yield trigger, heartbeat. Across connections, operations are delivered in
/// registration order with no further guarantee.
pub struct IODispatcher<C: IOContext, F: IOContextFactory<C>> {
    config: DispatcherConfig,
    clock: Arc<dyn Clock>,
    poller: Poller,
    factory: F,
    shared: Arc<Shared<C>>,
    /// Registered with the poller, awaiting readiness.
    armed: IndexMap<usize, C>,
    /// Suspended on a yield event; consumes no poller slot.
    parked: IndexMap<usize, C>,
    /// Ready (context, operation) pairs not yet drained by the caller.
    ready: VecDeque<(C, IOOperation)>,
    events: Vec<IoEvent>,
    next_token: usize,
}

impl<C: IOContext, F: IOContextFactory<C>> IODispatcher<C, F> {
    pub fn new(
        config: DispatcherConfig,
        clock: Arc<dyn Clock>,
        poller: Poller,
        factory: F,
    ) -> Result<Self, NetError> {
        config.validate()?;
        let event_capacity = config.event_capacity;
        let shared = Arc::new(Shared {
            accept_queue: Mutex::new(VecDeque::new()),
            interest_queue: Mutex::new(VecDeque::new()),
            open_connections: Arc::new(AtomicUsize::new(0)),
            connection_limit: config.connection_limit,
        });
        Ok(Self {
            config,
            clock,
            poller,
            factory,
            shared,
            armed: IndexMap::new(),
            parked: IndexMap::new(),
            ready: VecDeque::new(),
            events: Vec::with_capacity(event_capacity),
            next_token: 0,
        })
    }

    /// A non-owning handle for contexts and accept threads.
    pub fn handle(&self) -> DispatcherHandle<C> {
        DispatcherHandle {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// See [`DispatcherHandle::register_new_connection`].
    pub fn register_new_connection(&self, socket: Socket) -> Result<(), NetError> {
        self.shared.admit(socket)
    }

    /// Number of connections currently owned by this dispatcher.
    pub fn open_connections(&self) -> usize {
        self.shared.open_connections.load(Ordering::Acquire)
    }

    /// Ready operations waiting to be drained with
    /// [`process_io_queue`](Self::process_io_queue).
    pub fn pending_operations(&self) -> usize {
        self.ready.len()
    }

    /// Performs one scheduling pass.
    ///
    /// Drains deferred registrations, evicts idle connections, resolves
    /// yield events, polls socket readiness for at most `wait_budget`
    /// (zero = non-blocking), and emits due heartbeats. Never performs
    /// protocol work and never fails because of a single connection; an
    /// `Err` here means the readiness mechanism itself is broken. Returns
    /// whether ready operations are pending.
    pub fn run(&mut self, wait_budget: Duration) -> Result<bool, NetError> {
        let now = self.clock.now();
        self.drain_accept_queue(now);
        self.drain_interest_queue(now);
        self.evict_idle(now);
        self.drive_yield_events(now);
        self.poll_readiness(wait_budget)?;
        self.emit_heartbeats(now);
        Ok(!self.ready.is_empty())
    }

    /// Pops one ready (context, operation) pair, if any, and invokes the
    /// processor with it. Returns whether a pair was processed, so callers
    /// can drain fully with `while dispatcher.process_io_queue(&mut p) {}`.
    pub fn process_io_queue<P: IORequestProcessor<C>>(&mut self, processor: &mut P) -> bool {
        let Some((context, operation)) = self.ready.pop_front() else {
            return false;
        };
        let token = context.channel().token();
        debug!(%token, %operation, "Dispatching operation to the request processor.");
        if !processor.on_request(operation, context) {
            debug!(%token, "Request processor declined to re-register the connection.");
        }
        true
    }

    /// Builds contexts for newly accepted sockets and arms them for `Read`.
    fn drain_accept_queue(&mut self, now: Tick) {
        loop {
            let socket = self.shared.accept_queue.lock().pop_front();
            let Some(socket) = socket else { break };
            let token = Token(self.next_token);
            self.next_token += 1;
            let channel = Channel::new(
                socket,
                token,
                self.config.recv_buffer_size,
                now,
                self.shared.open_connections.clone(),
            );
            let handle = self.handle();
            let context = self.factory.new_instance(channel, handle);
            debug!(%token, "Registered new connection.");
            self.arm(context, Interest::Read);
        }
    }

    /// Applies re-registrations queued by the processor on the previous
    /// drain. Real I/O re-arms refresh the idle baseline; heartbeat re-arms
    /// refresh only the heartbeat basis. Connections with an attached yield
    /// event are parked instead of re-entering the poller.
    fn drain_interest_queue(&mut self, now: Tick) {
        loop {
            let entry = self.shared.interest_queue.lock().pop_front();
            let Some((mut context, last_operation)) = entry else {
                break;
            };
            match last_operation {
                IOOperation::Disconnect => {
                    debug!(
                        token = %context.channel().token(),
                        "Releasing disconnected connection."
                    );
                    continue;
                }
                IOOperation::Read | IOOperation::Write => {
                    context.channel_mut().mark_read(now);
                }
                IOOperation::Heartbeat => {
                    context.channel_mut().mark_heartbeat(now);
                }
            }
            if context.channel().yield_event().is_some() {
                context.channel_mut().set_suspended_op(last_operation);
                let token = context.channel().token();
                debug!(%token, "Parking connection on a yield event.");
                self.parked.insert(token.0, context);
            } else {
                let interest = if last_operation == IOOperation::Write {
                    Interest::Write
                } else {
                    Interest::Read
                };
                self.arm(context, interest);
            }
        }
    }

    fn arm(&mut self, mut context: C, interest: Interest) {
        let token = context.channel().token();
        match self
            .poller
            .register(context.channel_mut().socket_mut(), token, interest)
        {
            Ok(()) => {
                self.armed.insert(token.0, context);
            }
            Err(e) => {
                warn!(%token, error = %e, "Failed to arm connection; closing it.");
            }
        }
    }

    /// Evicts connections with no real read activity for the configured idle
    /// timeout. Heartbeat traffic does not postpone eviction, and neither
    /// does a pending yield event.
    fn evict_idle(&mut self, now: Tick) {
        let timeout = self.config.idle_timeout;
        if timeout == 0 {
            return;
        }
        let due_armed: Vec<usize> = self
            .armed
            .iter()
            .filter(|(_, c)| c.channel().idle_due(now, timeout))
            .map(|(t, _)| *t)
            .collect();
        for t in due_armed {
            let Some(mut context) = self.armed.shift_remove(&t) else {
                continue;
            };
            let _ = self.poller.deregister(context.channel_mut().socket_mut());
            self.schedule_disconnect(context, DisconnectReason::IdleTimeout);
        }
        let due_parked: Vec<usize> = self
            .parked
            .iter()
            .filter(|(_, c)| c.channel().idle_due(now, timeout))
            .map(|(t, _)| *t)
            .collect();
        for t in due_parked {
            let Some(context) = self.parked.shift_remove(&t) else {
                continue;
            };
            self.schedule_disconnect(context, DisconnectReason::IdleTimeout);
        }
    }

    /// Resolves yield events for parked connections: deadline expiry wins
    /// over a trigger that lands on the same tick; a trigger resumes the
    /// operation that was pending when the yield began.
    fn drive_yield_events(&mut self, now: Tick) {
        enum Resolution {
            Expired,
            Triggered,
        }
        let mut resolved: Vec<(usize, Resolution)> = Vec::new();
        for (t, context) in &self.parked {
            let Some(event) = context.channel().yield_event() else {
                continue;
            };
            if event.deadline() < now {
                resolved.push((*t, Resolution::Expired));
            } else if event.is_triggered() {
                resolved.push((*t, Resolution::Triggered));
            }
        }
        for (t, resolution) in resolved {
            let Some(mut context) = self.parked.shift_remove(&t) else {
                continue;
            };
            let token = context.channel().token();
            match resolution {
                Resolution::Expired => {
                    if let Some(event) = context.channel_mut().take_yield_event() {
                        event.close_by_timeout();
                    }
                    context.channel_mut().take_suspended_op();
                    self.schedule_disconnect(context, DisconnectReason::YieldTimeout);
                }
                Resolution::Triggered => {
                    if let Some(event) = context.channel_mut().take_yield_event() {
                        event.close();
                    }
                    let operation = context
                        .channel_mut()
                        .take_suspended_op()
                        .unwrap_or(IOOperation::Read);
                    debug!(%token, %operation, "Yield event triggered; resuming.");
                    self.ready.push_back((context, operation));
                }
            }
        }
    }

    /// Collects socket readiness within the wait budget. Per-socket errors
    /// degrade that connection to a disconnect; they never abort the pass.
    fn poll_readiness(&mut self, wait_budget: Duration) -> Result<(), NetError> {
        let mut events = std::mem::take(&mut self.events);
        let result = self.poller.poll(&mut events, wait_budget);
        for ev in &events {
            let Some(mut context) = self.armed.shift_remove(&ev.token.0) else {
                // Stale report for a connection already scheduled elsewhere.
                continue;
            };
            let _ = self.poller.deregister(context.channel_mut().socket_mut());
            if ev.error {
                self.schedule_disconnect(context, DisconnectReason::SocketError);
            } else if ev.readable {
                self.ready.push_back((context, IOOperation::Read));
            } else if ev.writable {
                self.ready.push_back((context, IOOperation::Write));
            } else {
                self.schedule_disconnect(context, DisconnectReason::PeerHangup);
            }
        }
        self.events = events;
        result
    }

    /// Emits a heartbeat for every connection whose threshold was crossed on
    /// an earlier tick, armed or parked alike. A parked connection keeps its
    /// yield event attached across the heartbeat round-trip.
    fn emit_heartbeats(&mut self, now: Tick) {
        let interval = self.config.heartbeat_interval;
        if interval == 0 {
            return;
        }
        let due_armed: Vec<usize> = self
            .armed
            .iter()
            .filter(|(_, c)| c.channel().heartbeat_due(now, interval))
            .map(|(t, _)| *t)
            .collect();
        for t in due_armed {
            let Some(mut context) = self.armed.shift_remove(&t) else {
                continue;
            };
            let _ = self.poller.deregister(context.channel_mut().socket_mut());
            self.ready.push_back((context, IOOperation::Heartbeat));
        }
        let due_parked: Vec<usize> = self
            .parked
            .iter()
            .filter(|(_, c)| c.channel().heartbeat_due(now, interval))
            .map(|(t, _)| *t)
            .collect();
        for t in due_parked {
            let Some(context) = self.parked.shift_remove(&t) else {
                continue;
            };
            self.ready.push_back((context, IOOperation::Heartbeat));
        }
    }

    fn schedule_disconnect(&mut self, mut context: C, reason: DisconnectReason) {
        context.channel_mut().clear_yield_event();
        context.channel_mut().set_disconnect_reason(reason);
        debug!(
            token = %context.channel().token(),
            %reason,
            "Scheduling disconnect."
        );
        self.ready.push_back((context, IOOperation::Disconnect));
    }
}
