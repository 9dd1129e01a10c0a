// tests/common/mod.rs

//! Shared helpers for the dispatcher test suite: a context type that
//! self-checks heartbeat cadence invariants, request processors that record
//! delivered operations, and setup glue.

#![allow(dead_code)]

use chronodb_net::{
    Channel, Clock, DisconnectReason, DispatcherConfig, DispatcherHandle, IOContext, IOContextFactory,
    IODispatcher, IOOperation, IORequestProcessor, ManualClock, Poller, SimNet, Tick, YieldEvent,
};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Everything the processors record, keyed by connection token.
#[derive(Debug, Default)]
pub struct OpLog {
    pub heartbeats: BTreeMap<usize, Vec<Tick>>,
    pub reads: BTreeMap<usize, Vec<Tick>>,
    pub writes: BTreeMap<usize, Vec<Tick>>,
    pub disconnects: BTreeMap<usize, (Tick, Option<DisconnectReason>)>,
    pub resumes: Vec<(usize, Tick, IOOperation)>,
}

pub type SharedOpLog = Rc<RefCell<OpLog>>;

pub fn shared_op_log() -> SharedOpLog {
    Rc::new(RefCell::new(OpLog::default()))
}

/// A connection context that asserts the heartbeat timing contract as
/// operations are delivered to it.
///
/// The contract: with interval `H` and no reads, the first heartbeat arrives
/// at tick `H + 1` and each following one exactly `H + 2` ticks after the
/// previous; a real read at tick `R` moves the next heartbeat to `R + H + 2`.
pub struct TestContext {
    channel: Channel,
    dispatcher: DispatcherHandle<TestContext>,
    heartbeat_interval: Tick,
    previous_heartbeat_tick: Option<Tick>,
    previous_read_tick: Tick,
    previous_event_was_heartbeat: bool,
}

impl TestContext {
    pub fn new(
        channel: Channel,
        dispatcher: DispatcherHandle<TestContext>,
        heartbeat_interval: Tick,
    ) -> Self {
        Self {
            channel,
            dispatcher,
            heartbeat_interval,
            previous_heartbeat_tick: None,
            previous_read_tick: 0,
            previous_event_was_heartbeat: true,
        }
    }

    pub fn check_invariant(&mut self, operation: IOOperation, current: Tick) {
        let h = self.heartbeat_interval;
        match operation {
            IOOperation::Heartbeat => {
                if self.previous_event_was_heartbeat {
                    match self.previous_heartbeat_tick {
                        // One tick to detect the threshold, one to re-arm.
                        None => assert_eq!(h + 1, current, "first heartbeat tick"),
                        Some(previous) => {
                            assert_eq!(h + 2, current - previous, "heartbeat cadence")
                        }
                    }
                } else {
                    assert_eq!(
                        h + 2,
                        current - self.previous_read_tick,
                        "heartbeat after read"
                    );
                }
                self.previous_heartbeat_tick = Some(current);
                self.previous_event_was_heartbeat = true;
            }
            IOOperation::Read => {
                let n = self
                    .channel
                    .read_into_buffer()
                    .expect("read readiness with no readable data");
                assert!(n > 0, "read readiness delivered zero bytes");
                self.channel.buffer_mut().clear();
                self.previous_read_tick = current;
                self.previous_event_was_heartbeat = false;
            }
            IOOperation::Write | IOOperation::Disconnect => {}
        }
    }
}

impl IOContext for TestContext {
    fn channel(&self) -> &Channel {
        &self.channel
    }

    fn channel_mut(&mut self) -> &mut Channel {
        &mut self.channel
    }

    fn dispatcher(&self) -> DispatcherHandle<TestContext> {
        self.dispatcher.clone()
    }
}

/// Factory wiring `TestContext` into a dispatcher.
pub struct TestContextFactory {
    pub heartbeat_interval: Tick,
    pub created: usize,
}

impl TestContextFactory {
    pub fn new(heartbeat_interval: Tick) -> Self {
        Self {
            heartbeat_interval,
            created: 0,
        }
    }
}

impl IOContextFactory<TestContext> for TestContextFactory {
    fn new_instance(
        &mut self,
        channel: Channel,
        dispatcher: DispatcherHandle<TestContext>,
    ) -> TestContext {
        self.created += 1;
        TestContext::new(channel, dispatcher, self.heartbeat_interval)
    }
}

/// Checks invariants, records every delivered operation, and re-registers
/// the connection for more I/O until a disconnect arrives.
pub struct TestProcessor {
    clock: Arc<ManualClock>,
    log: SharedOpLog,
}

impl TestProcessor {
    pub fn new(clock: Arc<ManualClock>, log: SharedOpLog) -> Self {
        Self { clock, log }
    }
}

impl IORequestProcessor<TestContext> for TestProcessor {
    fn on_request(&mut self, operation: IOOperation, mut context: TestContext) -> bool {
        let now = self.clock.now();
        let token = context.channel().token().0;
        record(&self.log, token, operation, now, &context);
        if operation == IOOperation::Disconnect {
            return false;
        }
        context.check_invariant(operation, now);
        let dispatcher = context.dispatcher();
        dispatcher.register_channel(context, operation);
        true
    }
}

/// Like `TestProcessor`, but suspends the connection on its first real read
/// by attaching the given yield event, and records the resumed operation
/// once the event resolves.
pub struct YieldingTestProcessor {
    clock: Arc<ManualClock>,
    log: SharedOpLog,
    yield_event: YieldEvent,
    already_yielded: bool,
}

impl YieldingTestProcessor {
    pub fn new(clock: Arc<ManualClock>, log: SharedOpLog, yield_event: YieldEvent) -> Self {
        Self {
            clock,
            log,
            yield_event,
            already_yielded: false,
        }
    }
}

impl IORequestProcessor<TestContext> for YieldingTestProcessor {
    fn on_request(&mut self, operation: IOOperation, mut context: TestContext) -> bool {
        let now = self.clock.now();
        let token = context.channel().token().0;
        if operation == IOOperation::Disconnect {
            record(&self.log, token, operation, now, &context);
            return false;
        }
        if operation == IOOperation::Heartbeat {
            record(&self.log, token, operation, now, &context);
            context.check_invariant(operation, now);
        } else if !self.already_yielded {
            record(&self.log, token, operation, now, &context);
            context.check_invariant(operation, now);
            context
                .channel_mut()
                .attach_yield_event(self.yield_event.clone());
            self.already_yielded = true;
        } else {
            // The operation that was pending when the yield began, resumed.
            self.log.borrow_mut().resumes.push((token, now, operation));
        }
        let dispatcher = context.dispatcher();
        dispatcher.register_channel(context, operation);
        true
    }
}

fn record(log: &SharedOpLog, token: usize, operation: IOOperation, now: Tick, cx: &TestContext) {
    let mut log = log.borrow_mut();
    match operation {
        IOOperation::Heartbeat => log.heartbeats.entry(token).or_default().push(now),
        IOOperation::Read => log.reads.entry(token).or_default().push(now),
        IOOperation::Write => log.writes.entry(token).or_default().push(now),
        IOOperation::Disconnect => {
            log.disconnects
                .insert(token, (now, cx.channel().disconnect_reason()));
        }
    }
}

/// A dispatcher over the in-memory network with a manually stepped clock.
pub struct SimFixture {
    pub dispatcher: IODispatcher<TestContext, TestContextFactory>,
    pub clock: Arc<ManualClock>,
    pub net: SimNet,
}

pub fn sim_fixture(config: DispatcherConfig) -> SimFixture {
    init_tracing();
    let clock = Arc::new(ManualClock::new());
    let net = SimNet::new();
    let factory = TestContextFactory::new(config.heartbeat_interval);
    let dispatcher = IODispatcher::new(config, clock.clone(), Poller::sim(), factory)
        .expect("valid dispatcher configuration");
    SimFixture {
        dispatcher,
        clock,
        net,
    }
}

impl SimFixture {
    /// One test tick: set the clock, run a scheduling pass, drain the queue.
    pub fn tick<P: IORequestProcessor<TestContext>>(&mut self, tick: Tick, processor: &mut P) {
        self.clock.set_current(tick);
        self.dispatcher
            .run(std::time::Duration::ZERO)
            .expect("scheduling pass");
        while self.dispatcher.process_io_queue(processor) {}
    }
}

/// The expected heartbeat delivery ticks for an otherwise-idle connection
/// registered at tick 0: `H + 1`, then every `H + 2`, up to `last` inclusive.
pub fn expected_heartbeat_ticks(h: Tick, last: Tick) -> Vec<Tick> {
    let mut expected = Vec::new();
    let mut next = h + 1;
    while next <= last {
        expected.push(next);
        next += h + 2;
    }
    expected
}
