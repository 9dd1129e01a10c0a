// src/connection/yield_event.rs

//! Suspension handles for request processing that must wait on asynchronous
//! background work.
//!
//! A connection "yields" when its processor attaches a [`YieldEvent`] to the
//! channel: the dispatcher stops polling the socket and instead watches the
//! event every tick. The producer of the background work holds a clone of the
//! same event and calls [`YieldEvent::trigger`] exactly once, from any
//! thread, when the work completes. If the deadline elapses first, the
//! dispatcher closes the event as expired and schedules a disconnect.

use crate::core::clock::Tick;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

const CREATED: u8 = 0;
const TRIGGERED: u8 = 1;
const EXPIRED: u8 = 2;

/// A handle to one outstanding unit of asynchronous work.
///
/// Clones share state; the connection side and the producer side each keep a
/// handle. Closing is an idempotent single-shot latch either side may flip.
/// Full release happens when the last handle drops, but
/// [`is_closed_by_at_least_one_side`](Self::is_closed_by_at_least_one_side)
/// reports the latch as soon as one side has initiated it.
#[derive(Clone, Debug)]
pub struct YieldEvent {
    inner: Arc<YieldEventState>,
}

#[derive(Debug)]
struct YieldEventState {
    state: AtomicU8,
    closed: AtomicBool,
    deadline: AtomicU64,
}

impl YieldEvent {
    fn new(deadline: Tick) -> Self {
        Self {
            inner: Arc::new(YieldEventState {
                state: AtomicU8::new(CREATED),
                closed: AtomicBool::new(false),
                deadline: AtomicU64::new(deadline),
            }),
        }
    }

    /// Marks the background work as complete.
    ///
    /// A single atomic transition, safe to call concurrently with the
    /// dispatcher's tick pass and observable by the next tick. Returns
    /// whether this call performed the transition: repeated triggers and
    /// triggers against a closed event are no-ops.
    pub fn trigger(&self) -> bool {
        if self.inner.closed.load(Ordering::Acquire) {
            return false;
        }
        self.inner
            .state
            .compare_exchange(CREATED, TRIGGERED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == TRIGGERED
    }

    /// Absolute tick after which an untriggered event expires.
    pub fn deadline(&self) -> Tick {
        self.inner.deadline.load(Ordering::Acquire)
    }

    pub fn set_deadline(&self, deadline: Tick) {
        self.inner.deadline.store(deadline, Ordering::Release);
    }

    /// Closes the event from this side. Idempotent; safe from either side.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }

    /// Expires the event: the deadline elapsed before any trigger. Expiry
    /// implies closed. Called by the dispatcher's tick pass.
    pub(crate) fn close_by_timeout(&self) {
        let _ = self.inner.state.compare_exchange(
            CREATED,
            EXPIRED,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.close();
    }

    /// Whether the deadline elapsed before the trigger.
    pub fn is_closed_by_timeout(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == EXPIRED
    }

    /// True as soon as either side has initiated closing, even if the other
    /// side still holds its handle.
    pub fn is_closed_by_at_least_one_side(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

/// Builds yield events for processors that need to suspend a connection.
#[derive(Debug, Clone)]
pub struct YieldEventFactory {
    default_deadline: Tick,
}

impl YieldEventFactory {
    /// Factory producing events with no effective deadline; callers assign
    /// one with [`YieldEvent::set_deadline`] when the work is bounded.
    pub fn new() -> Self {
        Self {
            default_deadline: Tick::MAX,
        }
    }

    /// Factory producing events that start with the given absolute deadline,
    /// unless a caller overrides it per event.
    pub fn with_default_deadline(default_deadline: Tick) -> Self {
        Self { default_deadline }
    }

    pub fn new_instance(&self) -> YieldEvent {
        YieldEvent::new(self.default_deadline)
    }
}

impl Default for YieldEventFactory {
    fn default() -> Self {
        Self::new()
    }
}
