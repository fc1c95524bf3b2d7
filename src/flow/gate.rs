//! Re-armable single-slot wakeup for breaking a multi-wait.
//!
//! The fan-in enumerator arms the gate at the top of every wait cycle and
//! polls it alongside its readers. `listen`/`unlisten`/`dispose` callers
//! signal it after mutating the subscription map, so an already-issued wait
//! on the old reader set wakes immediately.
//!
//! - one consumer awaits, any number of producers signal
//! - repeated signals within a generation collapse into one wakeup
//! - arming starts a new generation; a signal that landed on the previous
//!   generation does not leak into it

use futures::task::AtomicWaker;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

// State word layout: generation in the high bits, two flags in the low bits.
const FIRED: u64 = 0b01;
const CLOSED: u64 = 0b10;
const GENERATION_SHIFT: u32 = 2;

fn generation_of(state: u64) -> u64 {
    state >> GENERATION_SHIFT
}

/// Interrupt gate shared between one waiting consumer and many signalers.
#[derive(Debug, Default)]
pub struct InterruptGate {
    state: AtomicU64,
    waker: AtomicWaker,
}

impl InterruptGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new generation and return a future that completes on the
    /// next signal.
    ///
    /// Any previously returned [`GateWait`] belongs to an older generation
    /// and completes immediately when polled.
    pub fn arm(&self) -> GateWait<'_> {
        let generation = self.arm_generation();
        GateWait {
            gate: self,
            generation,
        }
    }

    pub(crate) fn arm_generation(&self) -> u64 {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let generation = generation_of(current).wrapping_add(1) & (u64::MAX >> GENERATION_SHIFT);
            let flags = if current & CLOSED != 0 { CLOSED | FIRED } else { 0 };
            let next = (generation << GENERATION_SHIFT) | flags;
            match self
                .state
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return generation,
                Err(actual) => current = actual,
            }
        }
    }

    /// Complete the current generation.
    ///
    /// Returns `true` if this call fired it, `false` if it had already fired.
    pub fn signal(&self) -> bool {
        let previous = self.state.fetch_or(FIRED, Ordering::AcqRel);
        if previous & FIRED != 0 {
            return false;
        }
        self.waker.wake();
        true
    }

    /// Fire the current generation and every future one.
    ///
    /// Used on disposal so no consumer can block on the gate again.
    pub fn close(&self) {
        self.state.fetch_or(CLOSED | FIRED, Ordering::AcqRel);
        self.waker.wake();
    }

    pub fn is_closed(&self) -> bool {
        self.state.load(Ordering::Acquire) & CLOSED != 0
    }

    fn is_done(&self, generation: u64) -> bool {
        let state = self.state.load(Ordering::Acquire);
        generation_of(state) != generation || state & FIRED != 0
    }

    pub(crate) fn poll_generation(&self, cx: &mut Context<'_>, generation: u64) -> Poll<()> {
        if self.is_done(generation) {
            return Poll::Ready(());
        }
        self.waker.register(cx.waker());
        // A signal between the first check and `register` woke the old waker.
        if self.is_done(generation) {
            return Poll::Ready(());
        }
        Poll::Pending
    }
}

/// Future for one armed generation of an [`InterruptGate`].
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct GateWait<'a> {
    gate: &'a InterruptGate,
    generation: u64,
}

impl GateWait<'_> {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Future for GateWait<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        self.gate.poll_generation(cx, self.generation)
    }
}
