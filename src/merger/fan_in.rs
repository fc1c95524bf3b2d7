//! Fan-in enumerator: merges every subscription reader plus the interrupt
//! gate into one sequence.
//!
//! Each wait cycle:
//! 1. arm the gate, then (under the registry lock) apply pending removals
//!    and adopt new readers
//! 2. no readers left → `Completed`
//! 3. poll the gate and every reader, round-robin from the last hit
//! 4. gate fired → start a new cycle; reader closed cleanly → drop it and
//!    start a new cycle; reader faulted → surface the fault, `Faulted`
//!
//! Arming before reading the registry means a `listen`/`unlisten` that lands
//! after the read always fires the armed generation.

use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use super::registry::ReaderSlot;
use super::Shared;
use crate::error::MergerError;
use crate::observability::metrics;

/// Lifecycle of a [`FanIn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanInState {
    /// Created, not yet polled.
    Idle,
    /// Waiting for a reader or the gate.
    Waiting,
    /// `current()` holds the latest item.
    HasItem,
    /// A reader closed; moving on to the others.
    Draining,
    /// Every reader closed or the merger was disposed.
    Completed,
    /// A source faulted; the fault was returned once.
    Faulted,
}

impl FanInState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Faulted)
    }
}

/// Merged sequence over a [`Merger`](super::Merger)'s subscriptions.
///
/// Only one `FanIn` per merger is alive at a time. Dropping it hands unread
/// readers back to the merger so a later enumerator resumes from them.
pub struct FanIn<T> {
    shared: Arc<Shared<T>>,
    readers: Vec<ReaderSlot<T>>,
    current: Option<T>,
    state: FanInState,
    cursor: usize,
}

// No field is ever pinned.
impl<T> Unpin for FanIn<T> {}

impl<T> FanIn<T> {
    pub(crate) fn new(shared: Arc<Shared<T>>) -> Self {
        Self {
            shared,
            readers: Vec::new(),
            current: None,
            state: FanInState::Idle,
            cursor: 0,
        }
    }

    pub fn state(&self) -> FanInState {
        self.state
    }

    /// The item produced by the last successful `move_next`.
    pub fn current(&self) -> Option<&T> {
        self.current.as_ref()
    }

    /// Number of readers adopted by this enumerator.
    pub fn active_readers(&self) -> usize {
        self.readers.len()
    }

    /// Advance to the next merged item.
    ///
    /// Returns `Ok(true)` with the item in [`current`](Self::current),
    /// `Ok(false)` once the sequence is complete (and on every call after),
    /// or the fault of the first source that closed with an error.
    pub async fn move_next(&mut self) -> Result<bool, MergerError> {
        std::future::poll_fn(|cx| self.poll_advance(cx)).await
    }

    /// Advance and take the item.
    pub async fn next_item(&mut self) -> Result<Option<T>, MergerError> {
        if self.move_next().await? {
            Ok(self.current.take())
        } else {
            Ok(None)
        }
    }

    /// Tear down the owning merger: every reader is marked for removal and
    /// the gate is signaled and closed.
    pub fn dispose(self) {
        self.shared.dispose();
    }

    fn poll_advance(&mut self, cx: &mut Context<'_>) -> Poll<Result<bool, MergerError>> {
        if self.state.is_terminal() {
            return Poll::Ready(Ok(false));
        }
        self.current = None;

        let shared = Arc::clone(&self.shared);
        'cycle: loop {
            let generation = shared.gate.arm_generation();
            let mut registry = shared.registry();
            registry.sync(&mut self.readers);

            if self.readers.is_empty() {
                self.state = FanInState::Completed;
                tracing::debug!("Fan-in completed");
                return Poll::Ready(Ok(false));
            }

            self.state = FanInState::Waiting;
            if shared.gate.poll_generation(cx, generation).is_ready() {
                continue 'cycle;
            }

            let len = self.readers.len();
            for offset in 0..len {
                let index = (self.cursor + offset) % len;
                let Poll::Ready(delivery) = self.readers[index].reader.poll_recv(cx) else {
                    continue;
                };

                match delivery {
                    Some(Ok(item)) => {
                        self.cursor = (index + 1) % len;
                        self.current = Some(item);
                        self.state = FanInState::HasItem;
                        metrics::record_merged();
                        return Poll::Ready(Ok(true));
                    }
                    Some(Err(fault)) => {
                        let slot = self.readers.remove(index);
                        if let Some(entry) = registry.finish(slot.id) {
                            entry.source.unsubscribe(slot.id);
                            metrics::record_subscriptions(-1);
                        }
                        self.state = FanInState::Faulted;
                        tracing::warn!(
                            source = %slot.source_id,
                            subscription = %slot.id,
                            error = %fault,
                            "Source faulted, ending fan-in"
                        );
                        return Poll::Ready(Err(MergerError::Faulted {
                            source_id: slot.source_id,
                            fault,
                        }));
                    }
                    None => {
                        let slot = self.readers.remove(index);
                        if let Some(entry) = registry.finish(slot.id) {
                            entry.source.unsubscribe(slot.id);
                            metrics::record_subscriptions(-1);
                        }
                        self.state = FanInState::Draining;
                        self.cursor = index;
                        tracing::debug!(
                            source = %slot.source_id,
                            subscription = %slot.id,
                            remaining = self.readers.len(),
                            "Source completed, reader dropped"
                        );
                        continue 'cycle;
                    }
                }
            }
            return Poll::Pending;
        }
    }
}

impl<T> Drop for FanIn<T> {
    fn drop(&mut self) {
        let readers = std::mem::take(&mut self.readers);
        self.shared.registry().release(readers);
    }
}

impl<T> Stream for FanIn<T> {
    type Item = Result<T, MergerError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match ready!(this.poll_advance(cx)) {
            Ok(true) => Poll::Ready(this.current.take().map(Ok)),
            Ok(false) => Poll::Ready(None),
            Err(err) => Poll::Ready(Some(Err(err))),
        }
    }
}
