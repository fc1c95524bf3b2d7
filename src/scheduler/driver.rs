//! The scheduler's single timer task.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::{FaultPolicy, Inner, Phase, Tick};
use crate::observability::metrics;

/// Fire queued entries until the queue empties or `token` is cancelled.
pub(super) async fn run(inner: Arc<Inner>, id: u64, token: CancellationToken) {
    let sleep = tokio::time::sleep_until(inner.origin);
    tokio::pin!(sleep);

    loop {
        let deadline = {
            let mut state = inner.state();
            if token.is_cancelled() {
                return;
            }
            match state.queue.peek_due() {
                Some(due) => {
                    let deadline = inner.deadline(due);
                    state.deadline = Some(deadline);
                    deadline
                }
                None => {
                    if state.driver.as_ref().is_some_and(|d| d.id == id) {
                        state.driver = None;
                    }
                    state.deadline = None;
                    drop(state);
                    inner.phase.send_replace(Phase::Drained);
                    tracing::debug!(driver = id, "Scheduler queue drained");
                    return;
                }
            }
        };

        // A deadline already in the past completes on the next poll.
        sleep.as_mut().reset(deadline);
        tokio::select! {
            biased;
            _ = token.cancelled() => return,
            _ = inner.rearm.notified() => continue,
            _ = &mut sleep => {}
        }

        let (entry, next) = {
            let mut state = inner.state();
            if token.is_cancelled() {
                return;
            }
            let Some(entry) = state.queue.pop_due(inner.elapsed()) else {
                continue;
            };
            state.deadline = state.queue.peek_due().map(|due| inner.deadline(due));
            (entry, state.deadline)
        };
        if let Some(next) = next {
            sleep.as_mut().reset(next);
        }

        let job = entry.payload;
        let remaining = job.batch.remaining.borrow().saturating_sub(1);
        let tick = Tick {
            offset: job.offset,
            due: entry.due,
            remaining,
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| (job.batch.callback)(tick)));
        job.batch.remaining.send_replace(remaining);
        metrics::record_fired();

        if let Err(payload) = outcome {
            let message = panic_message(payload.as_ref());
            metrics::record_callback_fault();
            match inner.config.fault_policy {
                FaultPolicy::Continue => {
                    tracing::error!(driver = id, error = %message, "Scheduled callback panicked, continuing");
                }
                FaultPolicy::Stop => {
                    tracing::error!(driver = id, error = %message, "Scheduled callback panicked, stopping scheduler");
                    {
                        let mut state = inner.state();
                        if state.driver.as_ref().is_some_and(|d| d.id == id) {
                            state.driver = None;
                        }
                        state.started = false;
                        state.deadline = None;
                    }
                    inner.phase.send_replace(Phase::Faulted(message));
                    return;
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "callback panicked".to_string())
}
