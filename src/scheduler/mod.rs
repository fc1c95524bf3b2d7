//! Timer-driven callback scheduler.
//!
//! A [`Scheduler`] keeps one queue of entries sorted by due time, all
//! measured from the same starting time, and at most one armed timer. The
//! timer lives in a single driver task that:
//! - sleeps until the earliest entry is due
//! - pops it and re-arms for the next entry before invoking the callback, so
//!   a callback that calls [`Scheduler::schedule`] sees a consistent queue
//! - exits when the queue is empty, resolving [`Scheduler::drained`]
//!
//! Schedulers are plain values: create one per component that needs
//! periodic or delayed work and pass clones where needed.

mod driver;
mod queue;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::SchedulerError;
use queue::{Timed, TimerQueue};

/// What the scheduler does after a callback panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaultPolicy {
    /// Log the panic and keep firing later entries.
    #[default]
    Continue,
    /// Stop the scheduler; [`Scheduler::drained`] reports the panic.
    Stop,
}

/// Scheduler settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerConfig {
    pub fault_policy: FaultPolicy,
}

/// Passed to a callback each time one of its entries fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    /// Offset the entry was scheduled with.
    pub offset: Duration,
    /// Due time relative to the scheduler's starting time.
    pub due: Duration,
    /// Entries of the same `schedule` call still waiting to fire.
    pub remaining: usize,
}

type Callback = Arc<dyn Fn(Tick) + Send + Sync>;

/// Entries created by one `schedule` call.
struct Batch {
    callback: Callback,
    remaining: watch::Sender<usize>,
}

struct Job {
    offset: Duration,
    batch: Arc<Batch>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    Pending,
    Drained,
    Faulted(String),
}

struct Driver {
    id: u64,
    token: CancellationToken,
}

struct State {
    queue: TimerQueue<Job>,
    started: bool,
    driver: Option<Driver>,
    next_driver_id: u64,
    deadline: Option<Instant>,
}

struct Inner {
    origin: Instant,
    horizon: Instant,
    runtime: Handle,
    config: SchedulerConfig,
    state: Mutex<State>,
    rearm: Notify,
    phase: watch::Sender<Phase>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn elapsed(&self) -> Duration {
        Instant::now().saturating_duration_since(self.origin)
    }

    /// Due time `offset` after `now`, if its deadline fits the clock.
    fn due_time(&self, now: Duration, offset: Duration) -> Option<Duration> {
        let due = now.checked_add(offset)?;
        self.origin.checked_add(due)?;
        Some(due)
    }

    /// Deadline of a queued entry. Only due times accepted by `due_time`
    /// are queued.
    fn deadline(&self, due: Duration) -> Instant {
        self.origin.checked_add(due).unwrap_or(self.horizon)
    }
}

/// Roughly 30 years; the deadline used if a due time cannot be represented.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Handle to the entries of one `schedule` call.
#[derive(Debug, Clone)]
pub struct ScheduleHandle {
    remaining: watch::Receiver<usize>,
}

impl ScheduleHandle {
    /// Entries of this batch that have not fired yet.
    pub fn remaining(&self) -> usize {
        *self.remaining.borrow()
    }

    /// Wait until every entry of this batch has fired.
    pub async fn finished(&self) {
        let mut remaining = self.remaining.clone();
        let _ = remaining.wait_for(|n| *n == 0).await;
    }
}

/// Ordered, mergeable, timer-driven callback queue.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Create a scheduler whose starting time is now.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NoRuntime`] outside a tokio runtime.
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        let runtime = Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?;
        let (phase, _) = watch::channel(Phase::Drained);
        let origin = Instant::now();
        Ok(Self {
            inner: Arc::new(Inner {
                origin,
                horizon: origin.checked_add(FAR_FUTURE).unwrap_or(origin),
                runtime,
                config,
                state: Mutex::new(State {
                    queue: TimerQueue::default(),
                    started: false,
                    driver: None,
                    next_driver_id: 0,
                    deadline: None,
                }),
                rearm: Notify::new(),
                phase,
            }),
        })
    }

    /// Handle that does not keep the scheduler alive; use it inside the
    /// scheduler's own callbacks.
    pub fn downgrade(&self) -> WeakScheduler {
        WeakScheduler {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn starting_time(&self) -> Instant {
        self.inner.origin
    }

    /// Time since the starting time.
    pub fn elapsed(&self) -> Duration {
        self.inner.elapsed()
    }

    /// Queue `callback` once per offset, each relative to now.
    ///
    /// Offsets are converted to the shared time base and merged into the
    /// queue. An entry whose due time has already passed fires on the
    /// driver's next turn, never inside this call.
    ///
    /// # Errors
    ///
    /// - [`SchedulerError::EmptyOffsets`] if `offsets` is empty
    /// - [`SchedulerError::OffsetOverflow`] if a due time does not fit the
    ///   clock; nothing from this call is queued
    pub fn schedule<F, I>(&self, callback: F, offsets: I) -> Result<ScheduleHandle, SchedulerError>
    where
        F: Fn(Tick) + Send + Sync + 'static,
        I: IntoIterator<Item = Duration>,
    {
        let offsets: Vec<Duration> = offsets.into_iter().collect();
        if offsets.is_empty() {
            return Err(SchedulerError::EmptyOffsets);
        }

        let (remaining, handle) = watch::channel(offsets.len());
        let batch = Arc::new(Batch {
            callback: Arc::new(callback),
            remaining,
        });

        let spawn = {
            let mut state = self.inner.state();
            let now = self.inner.elapsed();
            let mut incoming = Vec::with_capacity(offsets.len());
            for &offset in &offsets {
                let due = self
                    .inner
                    .due_time(now, offset)
                    .ok_or(SchedulerError::OffsetOverflow { offset })?;
                incoming.push(Timed::new(
                    due,
                    Job {
                        offset,
                        batch: Arc::clone(&batch),
                    },
                ));
            }
            state.queue.merge(incoming);
            self.inner.phase.send_replace(Phase::Pending);
            tracing::debug!(entries = offsets.len(), queued = state.queue.len(), "Entries scheduled");

            if state.driver.is_some() {
                None
            } else if state.started {
                Some(self.claim_driver(&mut state))
            } else {
                None
            }
        };

        match spawn {
            Some(driver) => self.spawn_driver(driver),
            None => self.inner.rearm.notify_one(),
        }
        Ok(ScheduleHandle { remaining: handle })
    }

    /// Arm the timer for the earliest entry.
    ///
    /// No-op if the timer is already armed. With an empty queue nothing is
    /// armed, but later `schedule` calls arm it.
    pub fn start(&self) {
        let driver = {
            let mut state = self.inner.state();
            state.started = true;
            if state.driver.is_some() || state.queue.is_empty() {
                return;
            }
            self.claim_driver(&mut state)
        };
        self.spawn_driver(driver);
    }

    /// Disarm the timer. Queued entries stay queued; `start` re-arms.
    ///
    /// No callback fires after this returns, apart from one already running.
    pub fn stop(&self) {
        let mut state = self.inner.state();
        state.started = false;
        state.deadline = None;
        if let Some(driver) = state.driver.take() {
            driver.token.cancel();
            tracing::debug!(queued = state.queue.len(), "Scheduler stopped");
        }
    }

    /// Drop every queued entry.
    pub fn clear(&self) {
        let mut state = self.inner.state();
        state.queue.clear();
        state.deadline = None;
        drop(state);
        self.inner.phase.send_replace(Phase::Drained);
        self.inner.rearm.notify_one();
    }

    /// Wait until the queue has emptied after firing.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::CallbackPanicked`] if a callback panicked
    /// under [`FaultPolicy::Stop`].
    pub async fn drained(&self) -> Result<(), SchedulerError> {
        let mut phase = self.inner.phase.subscribe();
        let Ok(current) = phase.wait_for(|p| *p != Phase::Pending).await else {
            return Ok(());
        };
        match &*current {
            Phase::Faulted(message) => Err(SchedulerError::CallbackPanicked {
                message: message.clone(),
            }),
            _ => Ok(()),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.state().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.state().queue.is_empty()
    }

    /// Whether a timer is currently armed.
    pub fn is_armed(&self) -> bool {
        self.inner.state().driver.is_some()
    }

    /// Deadline the timer is armed for, if any.
    pub fn next_due(&self) -> Option<Instant> {
        self.inner.state().deadline
    }

    fn claim_driver(&self, state: &mut State) -> Driver {
        state.next_driver_id += 1;
        let token = CancellationToken::new();
        state.driver = Some(Driver {
            id: state.next_driver_id,
            token: token.clone(),
        });
        Driver {
            id: state.next_driver_id,
            token,
        }
    }

    fn spawn_driver(&self, driver: Driver) {
        tracing::debug!(driver = driver.id, "Arming scheduler timer");
        self.inner
            .runtime
            .spawn(driver::run(Arc::clone(&self.inner), driver.id, driver.token));
    }
}

/// Non-owning [`Scheduler`] handle.
#[derive(Clone)]
pub struct WeakScheduler {
    inner: Weak<Inner>,
}

impl WeakScheduler {
    pub fn upgrade(&self) -> Option<Scheduler> {
        self.inner.upgrade().map(|inner| Scheduler { inner })
    }
}
