//! Weir: dynamic fan-in of asynchronous sources, plus a merged timer
//! scheduler.
//!
//! # Architecture
//!
//! - **Sources**: producers implement [`DataSource`]; [`Broadcaster`] is the
//!   in-memory reference implementation
//! - **Channels**: one FIFO per (source, merger) subscription, bounded for
//!   backpressure or unbounded
//! - **Fan-in**: [`Merger`] owns the live subscription map; [`FanIn`] waits on
//!   every reader plus an [`InterruptGate`] so subscriptions can change while
//!   a consumer is blocked
//! - **Scheduling**: [`Scheduler`] fires callbacks from one sorted queue with a
//!   single armed timer
//!
//! # Modules
//!
//! - [`config`]: CLI and environment configuration for the demo binary
//! - [`error`]: Error types
//! - [`flow`]: Subscription channels and the interrupt gate
//! - [`merger`]: Merger and fan-in enumerator
//! - [`observability`]: Tracing and metrics setup
//! - [`scheduler`]: Timer-driven callback queue
//! - [`source`]: Data source capability and broadcaster

// Lint configuration
#![warn(clippy::all)]
#![allow(
    clippy::module_name_repetitions, // merger::registry::Registry is fine
    clippy::must_use_candidate,      // Not all functions need #[must_use]
    clippy::missing_errors_doc,      // Error docs can be verbose
    clippy::missing_panics_doc,      // Panic docs can be verbose
    clippy::len_without_is_empty     // Registry len is internal
)]

pub mod config;
pub mod error;
pub mod flow;
pub mod merger;
pub mod observability;
pub mod scheduler;
pub mod source;

pub use error::{MergerError, SchedulerError, SourceError, SourceFault};
pub use flow::{ChannelOptions, InterruptGate};
pub use merger::{FanIn, FanInState, ListenOptions, Merger};
pub use scheduler::{FaultPolicy, ScheduleHandle, Scheduler, SchedulerConfig, Tick, WeakScheduler};
pub use source::{Broadcaster, DataSource, SourceId, Subscriber, SubscriptionId, SubscriptionStats};
