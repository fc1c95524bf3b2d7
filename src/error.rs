//! Error types for sources, the merger, and the scheduler.
//!
//! - [`SourceFault`]: a producer-side failure carried to every subscriber
//! - [`SourceError`]: misuse of a [`DataSource`](crate::source::DataSource)
//! - [`MergerError`]: misuse of a [`Merger`](crate::merger::Merger) or a fault
//!   surfaced by its merged sequence
//! - [`SchedulerError`]: misuse of a [`Scheduler`](crate::scheduler::Scheduler)

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::source::SourceId;

/// Terminal error raised by a producer while generating items.
///
/// Cheap to clone so a single fault can close every subscriber channel.
#[derive(Clone)]
pub struct SourceFault {
    inner: Arc<dyn StdError + Send + Sync>,
}

impl SourceFault {
    /// Wrap any error (or a plain message) as a source fault.
    pub fn new(error: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self {
            inner: Arc::from(error.into()),
        }
    }

    /// The wrapped error.
    pub fn get_ref(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.inner
    }
}

impl fmt::Debug for SourceFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SourceFault").field(&self.inner).finish()
    }
}

impl fmt::Display for SourceFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl StdError for SourceFault {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner.source()
    }
}

/// Error type for data source operations.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source {source_id} has already completed")]
    Completed { source_id: SourceId },
}

/// Error type for merger operations and the merged sequence.
#[derive(Debug, Error)]
pub enum MergerError {
    #[error("merger has been disposed")]
    Disposed,

    #[error("merger is already listening to source {source_id}")]
    AlreadyListening { source_id: SourceId },

    #[error("merger already has a live enumerator")]
    AlreadyEnumerating,

    #[error("channel capacity must be at least 1")]
    InvalidCapacity,

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("source {source_id} faulted: {fault}")]
    Faulted {
        source_id: SourceId,
        fault: SourceFault,
    },
}

impl MergerError {
    /// The producer fault, if this error came from a faulted source.
    pub fn fault(&self) -> Option<&SourceFault> {
        match self {
            MergerError::Faulted { fault, .. } => Some(fault),
            _ => None,
        }
    }
}

/// Error type for scheduler operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("scheduler must be created inside a tokio runtime")]
    NoRuntime,

    #[error("at least one due offset is required")]
    EmptyOffsets,

    #[error("offset {offset:?} puts the due time beyond the clock's range")]
    OffsetOverflow { offset: Duration },

    #[error("scheduler stopped after a callback panicked: {message}")]
    CallbackPanicked { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_displays_inner_message() {
        let fault = SourceFault::new("disk unplugged");
        assert_eq!(fault.to_string(), "disk unplugged");

        let cloned = fault.clone();
        assert_eq!(cloned.to_string(), fault.to_string());
    }

    #[test]
    fn test_faulted_error_exposes_fault() {
        let err = MergerError::Faulted {
            source_id: SourceId::from_raw(7),
            fault: SourceFault::new("boom"),
        };
        assert_eq!(err.fault().map(ToString::to_string).as_deref(), Some("boom"));
        assert!(MergerError::Disposed.fault().is_none());
    }
}
