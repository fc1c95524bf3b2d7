//! Data sources: producers that push items to subscriber channels.
//!
//! A [`DataSource`] owns no buffering. Its only state is the list of current
//! subscribers; each subscriber is the producer half of one merger's channel.
//!
//! Contract for implementors:
//! - per-source publish order is preserved
//! - `complete` closes every current subscriber exactly once, with or
//!   without a fault
//! - publishing to a subscriber whose channel is closed is a silent no-op

mod broadcaster;
mod subscriber;

pub use broadcaster::Broadcaster;
pub use subscriber::{DeliveryOutcome, Filter, Subscriber, SubscriptionStats};

use futures::future::BoxFuture;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{SourceError, SourceFault};

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(u64);

impl SourceId {
    /// Allocate a fresh id.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "src-{}", self.0)
    }
}

/// Identity of one (source, merger) subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Capability for accepting subscribers and pushing items to them.
///
/// Object safe so a merger can hold heterogeneous sources behind
/// `Arc<dyn DataSource<T>>`.
pub trait DataSource<T>: Send + Sync {
    fn id(&self) -> SourceId;

    /// Register a subscriber for future items.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Completed`] if the source has already completed.
    fn subscribe(&self, subscriber: Subscriber<T>) -> Result<(), SourceError>;

    /// Remove a subscriber. Idempotent; returns whether it was registered.
    fn unsubscribe(&self, subscription: SubscriptionId) -> bool;

    /// Deliver `item` to every subscriber whose filter accepts it, waiting on
    /// each bounded channel's capacity.
    ///
    /// Resolves to the number of subscribers that received the item.
    fn publish(&self, item: T) -> BoxFuture<'_, usize>;

    /// Close every subscriber channel, optionally with a terminal fault.
    ///
    /// Resolves to `false` if the source had already completed.
    fn complete(&self, fault: Option<SourceFault>) -> BoxFuture<'_, bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let a = SourceId::next();
        let b = SourceId::next();
        assert_ne!(a, b);
        assert!(b > a);

        let s1 = SubscriptionId::next();
        let s2 = SubscriptionId::next();
        assert_ne!(s1, s2);
    }

    #[test]
    fn test_id_display() {
        assert_eq!(SourceId::from_raw(3).to_string(), "src-3");
    }
}
