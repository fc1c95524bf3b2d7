//! Producer-side handle for one subscription.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::SubscriptionId;
use crate::error::SourceFault;
use crate::flow::ChannelSender;
use crate::observability::metrics;

/// Predicate deciding whether a subscriber receives an item.
pub type Filter<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Per-subscription delivery counters, shared by the source and the merger.
#[derive(Debug, Default)]
pub struct SubscriptionStats {
    delivered: AtomicU64,
    filtered: AtomicU64,
}

impl SubscriptionStats {
    /// Items accepted into the channel.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Items rejected by the subscription's filter.
    pub fn filtered(&self) -> u64 {
        self.filtered.load(Ordering::Relaxed)
    }
}

/// Result of delivering one item to one subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Filtered,
    /// The merger side has closed the channel; the item was dropped.
    Closed,
}

/// Producer half of a merger subscription, handed to a source by
/// [`Merger::listen`](crate::merger::Merger::listen).
pub struct Subscriber<T> {
    id: SubscriptionId,
    sender: ChannelSender<T>,
    filter: Option<Filter<T>>,
    stats: Arc<SubscriptionStats>,
}

impl<T> Clone for Subscriber<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            sender: self.sender.clone(),
            filter: self.filter.clone(),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<T> Subscriber<T> {
    pub(crate) fn new(
        id: SubscriptionId,
        sender: ChannelSender<T>,
        filter: Option<Filter<T>>,
        stats: Arc<SubscriptionStats>,
    ) -> Self {
        Self {
            id,
            sender,
            filter,
            stats,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn accepts(&self, item: &T) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(item))
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    pub fn stats(&self) -> &SubscriptionStats {
        &self.stats
    }

    /// Deliver one item, waiting for channel capacity if bounded.
    pub async fn deliver(&self, item: T) -> DeliveryOutcome {
        if !self.accepts(&item) {
            self.stats.filtered.fetch_add(1, Ordering::Relaxed);
            metrics::record_filtered();
            tracing::trace!(subscription = %self.id, "Item rejected by filter");
            return DeliveryOutcome::Filtered;
        }
        if self.sender.send(Ok(item)).await {
            self.stats.delivered.fetch_add(1, Ordering::Relaxed);
            DeliveryOutcome::Delivered
        } else {
            DeliveryOutcome::Closed
        }
    }

    /// Send the terminal fault. Returns `false` if the channel was closed.
    pub async fn fail(&self, fault: SourceFault) -> bool {
        self.sender.send(Err(fault)).await
    }
}
