//! Dynamic multi-source fan-in.
//!
//! A [`Merger`] owns the live set of (source → channel) subscriptions and
//! builds a [`FanIn`] that yields items from all of them as one sequence.
//!
//! ```text
//! Broadcaster A ──► channel A ──┐
//! Broadcaster B ──► channel B ──┼──► FanIn ──► consumer
//! Broadcaster C ──► channel C ──┤
//!            InterruptGate ─────┘  (listen / unlisten / dispose)
//! ```
//!
//! `listen` and `unlisten` may be called from any task while a consumer is
//! blocked in [`FanIn::move_next`]; the gate interrupts the wait so the
//! change applies before the next read.

mod fan_in;
mod registry;

pub use fan_in::{FanIn, FanInState};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::MergerError;
use crate::flow::{channel, ChannelOptions, InterruptGate};
use crate::observability::metrics;
use crate::source::{DataSource, Filter, SourceId, Subscriber, SubscriptionId, SubscriptionStats};
use registry::{Entry, Registry};

/// Options for one `listen` call.
pub struct ListenOptions<T> {
    /// Only items accepted by the filter reach the merger.
    pub filter: Option<Filter<T>>,
    pub channel: ChannelOptions,
}

impl<T> Default for ListenOptions<T> {
    fn default() -> Self {
        Self {
            filter: None,
            channel: ChannelOptions::default(),
        }
    }
}

impl<T> ListenOptions<T> {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    #[must_use]
    pub fn channel(mut self, channel: ChannelOptions) -> Self {
        self.channel = channel;
        self
    }

    #[must_use]
    pub fn bounded(self, capacity: usize) -> Self {
        self.channel(ChannelOptions::Bounded(capacity))
    }
}

/// State shared by merger handles and the live enumerator.
pub(crate) struct Shared<T> {
    registry: Mutex<Registry<T>>,
    gate: InterruptGate,
    lifetime: CancellationToken,
}

impl<T> Shared<T> {
    fn registry(&self) -> MutexGuard<'_, Registry<T>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dispose(&self) {
        let entries = {
            let mut registry = self.registry();
            if registry.is_disposed() {
                return;
            }
            registry.dispose()
        };

        for (id, entry) in &entries {
            entry.source.unsubscribe(*id);
        }
        metrics::record_subscriptions(-(entries.len() as i64));

        self.gate.signal();
        self.gate.close();
        self.lifetime.cancel();
        tracing::debug!(subscriptions = entries.len(), "Merger disposed");
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        self.lifetime.cancel();
        let registry = self.registry.get_mut().unwrap_or_else(PoisonError::into_inner);
        if registry.is_disposed() {
            return;
        }
        let entries = registry.dispose();
        for (id, entry) in &entries {
            entry.source.unsubscribe(*id);
        }
        metrics::record_subscriptions(-(entries.len() as i64));
    }
}

/// Cloneable handle to a fan-in multiplexer.
///
/// All clones share one subscription map; any clone may `listen`,
/// `unlisten`, or `dispose` while another task enumerates.
pub struct Merger<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Merger<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> std::fmt::Debug for Merger<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Merger").finish_non_exhaustive()
    }
}

impl<T> Default for Merger<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Merger<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                registry: Mutex::new(Registry::default()),
                gate: InterruptGate::new(),
                lifetime: CancellationToken::new(),
            }),
        }
    }

    /// Subscribe to `source` and return the subscription's id.
    ///
    /// Visible to a running [`FanIn`] before its next read.
    ///
    /// # Errors
    ///
    /// - [`MergerError::Disposed`] after [`dispose`](Self::dispose)
    /// - [`MergerError::AlreadyListening`] if `source` is already subscribed
    /// - [`MergerError::InvalidCapacity`] for a zero-capacity bounded channel
    /// - [`MergerError::Source`] if the source has completed
    pub fn listen_with(
        &self,
        source: Arc<dyn DataSource<T>>,
        options: ListenOptions<T>,
    ) -> Result<SubscriptionId, MergerError> {
        let source_id = source.id();
        let id = {
            let mut registry = self.shared.registry();
            if registry.is_disposed() {
                return Err(MergerError::Disposed);
            }
            if registry.subscription_for(source_id).is_some() {
                return Err(MergerError::AlreadyListening { source_id });
            }

            let (sender, reader) = channel(options.channel)?;
            let id = SubscriptionId::next();
            let stats = Arc::new(SubscriptionStats::default());
            source.subscribe(Subscriber::new(id, sender, options.filter, Arc::clone(&stats)))?;
            registry.insert(
                id,
                Entry {
                    source,
                    source_id,
                    stats,
                    closer: reader.closer(),
                },
                reader,
            );
            id
        };

        metrics::record_subscriptions(1);
        tracing::debug!(source = %source_id, subscription = %id, "Listening to source");
        self.shared.gate.signal();
        Ok(id)
    }

    /// Typed form of [`listen_with`](Self::listen_with).
    pub fn listen<S>(&self, source: &Arc<S>, options: ListenOptions<T>) -> Result<SubscriptionId, MergerError>
    where
        S: DataSource<T> + 'static,
    {
        let source: Arc<dyn DataSource<T>> = source.clone();
        self.listen_with(source, options)
    }

    /// Listen with default options; chains.
    ///
    /// ```
    /// use std::sync::Arc;
    /// use weir::{Broadcaster, Merger};
    ///
    /// let a = Arc::new(Broadcaster::<u32>::new());
    /// let b = Arc::new(Broadcaster::<u32>::new());
    /// let merger = Merger::new();
    /// merger.listen_to(&a).unwrap().listen_to(&b).unwrap();
    /// assert_eq!(merger.subscription_count(), 2);
    /// ```
    pub fn listen_to<S>(&self, source: &Arc<S>) -> Result<&Self, MergerError>
    where
        S: DataSource<T> + 'static,
    {
        self.listen(source, ListenOptions::default())?;
        Ok(self)
    }

    /// Remove a subscription by id.
    ///
    /// Its reader is never read again, even if items are already buffered.
    /// Returns `Ok(false)` if the subscription no longer exists.
    pub fn unlisten(&self, subscription: SubscriptionId) -> Result<bool, MergerError> {
        let entry = {
            let mut registry = self.shared.registry();
            if registry.is_disposed() {
                return Err(MergerError::Disposed);
            }
            registry.remove(subscription)
        };
        let Some(entry) = entry else {
            return Ok(false);
        };

        entry.source.unsubscribe(subscription);
        metrics::record_subscriptions(-1);
        tracing::debug!(source = %entry.source_id, subscription = %subscription, "Stopped listening");
        self.shared.gate.signal();
        Ok(true)
    }

    /// Remove the subscription to `source`, if any.
    pub fn unlisten_source(&self, source: SourceId) -> Result<bool, MergerError> {
        let subscription = {
            let registry = self.shared.registry();
            if registry.is_disposed() {
                return Err(MergerError::Disposed);
            }
            registry.subscription_for(source)
        };
        match subscription {
            Some(subscription) => self.unlisten(subscription),
            None => Ok(false),
        }
    }

    /// Build the enumerator over the current and future subscriptions.
    ///
    /// # Errors
    ///
    /// - [`MergerError::Disposed`] after [`dispose`](Self::dispose)
    /// - [`MergerError::AlreadyEnumerating`] while another [`FanIn`] is alive
    pub fn fan_in(&self) -> Result<FanIn<T>, MergerError> {
        {
            let mut registry = self.shared.registry();
            if registry.is_disposed() {
                return Err(MergerError::Disposed);
            }
            if registry.is_enumerating() {
                return Err(MergerError::AlreadyEnumerating);
            }
            registry.set_enumerating();
        }
        Ok(FanIn::new(Arc::clone(&self.shared)))
    }

    /// Unsubscribe from every source, close every channel, and wake a
    /// pending `move_next`, which then returns `false`.
    ///
    /// Idempotent, non-blocking, and safe to call from a cancellation
    /// callback.
    pub fn dispose(&self) {
        self.shared.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.registry().is_disposed()
    }

    pub fn subscription_count(&self) -> usize {
        self.shared.registry().len()
    }

    pub fn subscription_for(&self, source: SourceId) -> Option<SubscriptionId> {
        self.shared.registry().subscription_for(source)
    }

    /// Delivery counters for a live subscription.
    pub fn stats(&self, subscription: SubscriptionId) -> Option<Arc<SubscriptionStats>> {
        self.shared.registry().stats(subscription)
    }
}

impl<T: Send + 'static> Merger<T> {
    /// Dispose this merger when `token` is cancelled.
    ///
    /// The watcher holds only a weak reference and exits when the merger is
    /// disposed or dropped.
    pub fn cancel_on(&self, token: CancellationToken) -> JoinHandle<()> {
        let lifetime = self.shared.lifetime.clone();
        let shared = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    if let Some(shared) = shared.upgrade() {
                        tracing::debug!("Cancellation requested, disposing merger");
                        shared.dispose();
                    }
                }
                _ = lifetime.cancelled() => {}
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Broadcaster;

    #[test]
    fn test_listen_twice_rejected() {
        let source = Arc::new(Broadcaster::<u32>::new());
        let merger = Merger::new();

        merger.listen_to(&source).unwrap();
        let err = merger.listen_to(&source).unwrap_err();
        assert!(matches!(err, MergerError::AlreadyListening { source_id } if source_id == source.id()));
        assert_eq!(source.subscriber_count(), 1);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let source = Arc::new(Broadcaster::<u32>::new());
        let merger = Merger::new();

        let err = merger
            .listen(&source, ListenOptions::new().bounded(0))
            .unwrap_err();
        assert!(matches!(err, MergerError::InvalidCapacity));
        assert_eq!(source.subscriber_count(), 0);
        assert_eq!(merger.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_listen_to_completed_source_fails() {
        let source = Arc::new(Broadcaster::<u32>::new());
        source.complete(None).await;

        let merger = Merger::new();
        assert!(matches!(merger.listen_to(&source), Err(MergerError::Source(_))));
    }

    #[test]
    fn test_unlisten_is_symmetric() {
        let source = Arc::new(Broadcaster::<u32>::new());
        let merger = Merger::new();
        let id = merger.listen(&source, ListenOptions::new()).unwrap();

        assert!(merger.unlisten(id).unwrap());
        assert_eq!(source.subscriber_count(), 0);
        assert_eq!(merger.subscription_count(), 0);
        assert!(!merger.unlisten(id).unwrap());
        assert!(!merger.unlisten_source(source.id()).unwrap());
    }

    #[test]
    fn test_disposed_merger_rejects_operations() {
        let source = Arc::new(Broadcaster::<u32>::new());
        let merger = Merger::new();
        let id = merger.listen(&source, ListenOptions::new()).unwrap();

        merger.dispose();
        merger.dispose();

        assert!(merger.is_disposed());
        assert_eq!(source.subscriber_count(), 0);
        assert!(matches!(merger.listen_to(&source), Err(MergerError::Disposed)));
        assert!(matches!(merger.unlisten(id), Err(MergerError::Disposed)));
        assert!(matches!(merger.fan_in(), Err(MergerError::Disposed)));
    }

    #[test]
    fn test_single_live_enumerator() {
        let merger = Merger::<u32>::new();
        let first = merger.fan_in().unwrap();
        assert!(matches!(merger.fan_in(), Err(MergerError::AlreadyEnumerating)));

        drop(first);
        assert!(merger.fan_in().is_ok());
    }

    #[test]
    fn test_dropping_merger_unsubscribes() {
        let source = Arc::new(Broadcaster::<u32>::new());
        let merger = Merger::new();
        merger.listen_to(&source).unwrap();
        assert_eq!(source.subscriber_count(), 1);

        drop(merger);
        assert_eq!(source.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_on_disposes() {
        let source = Arc::new(Broadcaster::<u32>::new());
        let merger = Merger::new();
        merger.listen_to(&source).unwrap();

        let token = CancellationToken::new();
        let watcher = merger.cancel_on(token.clone());
        token.cancel();
        watcher.await.unwrap();

        assert!(merger.is_disposed());
        assert_eq!(source.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_watcher_exits_on_dispose() {
        let merger = Merger::<u32>::new();
        let watcher = merger.cancel_on(CancellationToken::new());
        merger.dispose();
        watcher.await.unwrap();
    }
}
