//! In-memory data source that fans each published item out to its
//! subscribers.

use futures::future::BoxFuture;
use futures::{Stream, StreamExt};
use std::error::Error as StdError;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{DataSource, DeliveryOutcome, SourceId, Subscriber, SubscriptionId};
use crate::error::{SourceError, SourceFault};

struct State<T> {
    subscribers: Vec<Subscriber<T>>,
    completed: bool,
}

/// Reference [`DataSource`] implementation.
///
/// Holds only the current subscriber list. Publishing snapshots that list
/// and delivers to each subscriber in turn, so a slow bounded subscriber
/// holds back the publisher (backpressure) but never blocks `subscribe` or
/// `unsubscribe`.
pub struct Broadcaster<T> {
    id: SourceId,
    state: Mutex<State<T>>,
}

impl<T> Default for Broadcaster<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Broadcaster<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: SourceId::next(),
            state: Mutex::new(State {
                subscribers: Vec::new(),
                completed: false,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> SourceId {
        self.id
    }

    pub fn subscriber_count(&self) -> usize {
        self.state().subscribers.len()
    }

    pub fn is_completed(&self) -> bool {
        self.state().completed
    }

    fn add_subscriber(&self, subscriber: Subscriber<T>) -> Result<(), SourceError> {
        let mut state = self.state();
        if state.completed {
            return Err(SourceError::Completed { source_id: self.id });
        }
        tracing::debug!(source = %self.id, subscription = %subscriber.id(), "Subscriber added");
        state.subscribers.push(subscriber);
        Ok(())
    }

    fn remove_subscriber(&self, subscription: SubscriptionId) -> bool {
        let mut state = self.state();
        let before = state.subscribers.len();
        state.subscribers.retain(|s| s.id() != subscription);
        let removed = state.subscribers.len() != before;
        if removed {
            tracing::debug!(source = %self.id, subscription = %subscription, "Subscriber removed");
        }
        removed
    }
}

impl<T: Clone + Send> Broadcaster<T> {
    /// Publish one item to every accepting subscriber.
    ///
    /// Returns the number of subscribers that received it. After completion
    /// this is a no-op returning 0.
    pub async fn publish(&self, item: T) -> usize {
        let subscribers = {
            let state = self.state();
            if state.completed {
                return 0;
            }
            state.subscribers.clone()
        };

        let mut delivered = 0;
        let mut saw_closed = false;
        for subscriber in &subscribers {
            match subscriber.deliver(item.clone()).await {
                DeliveryOutcome::Delivered => delivered += 1,
                DeliveryOutcome::Filtered => {}
                DeliveryOutcome::Closed => saw_closed = true,
            }
        }

        if saw_closed {
            self.state().subscribers.retain(|s| !s.is_closed());
        }
        delivered
    }

    /// Close every subscriber channel exactly once.
    ///
    /// With a fault, each subscriber receives it as its final delivery.
    /// Returns `false` if the source had already completed.
    pub async fn complete(&self, fault: Option<SourceFault>) -> bool {
        let subscribers = {
            let mut state = self.state();
            if state.completed {
                return false;
            }
            state.completed = true;
            std::mem::take(&mut state.subscribers)
        };

        match &fault {
            Some(fault) => {
                tracing::warn!(
                    source = %self.id,
                    subscribers = subscribers.len(),
                    error = %fault,
                    "Source completed with fault"
                );
                for subscriber in &subscribers {
                    subscriber.fail(fault.clone()).await;
                }
            }
            None => {
                tracing::debug!(source = %self.id, subscribers = subscribers.len(), "Source completed");
            }
        }
        true
    }

    /// Publish every item of `stream` in order, then complete.
    ///
    /// The first `Err` completes the source with that fault and stops the
    /// pump. Returns the number of items published.
    pub async fn drive<S, E>(&self, stream: S) -> usize
    where
        S: Stream<Item = Result<T, E>>,
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        futures::pin_mut!(stream);
        let mut published = 0;
        while let Some(next) = stream.next().await {
            match next {
                Ok(item) => {
                    self.publish(item).await;
                    published += 1;
                }
                Err(error) => {
                    self.complete(Some(SourceFault::new(error))).await;
                    return published;
                }
            }
        }
        self.complete(None).await;
        published
    }
}

impl<T: Clone + Send + 'static> DataSource<T> for Broadcaster<T> {
    fn id(&self) -> SourceId {
        self.id
    }

    fn subscribe(&self, subscriber: Subscriber<T>) -> Result<(), SourceError> {
        self.add_subscriber(subscriber)
    }

    fn unsubscribe(&self, subscription: SubscriptionId) -> bool {
        self.remove_subscriber(subscription)
    }

    fn publish(&self, item: T) -> BoxFuture<'_, usize> {
        Box::pin(Broadcaster::publish(self, item))
    }

    fn complete(&self, fault: Option<SourceFault>) -> BoxFuture<'_, bool> {
        Box::pin(Broadcaster::complete(self, fault))
    }
}
