//! Subscription registry for a merger.
//!
//! Tracks the live (source → channel) subscriptions and hands their readers
//! to the enumerator. Every mutation and every enumerator cycle happens under
//! the one mutex that wraps this struct, so a `listen`/`unlisten` can never
//! interleave with "apply pending removes + build wait set".
//!
//! Reader ownership:
//! - a new subscription's reader waits in `unadopted` until the next cycle
//! - the enumerator then owns it; removing the subscription closes the
//!   channel at once, records its id in `pending_removals`, and the
//!   enumerator drops the reader next cycle
//! - dropping the enumerator hands surviving readers back to `unadopted`

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::flow::{ChannelCloser, ChannelReader};
use crate::source::{DataSource, SourceId, SubscriptionId, SubscriptionStats};

/// A subscription's reader, owned by the registry or by the enumerator.
pub(crate) struct ReaderSlot<T> {
    pub id: SubscriptionId,
    pub source_id: SourceId,
    pub reader: ChannelReader<T>,
}

/// Bookkeeping for one live subscription.
pub(crate) struct Entry<T> {
    pub source: Arc<dyn DataSource<T>>,
    pub source_id: SourceId,
    pub stats: Arc<SubscriptionStats>,
    pub closer: ChannelCloser,
}

pub(crate) struct Registry<T> {
    subscriptions: HashMap<SubscriptionId, Entry<T>>,
    by_source: HashMap<SourceId, SubscriptionId>,
    unadopted: Vec<ReaderSlot<T>>,
    pending_removals: HashSet<SubscriptionId>,
    enumerating: bool,
    disposed: bool,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            subscriptions: HashMap::new(),
            by_source: HashMap::new(),
            unadopted: Vec::new(),
            pending_removals: HashSet::new(),
            enumerating: false,
            disposed: false,
        }
    }
}

impl<T> Registry<T> {
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn is_enumerating(&self) -> bool {
        self.enumerating
    }

    pub fn set_enumerating(&mut self) {
        self.enumerating = true;
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn subscription_for(&self, source_id: SourceId) -> Option<SubscriptionId> {
        self.by_source.get(&source_id).copied()
    }

    pub fn stats(&self, id: SubscriptionId) -> Option<Arc<SubscriptionStats>> {
        self.subscriptions.get(&id).map(|entry| Arc::clone(&entry.stats))
    }

    pub fn insert(&mut self, id: SubscriptionId, entry: Entry<T>, reader: ChannelReader<T>) {
        let source_id = entry.source_id;
        self.by_source.insert(source_id, id);
        self.subscriptions.insert(id, entry);
        self.unadopted.push(ReaderSlot {
            id,
            source_id,
            reader,
        });
    }

    /// Remove a subscription on request.
    ///
    /// The channel is closed now. An unadopted reader is dropped as well; an
    /// adopted one is marked so the enumerator drops it before its next wait.
    pub fn remove(&mut self, id: SubscriptionId) -> Option<Entry<T>> {
        let entry = self.subscriptions.remove(&id)?;
        self.by_source.remove(&entry.source_id);
        entry.closer.close();
        match self.unadopted.iter().position(|slot| slot.id == id) {
            Some(pos) => {
                self.unadopted.remove(pos);
            }
            None => {
                self.pending_removals.insert(id);
            }
        }
        Some(entry)
    }

    /// Forget a subscription whose reader the enumerator already dropped.
    pub fn finish(&mut self, id: SubscriptionId) -> Option<Entry<T>> {
        let entry = self.subscriptions.remove(&id)?;
        self.by_source.remove(&entry.source_id);
        Some(entry)
    }

    /// One enumerator cycle: apply pending removals, then adopt new readers.
    pub fn sync(&mut self, readers: &mut Vec<ReaderSlot<T>>) {
        if self.disposed {
            readers.clear();
            self.pending_removals.clear();
            return;
        }
        if !self.pending_removals.is_empty() {
            readers.retain(|slot| !self.pending_removals.contains(&slot.id));
            self.pending_removals.clear();
        }
        readers.append(&mut self.unadopted);
    }

    /// Take back the readers of a dropped enumerator.
    pub fn release(&mut self, readers: Vec<ReaderSlot<T>>) {
        self.enumerating = false;
        if self.disposed {
            return;
        }
        let mut restored: Vec<ReaderSlot<T>> = readers
            .into_iter()
            .filter(|slot| {
                self.subscriptions.contains_key(&slot.id) && !self.pending_removals.contains(&slot.id)
            })
            .collect();
        self.pending_removals.clear();
        restored.append(&mut self.unadopted);
        self.unadopted = restored;
    }

    /// Mark the registry disposed and take every subscription.
    ///
    /// Every channel is closed here, releasing blocked publishers. Unadopted
    /// readers are dropped too; adopted ones on the enumerator's next cycle.
    pub fn dispose(&mut self) -> Vec<(SubscriptionId, Entry<T>)> {
        self.disposed = true;
        self.unadopted.clear();
        self.by_source.clear();
        self.subscriptions
            .drain()
            .inspect(|(_, entry)| entry.closer.close())
            .collect()
    }
}
