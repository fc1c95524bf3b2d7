//! Timer queue ordered by due time.
//!
//! All due times are offsets from the scheduler's starting time, so adding a
//! batch of entries reduces to a stable two-way merge: on equal due times
//! entries already queued fire first, then new ones in their given order.

use std::collections::VecDeque;
use std::time::Duration;

/// One queued entry.
#[derive(Debug)]
pub(crate) struct Timed<P> {
    /// Due time relative to the scheduler's starting time.
    pub due: Duration,
    pub payload: P,
}

impl<P> Timed<P> {
    pub fn new(due: Duration, payload: P) -> Self {
        Self { due, payload }
    }
}

#[derive(Debug)]
pub(crate) struct TimerQueue<P> {
    entries: VecDeque<Timed<P>>,
}

impl<P> Default for TimerQueue<P> {
    fn default() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }
}

impl<P> TimerQueue<P> {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn peek_due(&self) -> Option<Duration> {
        self.entries.front().map(|entry| entry.due)
    }

    /// Merge a batch into the queue.
    pub fn merge(&mut self, mut incoming: Vec<Timed<P>>) {
        incoming.sort_by_key(|entry| entry.due);

        let existing = std::mem::take(&mut self.entries);
        let mut merged = VecDeque::with_capacity(existing.len() + incoming.len());
        let mut left = existing.into_iter().peekable();
        let mut right = incoming.into_iter().peekable();

        loop {
            let take_left = match (left.peek(), right.peek()) {
                (Some(l), Some(r)) => l.due <= r.due,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => break,
            };
            let next = if take_left { left.next() } else { right.next() };
            merged.extend(next);
        }
        self.entries = merged;
    }

    /// Pop the earliest entry if it is due at `now`.
    pub fn pop_due(&mut self, now: Duration) -> Option<Timed<P>> {
        if self.entries.front()?.due <= now {
            self.entries.pop_front()
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn batch(items: &[(u64, &'static str)]) -> Vec<Timed<&'static str>> {
        items.iter().map(|&(due, label)| Timed::new(ms(due), label)).collect()
    }

    fn drain(queue: &mut TimerQueue<&'static str>) -> Vec<&'static str> {
        let mut out = Vec::new();
        while let Some(entry) = queue.pop_due(Duration::MAX) {
            out.push(entry.payload);
        }
        out
    }

    #[test]
    fn test_unsorted_batch_is_sorted() {
        let mut queue = TimerQueue::default();
        queue.merge(batch(&[(30, "30"), (10, "10"), (20, "20")]));
        assert_eq!(drain(&mut queue), vec!["10", "20", "30"]);
    }

    #[test]
    fn test_merge_keeps_existing_first_on_ties() {
        let mut queue = TimerQueue::default();
        queue.merge(batch(&[(10, "a10"), (400, "a400")]));
        queue.merge(batch(&[(200, "b200"), (400, "b400")]));

        assert_eq!(queue.len(), 4);
        assert_eq!(drain(&mut queue), vec!["a10", "b200", "a400", "b400"]);
    }

    #[test]
    fn test_equal_offsets_in_one_batch_keep_order() {
        let mut queue = TimerQueue::default();
        queue.merge(batch(&[(5, "first"), (5, "second"), (1, "early")]));
        assert_eq!(drain(&mut queue), vec!["early", "first", "second"]);
    }

    #[test]
    fn test_pop_due_respects_now() {
        let mut queue = TimerQueue::default();
        queue.merge(batch(&[(10, "a"), (20, "b")]));

        assert!(queue.pop_due(ms(5)).is_none());
        assert_eq!(queue.pop_due(ms(10)).map(|e| e.payload), Some("a"));
        assert_eq!(queue.peek_due(), Some(ms(20)));
        assert!(queue.pop_due(ms(15)).is_none());
    }
}
