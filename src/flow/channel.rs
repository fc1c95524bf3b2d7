//! Subscription channel between one source and one merger.
//!
//! A thin layer over `tokio::sync::mpsc`:
//! - bounded channels apply backpressure (`send` waits for capacity)
//! - unbounded channels never wait
//! - items travel as `Result<T, SourceFault>` so the final message of a
//!   channel can carry a terminal error
//! - closing the reader, or its [`ChannelCloser`], turns every later `send`
//!   into a no-op and releases publishers waiting for capacity

use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{MergerError, SourceFault};

/// One message on a subscription channel.
pub type Delivery<T> = Result<T, SourceFault>;

/// Capacity policy for a subscription channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelOptions {
    /// At most `n` buffered items; publishers wait when full.
    Bounded(usize),
    /// No capacity limit.
    #[default]
    Unbounded,
}

impl ChannelOptions {
    /// Build options from a capacity where `0` means unbounded.
    pub fn from_capacity(capacity: usize) -> Self {
        if capacity == 0 {
            Self::Unbounded
        } else {
            Self::Bounded(capacity)
        }
    }

    pub fn validate(&self) -> Result<(), MergerError> {
        match self {
            Self::Bounded(0) => Err(MergerError::InvalidCapacity),
            _ => Ok(()),
        }
    }
}

/// Create a subscription channel.
///
/// # Errors
///
/// Returns [`MergerError::InvalidCapacity`] for `Bounded(0)`.
pub fn channel<T>(options: ChannelOptions) -> Result<(ChannelSender<T>, ChannelReader<T>), MergerError> {
    options.validate()?;
    let pair = match options {
        ChannelOptions::Bounded(capacity) => {
            let (tx, rx) = mpsc::channel(capacity);
            (SenderKind::Bounded(tx), ReceiverKind::Bounded(rx))
        }
        ChannelOptions::Unbounded => {
            let (tx, rx) = mpsc::unbounded_channel();
            (SenderKind::Unbounded(tx), ReceiverKind::Unbounded(rx))
        }
    };
    let closed = CancellationToken::new();
    Ok((
        ChannelSender {
            kind: pair.0,
            closed: closed.clone(),
        },
        ChannelReader { kind: pair.1, closed },
    ))
}

/// Closes a channel without owning its reader.
///
/// The merger keeps one per subscription so `dispose` and `unlisten` can
/// release blocked publishers while the enumerator still holds the reader.
#[derive(Debug, Clone)]
pub struct ChannelCloser {
    closed: CancellationToken,
}

impl ChannelCloser {
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

enum SenderKind<T> {
    Bounded(mpsc::Sender<Delivery<T>>),
    Unbounded(mpsc::UnboundedSender<Delivery<T>>),
}

impl<T> Clone for SenderKind<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Bounded(tx) => Self::Bounded(tx.clone()),
            Self::Unbounded(tx) => Self::Unbounded(tx.clone()),
        }
    }
}

/// Producer half of a subscription channel.
pub struct ChannelSender<T> {
    kind: SenderKind<T>,
    closed: CancellationToken,
}

impl<T> Clone for ChannelSender<T> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind.clone(),
            closed: self.closed.clone(),
        }
    }
}

impl<T> ChannelSender<T> {
    /// Send one delivery, waiting for capacity on bounded channels.
    ///
    /// Returns `false` if the reader side is closed; the delivery is dropped.
    pub async fn send(&self, delivery: Delivery<T>) -> bool {
        if self.closed.is_cancelled() {
            return false;
        }
        match &self.kind {
            SenderKind::Bounded(tx) => tokio::select! {
                biased;
                _ = self.closed.cancelled() => false,
                sent = tx.send(delivery) => sent.is_ok(),
            },
            SenderKind::Unbounded(tx) => tx.send(delivery).is_ok(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
            || match &self.kind {
                SenderKind::Bounded(tx) => tx.is_closed(),
                SenderKind::Unbounded(tx) => tx.is_closed(),
            }
    }
}

enum ReceiverKind<T> {
    Bounded(mpsc::Receiver<Delivery<T>>),
    Unbounded(mpsc::UnboundedReceiver<Delivery<T>>),
}

/// Consumer half of a subscription channel.
pub struct ChannelReader<T> {
    kind: ReceiverKind<T>,
    closed: CancellationToken,
}

impl<T> ChannelReader<T> {
    /// Poll for the next delivery; `Ready(None)` once every sender is gone
    /// and the buffer is empty.
    pub fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<Delivery<T>>> {
        match &mut self.kind {
            ReceiverKind::Bounded(rx) => rx.poll_recv(cx),
            ReceiverKind::Unbounded(rx) => rx.poll_recv(cx),
        }
    }

    pub async fn recv(&mut self) -> Option<Delivery<T>> {
        std::future::poll_fn(|cx| self.poll_recv(cx)).await
    }

    /// Close the channel from the reader side.
    ///
    /// Buffered deliveries stay readable; new sends fail and publishers
    /// waiting for capacity are released.
    pub fn close(&mut self) {
        self.closed.cancel();
        match &mut self.kind {
            ReceiverKind::Bounded(rx) => rx.close(),
            ReceiverKind::Unbounded(rx) => rx.close(),
        }
    }

    /// Handle that closes this channel from anywhere.
    pub fn closer(&self) -> ChannelCloser {
        ChannelCloser {
            closed: self.closed.clone(),
        }
    }

    /// Number of buffered deliveries.
    pub fn len(&self) -> usize {
        match &self.kind {
            ReceiverKind::Bounded(rx) => rx.len(),
            ReceiverKind::Unbounded(rx) => rx.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            channel::<u32>(ChannelOptions::Bounded(0)),
            Err(MergerError::InvalidCapacity)
        ));
        assert_eq!(ChannelOptions::from_capacity(0), ChannelOptions::Unbounded);
        assert_eq!(ChannelOptions::from_capacity(4), ChannelOptions::Bounded(4));
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let (tx, mut rx) = channel::<u32>(ChannelOptions::Unbounded).unwrap();
        for i in 1..=3 {
            assert!(tx.send(Ok(i)).await);
        }
        drop(tx);

        let mut seen = Vec::new();
        while let Some(delivery) = rx.recv().await {
            seen.push(delivery.unwrap());
        }
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_bounded_send_waits_for_capacity() {
        let (tx, mut rx) = channel::<u32>(ChannelOptions::Bounded(1)).unwrap();
        assert!(tx.send(Ok(1)).await);

        let mut blocked = task::spawn(tx.send(Ok(2)));
        assert_pending!(blocked.poll());

        assert_eq!(rx.recv().await.unwrap().unwrap(), 1);
        assert!(blocked.is_woken());
        assert!(assert_ready!(blocked.poll()));
    }

    #[tokio::test]
    async fn test_close_releases_blocked_sender() {
        let (tx, mut rx) = channel::<u32>(ChannelOptions::Bounded(1)).unwrap();
        assert!(tx.send(Ok(1)).await);

        let mut blocked = task::spawn(tx.send(Ok(2)));
        assert_pending!(blocked.poll());

        rx.close();
        assert!(!assert_ready!(blocked.poll()));
        drop(blocked);
        assert!(tx.is_closed());
        assert!(!tx.send(Ok(3)).await);
    }

    #[tokio::test]
    async fn test_terminal_error_follows_items() {
        let (tx, mut rx) = channel::<u32>(ChannelOptions::Bounded(4)).unwrap();
        tx.send(Ok(1)).await;
        tx.send(Err(SourceFault::new("gone"))).await;
        drop(tx);

        assert_eq!(rx.recv().await.unwrap().unwrap(), 1);
        assert_eq!(rx.recv().await.unwrap().unwrap_err().to_string(), "gone");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_closer_releases_blocked_sender_while_reader_lives() {
        let (tx, rx) = channel::<u32>(ChannelOptions::Bounded(1)).unwrap();
        assert!(tx.send(Ok(1)).await);

        let mut blocked = task::spawn(tx.send(Ok(2)));
        assert_pending!(blocked.poll());

        let closer = rx.closer();
        closer.close();
        assert!(blocked.is_woken());
        assert!(!assert_ready!(blocked.poll()));
        drop(blocked);

        assert!(closer.is_closed());
        assert!(tx.is_closed());
        assert!(!tx.send(Ok(3)).await);
        assert_eq!(rx.len(), 1);
    }

    #[tokio::test]
    async fn test_closer_rejects_unbounded_sends() {
        let (tx, rx) = channel::<u32>(ChannelOptions::Unbounded).unwrap();
        rx.closer().close();
        assert!(!tx.send(Ok(1)).await);
        assert!(rx.is_empty());
    }
}
