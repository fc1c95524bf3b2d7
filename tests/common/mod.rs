//! Shared helpers for Weir integration tests.
//!
//! Provides:
//! - Source fixtures attached to a merger
//! - Producer tasks that publish a fixed sequence
//! - Timed waits that fail instead of hanging

#![allow(dead_code)]

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

use weir::{Broadcaster, FanIn, ListenOptions, Merger, MergerError};

/// Route library logs to the test writer.
pub fn init() {
    weir::observability::tracing::init_test_tracing();
}

/// Upper bound for any single wait in these tests.
pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Await `future`, panicking if it takes longer than [`TIMEOUT`].
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(TIMEOUT, future)
        .await
        .expect("operation timed out")
}

/// Create a source and attach it to `merger`.
pub fn attach<T>(merger: &Merger<T>, options: ListenOptions<T>) -> Arc<Broadcaster<T>>
where
    T: Clone + Send + 'static,
{
    let source = Arc::new(Broadcaster::new());
    merger.listen(&source, options).expect("listen failed");
    source
}

/// Spawn a task that publishes `items` in order, then completes the source.
pub fn spawn_producer<T>(source: Arc<Broadcaster<T>>, items: Vec<T>) -> JoinHandle<()>
where
    T: Clone + Send + Sync + 'static,
{
    tokio::spawn(async move {
        for item in items {
            source.publish(item).await;
            tokio::task::yield_now().await;
        }
        source.complete(None).await;
    })
}

/// Drain `fan_in` until it completes or faults.
pub async fn collect<T>(fan_in: &mut FanIn<T>) -> (Vec<T>, Option<MergerError>) {
    let mut items = Vec::new();
    loop {
        match fan_in.next_item().await {
            Ok(Some(item)) => items.push(item),
            Ok(None) => return (items, None),
            Err(err) => return (items, Some(err)),
        }
    }
}

/// Thread-safe event log for scheduler callbacks.
#[derive(Clone)]
pub struct Recorder<E> {
    events: Arc<Mutex<Vec<E>>>,
}

impl<E: Clone> Recorder<E> {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn push(&self, event: E) {
        self.events.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<E> {
        self.events.lock().unwrap().clone()
    }
}

/// Wait for a condition to become true with timeout.
///
/// # Returns
///
/// `true` if condition was met, `false` if timeout expired
pub async fn wait_for<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
