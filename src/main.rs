//! Weir demo: merge several generator sources into one JSON-lines stream.
//!
//! # Usage
//!
//! ```bash
//! weir --sources 3 --items 10 --capacity 16 --interval-ms 100
//! ```
//!
//! Environment variables can also be used:
//! - `WEIR_SOURCES`: Number of sources
//! - `WEIR_CAPACITY`: Channel capacity (0 = unbounded)
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)

use futures::StreamExt;
use serde::Serialize;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::IntervalStream;
use tokio_util::sync::CancellationToken;

use weir::config::Config;
use weir::observability::metrics::init_metrics;
use weir::observability::tracing::init_tracing;
use weir::{Broadcaster, ListenOptions, Merger, Scheduler, SchedulerConfig, SchedulerError};

/// One merged reading, printed as a JSON line.
#[derive(Debug, Clone, Serialize)]
struct Reading {
    source: usize,
    seq: u64,
    value: f64,
}

/// Print startup banner with version and configuration.
fn print_banner(config: &Config) {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!(
        r#"
  Weir v{} - async fan-in multiplexer

  Configuration:
    Sources:    {}
    Items:      {}
    Capacity:   {}
    Interval:   {}ms
    Log Level:  {}

  Press Ctrl+C to stop.
"#,
        version,
        config.sources,
        if config.items == 0 { "unlimited".to_string() } else { config.items.to_string() },
        if config.capacity == 0 { "unbounded".to_string() } else { config.capacity.to_string() },
        config.interval_ms,
        config.log_level
    );
}

/// Cancel `shutdown` on SIGINT or SIGTERM.
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {
                            tracing::info!("Received SIGINT (Ctrl+C), initiating shutdown...");
                        }
                        _ = sigterm.recv() => {
                            tracing::info!("Received SIGTERM, initiating shutdown...");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                    let _ = ctrl_c.await;
                    tracing::info!("Received SIGINT (Ctrl+C), initiating shutdown...");
                }
            }
        }

        #[cfg(not(unix))]
        {
            if ctrl_c.await.is_ok() {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
        }

        shutdown.cancel();
    });
}

/// Publish readings from one generator source until `items` are sent.
async fn produce(index: usize, source: Arc<Broadcaster<Reading>>, interval: Duration, items: usize) -> usize {
    let readings = IntervalStream::new(tokio::time::interval(interval))
        .enumerate()
        .map(move |(seq, _)| {
            let seq = seq as u64;
            Ok::<_, Infallible>(Reading {
                source: index,
                seq,
                value: (seq as f64 * 0.1 + index as f64).sin(),
            })
        });

    if items == 0 {
        source.drive(readings).await
    } else {
        source.drive(readings.take(items)).await
    }
}

/// Log progress every `every`, rescheduling itself after each report.
fn schedule_report(scheduler: &Scheduler, merged: Arc<AtomicU64>, every: Duration) -> Result<(), SchedulerError> {
    let again = scheduler.downgrade();
    scheduler.schedule(
        move |_| {
            tracing::info!(merged = merged.load(Ordering::Relaxed), "Progress");
            let Some(scheduler) = again.upgrade() else {
                return;
            };
            if let Err(e) = schedule_report(&scheduler, Arc::clone(&merged), every) {
                tracing::warn!(error = %e, "Failed to reschedule progress report");
            }
        },
        [every],
    )?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse configuration from CLI arguments and environment
    let config = Config::parse_args();

    // Initialize tracing/logging and metrics
    init_tracing(&config.log_level);
    init_metrics();

    print_banner(&config);

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let merger = Merger::new();
    let _watcher = merger.cancel_on(shutdown.clone());

    let mut producers = Vec::with_capacity(config.sources);
    for index in 0..config.sources {
        let source = Arc::new(Broadcaster::new());
        merger.listen(&source, ListenOptions::new().channel(config.channel_options()))?;
        producers.push(tokio::spawn(produce(index, source, config.interval(), config.items)));
    }

    let merged = Arc::new(AtomicU64::new(0));
    let scheduler = Scheduler::new(SchedulerConfig::default())?;
    schedule_report(&scheduler, Arc::clone(&merged), config.report_interval())?;
    scheduler.start();

    let mut fan_in = merger.fan_in()?;
    while let Some(reading) = fan_in.next_item().await? {
        merged.fetch_add(1, Ordering::Relaxed);
        println!("{}", serde_json::to_string(&reading)?);
    }

    scheduler.stop();
    for producer in producers {
        producer.abort();
    }

    tracing::info!(merged = merged.load(Ordering::Relaxed), "Weir shutdown complete");
    Ok(())
}
