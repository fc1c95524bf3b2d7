//! OpenTelemetry metrics.
//!
//! Key metrics:
//! - weir_items_merged_total: Counter for items yielded by merged sequences
//! - weir_items_filtered_total: Counter for items dropped by subscription filters
//! - weir_subscriptions_active: Up/down counter of live subscriptions
//! - weir_scheduler_fired_total: Counter for scheduler callbacks invoked
//! - weir_scheduler_callback_faults_total: Counter for panicking callbacks
//!
//! Recording before [`init_metrics`] is a no-op.

use opentelemetry::global;
use opentelemetry::metrics::{Counter, Meter, UpDownCounter};
use opentelemetry_sdk::metrics::{ManualReader, SdkMeterProvider};
use std::sync::OnceLock;

/// Global metrics instance.
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Weir metrics registry.
#[derive(Debug)]
struct Metrics {
    items_merged: Counter<u64>,
    items_filtered: Counter<u64>,
    subscriptions_active: UpDownCounter<i64>,
    scheduler_fired: Counter<u64>,
    scheduler_faults: Counter<u64>,
}

impl Metrics {
    fn new(meter: &Meter) -> Self {
        Self {
            items_merged: meter
                .u64_counter("weir_items_merged_total")
                .with_description("Items yielded by merged sequences")
                .with_unit("1")
                .init(),
            items_filtered: meter
                .u64_counter("weir_items_filtered_total")
                .with_description("Items dropped by subscription filters")
                .with_unit("1")
                .init(),
            subscriptions_active: meter
                .i64_up_down_counter("weir_subscriptions_active")
                .with_description("Live merger subscriptions")
                .with_unit("1")
                .init(),
            scheduler_fired: meter
                .u64_counter("weir_scheduler_fired_total")
                .with_description("Scheduler callbacks invoked")
                .with_unit("1")
                .init(),
            scheduler_faults: meter
                .u64_counter("weir_scheduler_callback_faults_total")
                .with_description("Scheduler callbacks that panicked")
                .with_unit("1")
                .init(),
        }
    }
}

/// Initialize the metrics system.
///
/// Installs an SDK meter provider backed by a manual reader; an embedding
/// application may install its own exporter instead. Subsequent calls are
/// ignored.
pub fn init_metrics() {
    METRICS.get_or_init(|| {
        let reader = ManualReader::builder().build();
        let provider = SdkMeterProvider::builder().with_reader(reader).build();
        global::set_meter_provider(provider);

        let meter = global::meter("weir");
        Metrics::new(&meter)
    });
}

pub fn record_merged() {
    if let Some(m) = METRICS.get() {
        m.items_merged.add(1, &[]);
    }
}

pub fn record_filtered() {
    if let Some(m) = METRICS.get() {
        m.items_filtered.add(1, &[]);
    }
}

/// Track a subscription being added (`+1`) or removed (`-1`).
pub fn record_subscriptions(delta: i64) {
    if let Some(m) = METRICS.get() {
        m.subscriptions_active.add(delta, &[]);
    }
}

pub fn record_fired() {
    if let Some(m) = METRICS.get() {
        m.scheduler_fired.add(1, &[]);
    }
}

pub fn record_callback_fault() {
    if let Some(m) = METRICS.get() {
        m.scheduler_faults.add(1, &[]);
    }
}
