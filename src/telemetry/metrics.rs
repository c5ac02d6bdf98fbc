//! Metric instrument factories for prioqueue.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created from the `"prioqueue"` meter and carry a
//! `name` label identifying the queue.

use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter, UpDownCounter};

/// Returns the shared meter for prioqueue instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("prioqueue")
}

/// Up/down counter: items ready and waiting for a worker.
pub fn depth() -> UpDownCounter<i64> {
    meter()
        .i64_up_down_counter("prioqueue.depth")
        .with_description("Number of ready items waiting in the queue")
        .build()
}

/// Counter: items that became ready (adds, counted once per readiness).
pub fn adds() -> Counter<u64> {
    meter()
        .u64_counter("prioqueue.adds")
        .with_description("Number of items added to the queue")
        .build()
}

/// Histogram: seconds an item waited between becoming ready and handout.
pub fn queue_duration_seconds() -> Histogram<f64> {
    meter()
        .f64_histogram("prioqueue.queue_duration_seconds")
        .with_description("Time an item stays in the queue before being handed out")
        .with_unit("s")
        .build()
}

/// Histogram: seconds between handout and `done`.
pub fn work_duration_seconds() -> Histogram<f64> {
    meter()
        .f64_histogram("prioqueue.work_duration_seconds")
        .with_description("Time spent processing an item")
        .with_unit("s")
        .build()
}

/// Counter: adds carrying a delay (explicit or rate limited).
pub fn retries() -> Counter<u64> {
    meter()
        .u64_counter("prioqueue.retries")
        .with_description("Number of delayed re-adds")
        .build()
}

/// Gauge: total seconds of work in progress that has not called `done`.
pub fn unfinished_work_seconds() -> Gauge<f64> {
    meter()
        .f64_gauge("prioqueue.unfinished_work_seconds")
        .with_description("Seconds of work in progress not yet observed by work duration")
        .with_unit("s")
        .build()
}

/// Gauge: age in seconds of the oldest item still being processed.
pub fn longest_running_processor_seconds() -> Gauge<f64> {
    meter()
        .f64_gauge("prioqueue.longest_running_processor_seconds")
        .with_description("Seconds the longest running worker has been processing")
        .with_unit("s")
        .build()
}
