//! Metrics sink the queue reports to.
//!
//! The queue calls these hooks at fixed points: `add` when an item becomes
//! ready, `get` at handout, `done` when a worker releases a key, `retry` for
//! every delayed add, and `update_unfinished_work` from the periodic sampler.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Gauge, Histogram, UpDownCounter};
use tokio::time::Instant;

use crate::clock::{Clock, TokioClock};
use crate::telemetry::metrics;

pub trait QueueMetrics<K>: Send + Sync {
    fn add(&self, key: &K);
    fn get(&self, key: &K);
    fn done(&self, key: &K);
    fn retry(&self);
    fn update_unfinished_work(&self);

    /// Whether the queue should run the periodic `update_unfinished_work`
    /// sampler for this sink.
    fn samples_unfinished_work(&self) -> bool {
        true
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl<K> QueueMetrics<K> for NoopMetrics {
    fn add(&self, _key: &K) {}
    fn get(&self, _key: &K) {}
    fn done(&self, _key: &K) {}
    fn retry(&self) {}
    fn update_unfinished_work(&self) {}

    fn samples_unfinished_work(&self) -> bool {
        false
    }
}

#[derive(Debug)]
struct Timings<K> {
    added: HashMap<K, Instant>,
    processing: HashMap<K, Instant>,
}

/// Records queue events through OpenTelemetry instruments.
pub struct OtelMetrics<K> {
    labels: [KeyValue; 1],
    depth: UpDownCounter<i64>,
    adds: Counter<u64>,
    latency: Histogram<f64>,
    work_duration: Histogram<f64>,
    retries: Counter<u64>,
    unfinished: Gauge<f64>,
    longest_running: Gauge<f64>,
    timings: Mutex<Timings<K>>,
    clock: Arc<dyn Clock>,
}

impl<K> OtelMetrics<K> {
    pub fn new(queue_name: impl Into<String>) -> Self {
        Self::with_clock(queue_name, Arc::new(TokioClock))
    }

    /// Measure latencies against `clock` rather than Tokio time.
    pub fn with_clock(queue_name: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            labels: [KeyValue::new("name", queue_name.into())],
            depth: metrics::depth(),
            adds: metrics::adds(),
            latency: metrics::queue_duration_seconds(),
            work_duration: metrics::work_duration_seconds(),
            retries: metrics::retries(),
            unfinished: metrics::unfinished_work_seconds(),
            longest_running: metrics::longest_running_processor_seconds(),
            timings: Mutex::new(Timings {
                added: HashMap::new(),
                processing: HashMap::new(),
            }),
            clock,
        }
    }
}

impl<K> QueueMetrics<K> for OtelMetrics<K>
where
    K: Clone + Eq + Hash + Send,
{
    fn add(&self, key: &K) {
        self.adds.add(1, &self.labels);
        self.depth.add(1, &self.labels);
        let now = self.clock.now();
        let mut timings = self.timings.lock().unwrap_or_else(PoisonError::into_inner);
        timings.added.entry(key.clone()).or_insert(now);
    }

    fn get(&self, key: &K) {
        self.depth.add(-1, &self.labels);
        let now = self.clock.now();
        let mut timings = self.timings.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(added) = timings.added.remove(key) {
            self.latency
                .record((now - added).as_secs_f64(), &self.labels);
        }
        timings.processing.insert(key.clone(), now);
    }

    fn done(&self, key: &K) {
        let now = self.clock.now();
        let mut timings = self.timings.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(started) = timings.processing.remove(key) {
            self.work_duration
                .record((now - started).as_secs_f64(), &self.labels);
        }
    }

    fn retry(&self) {
        self.retries.add(1, &self.labels);
    }

    fn update_unfinished_work(&self) {
        let now = self.clock.now();
        let timings = self.timings.lock().unwrap_or_else(PoisonError::into_inner);
        let mut total = 0.0;
        let mut oldest = 0.0_f64;
        for started in timings.processing.values() {
            let age = (now - *started).as_secs_f64();
            total += age;
            oldest = oldest.max(age);
        }
        self.unfinished.record(total, &self.labels);
        self.longest_running.record(oldest, &self.labels);
    }
}

impl<K, M: QueueMetrics<K> + ?Sized> QueueMetrics<K> for std::sync::Arc<M> {
    fn add(&self, key: &K) {
        (**self).add(key)
    }

    fn get(&self, key: &K) {
        (**self).get(key)
    }

    fn done(&self, key: &K) {
        (**self).done(key)
    }

    fn retry(&self) {
        (**self).retry()
    }

    fn update_unfinished_work(&self) {
        (**self).update_unfinished_work()
    }

    fn samples_unfinished_work(&self) -> bool {
        (**self).samples_unfinished_work()
    }
}
