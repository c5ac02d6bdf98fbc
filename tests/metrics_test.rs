//! Tests for the events the queue reports to its metrics sink.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use prioqueue::PriorityQueue;
use prioqueue::queue::metrics::{NoopMetrics, OtelMetrics, QueueMetrics};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Add(String),
    Get(String),
    Done(String),
    Retry,
}

#[derive(Default)]
struct RecordingMetrics {
    events: Mutex<Vec<Event>>,
    samples: Mutex<usize>,
}

impl RecordingMetrics {
    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn count(&self, event: &Event) -> usize {
        self.events().iter().filter(|e| *e == event).count()
    }
}

impl QueueMetrics<String> for RecordingMetrics {
    fn add(&self, key: &String) {
        self.events.lock().unwrap().push(Event::Add(key.clone()));
    }

    fn get(&self, key: &String) {
        self.events.lock().unwrap().push(Event::Get(key.clone()));
    }

    fn done(&self, key: &String) {
        self.events.lock().unwrap().push(Event::Done(key.clone()));
    }

    fn retry(&self) {
        self.events.lock().unwrap().push(Event::Retry);
    }

    fn update_unfinished_work(&self) {
        *self.samples.lock().unwrap() += 1;
    }
}

fn recorded_queue() -> (PriorityQueue<String>, Arc<RecordingMetrics>) {
    let metrics = Arc::new(RecordingMetrics::default());
    let q = PriorityQueue::builder("metrics")
        .metrics(Arc::clone(&metrics))
        .build();
    (q, metrics)
}

fn k(s: &str) -> String {
    s.to_string()
}

#[tokio::test(start_paused = true)]
async fn immediate_add_get_done_are_reported_in_order() {
    let (q, metrics) = recorded_queue();

    q.add(k("a"));
    assert_eq!(q.get().await, Some(k("a")));
    q.done(&k("a"));

    assert_eq!(
        metrics.events(),
        vec![Event::Add(k("a")), Event::Get(k("a")), Event::Done(k("a"))]
    );
}

#[tokio::test(start_paused = true)]
async fn merged_add_is_reported_once() {
    let (q, metrics) = recorded_queue();

    q.add(k("k"));
    q.add(k("k"));
    q.add(k("k"));

    assert_eq!(metrics.count(&Event::Add(k("k"))), 1);
}

#[tokio::test(start_paused = true)]
async fn delayed_add_is_reported_when_it_becomes_ready() {
    let (q, metrics) = recorded_queue();

    q.add_after(k("d"), Duration::from_millis(10));
    assert_eq!(metrics.events(), vec![Event::Retry]);

    assert_eq!(q.get().await, Some(k("d")));
    assert_eq!(
        metrics.events(),
        vec![Event::Retry, Event::Add(k("d")), Event::Get(k("d"))]
    );
}

#[tokio::test(start_paused = true)]
async fn delayed_then_immediate_add_is_reported_once() {
    let (q, metrics) = recorded_queue();

    q.add_after(k("x"), Duration::from_secs(5));
    q.add(k("x"));
    assert_eq!(q.get().await, Some(k("x")));

    assert_eq!(metrics.count(&Event::Add(k("x"))), 1);
}

#[tokio::test(start_paused = true)]
async fn item_ready_before_merge_is_not_reported_twice() {
    let (q, metrics) = recorded_queue();

    q.add_after(k("y"), Duration::from_millis(10));
    // Let the coordinator see it become ready with nobody waiting.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(metrics.count(&Event::Add(k("y"))), 1);

    q.add(k("y"));
    assert_eq!(q.get().await, Some(k("y")));
    assert_eq!(metrics.count(&Event::Add(k("y"))), 1);
}

#[tokio::test(start_paused = true)]
async fn unfinished_work_is_sampled_until_shutdown() {
    let (q, metrics) = recorded_queue();

    tokio::time::sleep(Duration::from_millis(1200)).await;
    let sampled = *metrics.samples.lock().unwrap();
    assert!(sampled >= 2, "sampled {sampled} times");

    q.shut_down();
    tokio::time::sleep(Duration::from_millis(10)).await;
    let at_shutdown = *metrics.samples.lock().unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(*metrics.samples.lock().unwrap(), at_shutdown);
}

/// A sink that opts out of periodic sampling.
#[derive(Default)]
struct UnsampledMetrics {
    samples: Mutex<usize>,
}

impl QueueMetrics<String> for UnsampledMetrics {
    fn add(&self, _key: &String) {}
    fn get(&self, _key: &String) {}
    fn done(&self, _key: &String) {}
    fn retry(&self) {}

    fn update_unfinished_work(&self) {
        *self.samples.lock().unwrap() += 1;
    }

    fn samples_unfinished_work(&self) -> bool {
        false
    }
}

#[tokio::test(start_paused = true)]
async fn sampler_is_skipped_for_sinks_that_opt_out() {
    let metrics = Arc::new(UnsampledMetrics::default());
    let q: PriorityQueue<String> = PriorityQueue::builder("unsampled")
        .metrics(Arc::clone(&metrics))
        .build();

    q.add(k("a"));
    assert_eq!(q.get().await, Some(k("a")));
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(*metrics.samples.lock().unwrap(), 0);
    assert!(!QueueMetrics::<String>::samples_unfinished_work(&NoopMetrics));
}

#[tokio::test(start_paused = true)]
async fn otel_metrics_accept_full_lifecycle() {
    let metrics = OtelMetrics::new("otel");
    let key = k("o");

    metrics.add(&key);
    metrics.retry();
    metrics.get(&key);
    metrics.update_unfinished_work();
    metrics.done(&key);
    // Done for a key never handed out is ignored.
    metrics.done(&k("unknown"));
}
