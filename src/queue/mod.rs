//! Deduplicating priority work queue.
//!
//! Producers add keys, optionally delayed or rate limited. Each key is queued
//! at most once: a duplicate add merges into the existing entry, keeping the
//! higher priority and the earlier readiness. Consumers `get` one ready key at
//! a time and must call `done` before the same key can be handed out again.
//!
//! A single coordinator task owns the handout loop. It wakes whenever an item
//! or a waiter arrives, or when the earliest delayed item becomes ready.

mod coordinator;
mod index;
mod item;
pub mod metrics;

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{Notify, oneshot, watch};
use tokio::time::Instant;
use tracing::{info, trace};

use crate::clock::{Clock, TokioClock, deadline};
use crate::ratelimit::{ItemExponentialFailureRateLimiter, RateLimiter};

use index::OrderedIndex;
use item::{Handout, QueueItem};
use metrics::{OtelMetrics, QueueMetrics};

/// Interval of the unfinished-work sampler.
pub const DEPTH_SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

/// Options for [`PriorityQueue::add_with_opts`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddOpts {
    pub(crate) after: Duration,
    pub(crate) rate_limited: bool,
    pub(crate) priority: i32,
}

impl AddOpts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold the item back for `after`. Zero means ready now.
    pub fn after(mut self, after: Duration) -> Self {
        self.after = after;
        self
    }

    /// Ask the rate limiter for a delay. The shorter of that and `after` wins.
    pub fn rate_limited(mut self) -> Self {
        self.rate_limited = true;
        self
    }

    /// Higher = more urgent.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Everything guarded by the item store lock.
struct QueueState<K> {
    items: HashMap<K, QueueItem<K>>,
    index: OrderedIndex<K>,
    /// Counts first insertions. Orders equal-priority items FIFO.
    added_counter: u64,
    /// Delayed items that have been seen ready, so `add` is reported once.
    became_ready: HashSet<K>,
    /// Consumers blocked in `get`, oldest first.
    waiters: VecDeque<oneshot::Sender<Handout<K>>>,
}

impl<K> QueueState<K>
where
    K: Clone + Eq + Hash,
{
    fn new() -> Self {
        Self {
            items: HashMap::new(),
            index: OrderedIndex::default(),
            added_counter: 0,
            became_ready: HashSet::new(),
            waiters: VecDeque::new(),
        }
    }

    fn insert_or_merge(
        &mut self,
        key: K,
        priority: i32,
        ready_at: Option<Instant>,
        metrics: &dyn QueueMetrics<K>,
    ) {
        match self.items.get_mut(&key) {
            None => {
                let item = QueueItem::new(key.clone(), self.added_counter, priority, ready_at);
                self.added_counter += 1;
                self.index.insert(item.order, item.key.clone());
                // Delayed items are reported once they become ready.
                if ready_at.is_none() {
                    metrics.add(&key);
                }
                self.items.insert(key, item);
            }
            Some(item) => {
                // Both merged fields are part of the sort position.
                self.index.remove(&item.order);
                if item.merge(priority, ready_at) && !self.became_ready.contains(&key) {
                    metrics.add(&key);
                }
                self.index.insert(item.order, item.key.clone());
            }
        }
    }
}

pub(crate) struct Shared<K> {
    name: String,
    state: Mutex<QueueState<K>>,
    /// Keys handed out and not yet released by `done`.
    /// Lock order: `state` before `locked`.
    locked: Mutex<HashSet<K>>,
    item_or_waiter_added: Arc<Notify>,
    shutdown: watch::Sender<bool>,
    rate_limiter: Box<dyn RateLimiter<K>>,
    metrics: Arc<dyn QueueMetrics<K>>,
    clock: Arc<dyn Clock>,
}

impl<K> Shared<K> {
    fn lock_state(&self) -> MutexGuard<'_, QueueState<K>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_locked(&self) -> MutexGuard<'_, HashSet<K>> {
        self.locked.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}

/// Receiving end of a consumer's place in the waiter list.
///
/// If the `get` future is dropped after the coordinator already filled the
/// slot, the key is unlocked and queued again instead of being lost.
struct WaiterSlot<'a, K>
where
    K: Clone + Eq + Hash,
{
    shared: &'a Shared<K>,
    rx: oneshot::Receiver<Handout<K>>,
}

impl<K> Drop for WaiterSlot<'_, K>
where
    K: Clone + Eq + Hash,
{
    fn drop(&mut self) {
        self.rx.close();
        let Ok(handout) = self.rx.try_recv() else {
            return;
        };

        let mut state = self.shared.lock_state();
        self.shared.lock_locked().remove(&handout.key);
        state.insert_or_merge(
            handout.key,
            handout.priority,
            None,
            self.shared.metrics.as_ref(),
        );
        drop(state);
        self.shared.item_or_waiter_added.notify_one();
    }
}

/// Builder for [`PriorityQueue`].
pub struct Builder<K> {
    name: String,
    rate_limiter: Option<Box<dyn RateLimiter<K>>>,
    metrics: Option<Arc<dyn QueueMetrics<K>>>,
    clock: Arc<dyn Clock>,
}

impl<K> Builder<K>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
{
    /// Defaults to per-key exponential backoff from 5ms up to 1000s.
    pub fn rate_limiter(mut self, rate_limiter: impl RateLimiter<K> + 'static) -> Self {
        self.rate_limiter = Some(Box::new(rate_limiter));
        self
    }

    /// Defaults to [`OtelMetrics`] labelled with the queue name and timed by
    /// the queue's clock.
    pub fn metrics(mut self, metrics: impl QueueMetrics<K> + 'static) -> Self {
        self.metrics = Some(Arc::new(metrics));
        self
    }

    pub fn clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Build the queue and spawn its background tasks.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn build(self) -> PriorityQueue<K> {
        let rate_limiter = self
            .rate_limiter
            .unwrap_or_else(|| Box::new(ItemExponentialFailureRateLimiter::default()));
        let metrics = self
            .metrics
            .unwrap_or_else(|| {
                Arc::new(OtelMetrics::with_clock(
                    self.name.clone(),
                    Arc::clone(&self.clock),
                ))
            });
        let (shutdown, shutdown_rx) = watch::channel(false);
        let wake = Arc::new(Notify::new());

        let shared = Arc::new(Shared {
            name: self.name,
            state: Mutex::new(QueueState::new()),
            locked: Mutex::new(HashSet::new()),
            item_or_waiter_added: Arc::clone(&wake),
            shutdown,
            rate_limiter,
            metrics: Arc::clone(&metrics),
            clock: Arc::clone(&self.clock),
        });

        tokio::spawn(coordinator::run(
            Arc::downgrade(&shared),
            wake,
            shutdown_rx.clone(),
            self.clock,
        ));
        if metrics.samples_unfinished_work() {
            tokio::spawn(coordinator::sample_unfinished_work(metrics, shutdown_rx));
        }

        info!(queue = %shared.name, "priority queue started");
        PriorityQueue { shared }
    }
}

/// Handle to a priority queue. Clones share the same queue.
///
/// Dropping the last handle stops the background tasks, same as
/// [`shut_down`](Self::shut_down).
pub struct PriorityQueue<K> {
    shared: Arc<Shared<K>>,
}

impl<K> Clone for PriorityQueue<K> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K> PriorityQueue<K>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
{
    /// Queue with the default rate limiter, OTel metrics, and Tokio clock.
    pub fn new(name: impl Into<String>) -> Self {
        Self::builder(name).build()
    }

    pub fn builder(name: impl Into<String>) -> Builder<K> {
        Builder {
            name: name.into(),
            rate_limiter: None,
            metrics: None,
            clock: Arc::new(TokioClock),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Add keys with the given options. Keys already queued are merged:
    /// max of the priorities, min of the readiness times.
    ///
    /// Never blocks on consumers. After shutdown the keys are stored but
    /// nobody will receive them.
    pub fn add_with_opts(&self, opts: AddOpts, keys: impl IntoIterator<Item = K>) {
        let shared = &self.shared;
        let mut state = shared.lock_state();
        let mut touched = false;

        for key in keys {
            touched = true;
            let mut after = opts.after;
            if opts.rate_limited {
                let limited = shared.rate_limiter.when(&key);
                if after.is_zero() || limited < after {
                    after = limited;
                }
            }

            let ready_at = if after.is_zero() {
                None
            } else {
                shared.metrics.retry();
                Some(deadline(shared.clock.now(), after))
            };

            trace!(queue = %shared.name, ?key, priority = opts.priority, ?after, "add");
            state.insert_or_merge(key, opts.priority, ready_at, shared.metrics.as_ref());
        }
        drop(state);

        if touched {
            shared.item_or_waiter_added.notify_one();
        }
    }

    pub fn add(&self, key: K) {
        self.add_with_opts(AddOpts::new(), [key]);
    }

    pub fn add_after(&self, key: K, after: Duration) {
        self.add_with_opts(AddOpts::new().after(after), [key]);
    }

    pub fn add_rate_limited(&self, key: K) {
        self.add_with_opts(AddOpts::new().rate_limited(), [key]);
    }

    /// Wait for the next ready, unlocked key and lock it.
    ///
    /// Returns `None` once the queue is shut down; ready items still queued
    /// at that point are not drained. Cancel-safe: a key handed to a future
    /// that is dropped before resolving goes back into the queue.
    pub async fn get_with_priority(&self) -> Option<(K, i32)> {
        let shared = &self.shared;
        let mut shutdown = shared.shutdown.subscribe();
        if *shutdown.borrow_and_update() {
            return None;
        }

        let (tx, rx) = oneshot::channel();
        shared.lock_state().waiters.push_back(tx);
        shared.item_or_waiter_added.notify_one();

        let mut slot = WaiterSlot {
            shared: &**shared,
            rx,
        };
        tokio::select! {
            biased;
            handout = &mut slot.rx => handout.ok().map(|h| (h.key, h.priority)),
            _ = shutdown.wait_for(|down| *down) => {
                // A handout that raced with shutdown is already locked to us.
                slot.rx.close();
                slot.rx.try_recv().ok().map(|h| (h.key, h.priority))
            }
        }
    }

    /// [`get_with_priority`](Self::get_with_priority) without the priority.
    pub async fn get(&self) -> Option<K> {
        self.get_with_priority().await.map(|(key, _)| key)
    }

    /// Release a key obtained from `get`. Releasing a key that is not
    /// locked does nothing.
    pub fn done(&self, key: &K) {
        let released = self.shared.lock_locked().remove(key);
        self.shared.metrics.done(key);
        trace!(queue = %self.shared.name, ?key, released, "done");
        // The key may have been re-added while it was locked.
        self.shared.item_or_waiter_added.notify_one();
    }

    pub fn forget(&self, key: &K) {
        self.shared.rate_limiter.forget(key);
    }

    pub fn num_requeues(&self, key: &K) -> u32 {
        self.shared.rate_limiter.num_requeues(key)
    }

    /// Number of items ready to be handed out. Delayed items are excluded.
    pub fn len(&self) -> usize {
        let now = self.shared.clock.now();
        self.shared.lock_state().index.ready_len(now)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop the coordinator and wake all blocked consumers with `None`.
    pub fn shut_down(&self) {
        if self.shared.shutdown.send_replace(true) {
            return;
        }
        let mut state = self.shared.lock_state();
        state.waiters.clear();
        info!(
            queue = %self.shared.name,
            queued = state.index.len(),
            "priority queue shutting down"
        );
    }

    pub fn shutting_down(&self) -> bool {
        self.shared.shutting_down()
    }
}
