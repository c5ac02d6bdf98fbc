//! Queue entries and the total order the index keeps them in.

use std::cmp::Ordering;

use tokio::time::Instant;

/// Position of an item in the ordered index.
///
/// Items without `ready_at` sort first. Delayed items sort by readiness,
/// then by priority (higher first), then by insertion sequence so that
/// equal-priority items come out FIFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct OrderKey {
    pub ready_at: Option<Instant>,
    pub priority: i32,
    pub seq: u64,
}

impl Ord for OrderKey {
    fn cmp(&self, other: &Self) -> Ordering {
        let readiness = match (self.ready_at, other.ready_at) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(a), Some(b)) => a.cmp(&b),
        };
        readiness
            .then_with(|| other.priority.cmp(&self.priority))
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for OrderKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl OrderKey {
    /// Ready means no delay, or the delay has elapsed at `now`.
    pub fn is_ready(&self, now: Instant) -> bool {
        self.ready_at.is_none_or(|at| at <= now)
    }
}

/// A key waiting in the queue.
#[derive(Debug, Clone)]
pub(crate) struct QueueItem<K> {
    pub key: K,
    pub order: OrderKey,
}

impl<K> QueueItem<K> {
    pub fn new(key: K, seq: u64, priority: i32, ready_at: Option<Instant>) -> Self {
        Self {
            key,
            order: OrderKey {
                ready_at,
                priority,
                seq,
            },
        }
    }

    /// Fold a duplicate add into this item: the higher priority wins and the
    /// earlier readiness wins. Returns true when the item went from delayed
    /// to immediately ready.
    ///
    /// The caller must take the item out of the index first, since both
    /// fields are part of its sort position.
    pub fn merge(&mut self, priority: i32, ready_at: Option<Instant>) -> bool {
        if priority > self.order.priority {
            self.order.priority = priority;
        }
        match (self.order.ready_at, ready_at) {
            (Some(_), None) => {
                self.order.ready_at = None;
                true
            }
            (Some(current), Some(candidate)) if candidate < current => {
                self.order.ready_at = Some(candidate);
                false
            }
            _ => false,
        }
    }
}

/// What a consumer receives from the coordinator.
#[derive(Debug, Clone)]
pub(crate) struct Handout<K> {
    pub key: K,
    pub priority: i32,
}
