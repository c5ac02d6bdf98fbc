//! Ordered index over queued items.
//!
//! A `BTreeMap` keyed by [`OrderKey`]. The insertion sequence is unique per
//! item, so keys never collide and removal by key is removal by identity.

use std::collections::BTreeMap;

use tokio::time::Instant;

use super::item::OrderKey;

#[derive(Debug)]
pub(crate) struct OrderedIndex<K> {
    tree: BTreeMap<OrderKey, K>,
}

impl<K> Default for OrderedIndex<K> {
    fn default() -> Self {
        Self {
            tree: BTreeMap::new(),
        }
    }
}

impl<K> OrderedIndex<K> {
    pub fn insert(&mut self, order: OrderKey, key: K) {
        self.tree.insert(order, key);
    }

    pub fn remove(&mut self, order: &OrderKey) -> Option<K> {
        self.tree.remove(order)
    }

    /// Ascending traversal. Callers stop early by breaking out of the loop.
    pub fn iter(&self) -> impl Iterator<Item = (&OrderKey, &K)> {
        self.tree.iter()
    }

    /// Number of leading entries that are ready at `now`. Ready items always
    /// precede delayed ones, so counting stops at the first future entry.
    pub fn ready_len(&self, now: Instant) -> usize {
        self.tree
            .keys()
            .take_while(|order| order.is_ready(now))
            .count()
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }
}
