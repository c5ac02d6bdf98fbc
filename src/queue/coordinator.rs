//! The handout loop.
//!
//! Only the coordinator walks the index to hand items out. Producers and
//! consumers just mutate state under the lock and poke the wake signal.

use std::collections::VecDeque;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{Notify, oneshot, watch};
use tracing::debug;

use super::item::Handout;
use super::metrics::QueueMetrics;
use super::{DEPTH_SAMPLE_INTERVAL, QueueState, Shared};
use crate::clock::{Clock, Sleep};

/// Run until shutdown or until every queue handle is dropped.
pub(super) async fn run<K>(
    shared: Weak<Shared<K>>,
    wake: Arc<Notify>,
    mut shutdown: watch::Receiver<bool>,
    clock: Arc<dyn Clock>,
) where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
{
    let mut next_ready: Option<Sleep> = None;

    loop {
        tokio::select! {
            _ = shutdown.wait_for(|down| *down) => break,
            _ = wake.notified() => {}
            _ = async {
                match next_ready.as_mut() {
                    Some(sleep) => sleep.await,
                    None => std::future::pending().await,
                }
            } => {}
        }

        let Some(shared) = shared.upgrade() else {
            break;
        };
        // Recomputed from scratch every cycle.
        next_ready = shared.dispatch().map(|delay| clock.sleep(delay));
    }

    debug!("coordinator stopped");
}

/// Periodically report in-flight work until shutdown.
pub(super) async fn sample_unfinished_work<K>(
    metrics: Arc<dyn QueueMetrics<K>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(DEPTH_SAMPLE_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.wait_for(|down| *down) => return,
            _ = ticker.tick() => metrics.update_unfinished_work(),
        }
    }
}

impl<K> Shared<K>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
{
    /// One scan over the index: hand ready, unlocked items to waiting
    /// consumers in order. Returns the delay until the earliest item that
    /// is not ready yet.
    fn dispatch(&self) -> Option<Duration> {
        let mut state = self.lock_state();
        let mut locked = self.lock_locked();
        let now = self.clock.now();

        let QueueState {
            items,
            index,
            became_ready,
            waiters,
            ..
        } = &mut *state;

        waiters.retain(|waiter| !waiter.is_closed());

        let mut next_ready = None;
        // The index cannot change while we walk it, remove afterwards.
        let mut handed_out = Vec::new();

        for (order, key) in index.iter() {
            if let Some(ready_at) = order.ready_at {
                if ready_at > now {
                    // Everything past here is delayed too.
                    next_ready = Some(ready_at - now);
                    break;
                }
                if became_ready.insert(key.clone()) {
                    self.metrics.add(key);
                }
            }

            // Keep going without waiters so readiness metrics stay current
            // and the timer is armed.
            if waiters.is_empty() || locked.contains(key) {
                continue;
            }

            let handout = Handout {
                key: key.clone(),
                priority: order.priority,
            };
            if !deliver(waiters, handout) {
                continue;
            }

            debug!(queue = %self.name, ?key, priority = order.priority, "handed out");
            self.metrics.get(key);
            locked.insert(key.clone());
            items.remove(key);
            became_ready.remove(key);
            handed_out.push(*order);
        }

        for order in &handed_out {
            index.remove(order);
        }

        next_ready
    }
}

/// Give `handout` to the oldest consumer still waiting. Consumers that
/// gave up are skipped. Returns false if nobody took it.
fn deliver<K>(waiters: &mut VecDeque<oneshot::Sender<Handout<K>>>, mut handout: Handout<K>) -> bool {
    while let Some(waiter) = waiters.pop_front() {
        match waiter.send(handout) {
            Ok(()) => return true,
            Err(returned) => handout = returned,
        }
    }
    false
}
