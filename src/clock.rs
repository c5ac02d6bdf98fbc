//! Time source used by the queue.
//!
//! The default [`TokioClock`] follows the Tokio runtime clock, so tests can
//! pause and advance time with `#[tokio::test(start_paused = true)]`.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::time::Instant;

/// A future that resolves once a delay has elapsed.
pub type Sleep = Pin<Box<dyn Future<Output = ()> + Send>>;

pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;

    /// Resolve after `duration`. Used to wake the coordinator for the next
    /// delayed item.
    fn sleep(&self, duration: Duration) -> Sleep;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> Sleep {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Roughly 30 years. Stands in for "never" when a delay overflows `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// `now + after`, saturating at a far-future instant instead of panicking.
pub(crate) fn deadline(now: Instant, after: Duration) -> Instant {
    now.checked_add(after)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}
