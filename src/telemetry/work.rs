//! Reconcile span helpers.
//!
//! Consumers wrap the handling of each dequeued key in a span so that
//! handouts, retries and completions line up in traces.

use std::fmt::Debug;

use tracing::Span;

/// Start a span for reconciling one key taken from `queue`.
///
/// The `reconcile.outcome` field is declared empty and filled by
/// [`record_outcome`].
pub fn start_reconcile_span(queue: &str, key: &impl Debug, priority: i32) -> Span {
    tracing::info_span!(
        "queue.reconcile",
        "queue.name" = queue,
        "queue.key" = ?key,
        "queue.priority" = priority,
        "reconcile.outcome" = tracing::field::Empty,
    )
}

/// Record how a reconcile ended ("ok", "requeued", ...) and emit an event.
pub fn record_outcome(span: &Span, outcome: &str) {
    span.record("reconcile.outcome", outcome);
    span.in_scope(|| {
        tracing::info!(outcome = outcome, "reconcile finished");
    });
}
