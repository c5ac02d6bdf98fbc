//! # prioqueue
//!
//! In-memory work queue for reconcile loops: deduplicating, priority and
//! delay aware, with at most one consumer per key at a time.
//!
//! Retry delays come from a pluggable [`ratelimit::RateLimiter`], queue
//! events go to a [`queue::metrics::QueueMetrics`] sink (OpenTelemetry by
//! default), and time comes from a [`clock::Clock`].

pub mod clock;
pub mod config;
pub mod error;
pub mod queue;
pub mod ratelimit;
pub mod telemetry;

pub use queue::{AddOpts, PriorityQueue};
