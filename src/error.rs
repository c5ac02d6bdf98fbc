//! Error types for prioqueue.
//!
//! The queue operations themselves cannot fail; these cover the ambient
//! surfaces around them (configuration, telemetry, the CLI).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("telemetry error: {0}")]
    Telemetry(String),
}

pub type Result<T> = std::result::Result<T, Error>;
