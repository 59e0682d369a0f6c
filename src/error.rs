//! error.rs
//! Caller-bug errors for admission and errors raised while loading engine configuration.
//!
//! Running out of capacity is not an error: it is a [`Decision::Rejected`](crate::Decision).

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Invalid admission parameters. Indicates a bug in the caller, never load shedding.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AdmissionError {
    /// `max_requests_per_second` must be finite and greater than zero.
    #[error("invalid rate {0}: max requests per second must be finite and greater than 0")]
    InvalidRate(f64),
    /// `max_concurrency` must be zero (unlimited) or positive.
    #[error("invalid max concurrency {0}: must be 0 (unlimited) or greater")]
    InvalidConcurrency(i64),
    /// The burst window must be longer than zero.
    #[error("invalid burst window {0:?}: must be greater than zero")]
    InvalidWindow(Duration),
    /// Every counter needs a name to be shared under.
    #[error("counter name must not be empty")]
    EmptyCounterName,
}

/// Result type for admission calls.
pub type AdmissionResult<T> = Result<T, AdmissionError>;

/// Failure to load or validate an [`EngineConfig`](crate::config::EngineConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        field: &'static str,
        reason: String,
    },
}
