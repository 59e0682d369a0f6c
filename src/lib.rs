//! Per-key admission control for request pipelines.
//!
//! Each inbound unit of work asks an [`AdmissionEngine`] for a [`Decision`]
//! before proceeding. The engine combines three policies on a shared, named
//! counter:
//!
//! - **Rate limiting** with a token bucket of fractional points
//! - **Concurrency capping** of admitted-but-unreleased work
//! - **Request shaping**: briefly sleeping an over-rate request until a point
//!   accrues, bounded by a node-wide sleeper budget
//!
//! # Quick Start
//!
//! ```rust
//! use rate_guard_admission::{AdmissionEngine, AdmissionParams, Decision, EngineConfig};
//!
//! let engine = AdmissionEngine::new(EngineConfig::default());
//! let params = AdmissionParams::new("checkout", 100.0).max_concurrency(8);
//!
//! match engine.admit(&params) {
//!     Ok(Decision::Admitted) => {
//!         // ... do the work, then free the concurrency slot
//!         engine.release("checkout");
//!     }
//!     Ok(Decision::Rejected(reason)) => println!("service unavailable: {}", reason),
//!     Err(e) => println!("bad rate limit configuration: {}", e),
//! }
//! ```
//!
//! # Core Concepts
//!
//! ## Time Representation
//! All time is read from a [`ClockSource`](clock::ClockSource) as monotonic
//! nanoseconds. [`MonotonicClock`](clock::MonotonicClock) wraps the system
//! clock; [`VirtualClock`](clock::VirtualClock) only moves when a test moves it.
//!
//! ## Error Handling
//! Running out of capacity is a normal [`Decision::Rejected`] carrying a
//! [`Rejection`] reason. [`AdmissionError`] is reserved for invalid parameters,
//! which point at a bug in the caller.
//!
//! ## Thread Safety
//! Each counter has its own lock, held only for one accrue/check/consume step
//! and never while sleeping. Unrelated keys never contend with each other.
//!
//! ## Maintenance
//! Idle counters are dropped by [`AdmissionEngine::evict_stale`], typically
//! from an [`EvictionSweeper`].

pub mod clock;
pub mod config;
pub mod cores;
pub mod engine;
pub mod error;
pub mod params;
pub mod sweeper;
pub mod types;

pub use config::EngineConfig;
pub use engine::AdmissionEngine;
pub use error::{AdmissionError, AdmissionResult, ConfigError};
pub use params::AdmissionParams;
pub use sweeper::EvictionSweeper;
pub use types::{Decision, Nanos, Rejection, NANOS_PER_SECOND};
